use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ChatMessage, ChatRequest, CompletionClient, Endpoint};
use crate::config::{DEFAULT_MODEL, Problem};
use crate::data::{
    CONTEXT_CHARS, DataEntry, DataInputs, format_data_entries, normalize_inputs, truncate,
};
use crate::error::RelayError;
use crate::parse::parse_lenient;
use crate::pipeline::{AgentExecution, ExecutionStatus, PipelineState, Stage, StateObserver};
use crate::plan::{AgentSpec, FALLBACK_MAX_AGENTS, normalize_plan};
use crate::transport::Transport;

const NO_INPUTS: &str = "Select or add at least one dataset before running agents.";
const EMPTY_PLAN: &str = "The architect returned no agents to run.";

/// Everything a run needs besides the problem and the inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub endpoint: Endpoint,
    pub model: String,
    pub architect_prompt: String,
    /// Appended to every agent's system instruction.
    pub agent_style: String,
    /// Already clamped to 2..=6.
    pub max_agents: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            model: DEFAULT_MODEL.to_string(),
            architect_prompt: String::new(),
            agent_style: String::new(),
            max_agents: FALLBACK_MAX_AGENTS,
        }
    }
}

impl RunSettings {
    fn credentials(&self) -> Result<&Endpoint, RelayError> {
        if self.endpoint.is_complete() {
            Ok(&self.endpoint)
        } else {
            Err(RelayError::missing_credentials())
        }
    }
}

/// Passed to the `on_error` hook whenever the runner records a failure.
pub struct ErrorEvent<'a> {
    /// Stage the failure happened in.
    pub stage: Stage,
    /// The agent that was streaming, for failures during `run`.
    pub agent: Option<&'a str>,
    pub error: &'a RelayError,
}

/// Drives one session through architect, data and run.
///
/// Owns the [`PipelineState`]; every change goes through one entry point
/// that notifies the observers afterwards. At most one streaming request is
/// in flight, and the next one starts only after the previous one ended.
pub struct Runner<T: Transport> {
    client: CompletionClient<T>,
    settings: RunSettings,
    state: PipelineState,
    observers: Vec<Box<dyn StateObserver>>,
    on_error: Option<Box<dyn FnMut(&ErrorEvent)>>,
}

impl<T: Transport> Runner<T> {
    pub fn new(transport: T, settings: RunSettings) -> Self {
        Self {
            client: CompletionClient::new(transport),
            settings,
            state: PipelineState::default(),
            observers: Vec::new(),
            on_error: None,
        }
    }

    /// Register an observer that sees the state after every update.
    pub fn observe(mut self, observer: impl StateObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Register a callback that fires when a failure is recorded.
    pub fn on_error(mut self, cb: impl FnMut(&ErrorEvent) + 'static) -> Self {
        self.on_error = Some(Box::new(cb));
        self
    }

    /// Log stage changes, agent starts, and failures through `tracing`.
    pub fn with_tracing(self) -> Self {
        let mut last_stage: Option<Stage> = None;
        let mut last_agent: Option<usize> = None;

        self.observe(move |state: &PipelineState| {
            if last_stage != Some(state.stage) {
                info!(stage = %state.stage, agents = state.plan.len(), "pipeline stage changed");
                last_stage = Some(state.stage);
            }
            if state.running != last_agent {
                if let (Some(index), Some(exec)) = (state.running, state.running_execution()) {
                    info!(step = index + 1, agent = %exec.name, "agent started");
                }
                last_agent = state.running;
            }
        })
        .on_error(|e| {
            warn!(stage = %e.stage, agent = e.agent, error = %e.error, "pipeline failed");
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RunSettings {
        &mut self.settings
    }

    /// Start a new cycle on `problem`: clears plan, inputs, outputs and
    /// error, and enters `architect`.
    ///
    /// A problem selected but not yet planned is simply replaced.
    pub fn select(&mut self, problem: Problem) -> Result<(), RelayError> {
        if self.state.stage == Stage::Run {
            return Err(RelayError::InvalidStage {
                action: "select a problem",
                actual: self.state.stage,
            });
        }
        self.update(|s| {
            *s = PipelineState {
                stage: Stage::Architect,
                inputs: DataInputs::suggest(problem.inputs.clone()),
                problem: Some(problem),
                ..PipelineState::default()
            };
        });
        Ok(())
    }

    /// Run the planning call for the selected problem.
    ///
    /// On success the normalized plan and suggested inputs are in place and
    /// the stage is `data`. On failure the stage is `idle` with the error
    /// recorded, and the error is returned as well.
    pub fn plan(&mut self) -> Result<&[AgentSpec], RelayError> {
        let problem = match (&self.state.stage, &self.state.problem) {
            (Stage::Architect, Some(problem)) => problem.clone(),
            (stage, _) => {
                return Err(RelayError::InvalidStage {
                    action: "run the architect",
                    actual: *stage,
                });
            }
        };

        let started = Instant::now();
        match self.stream_architect(&problem) {
            Ok(buffer) => {
                let parsed = parse_lenient(&buffer).unwrap_or_else(|| {
                    warn!("architect output is not valid JSON; continuing with an empty plan");
                    Value::Null
                });
                let plan = normalize_plan(
                    parsed.get("plan").unwrap_or(&Value::Null),
                    self.settings.max_agents,
                );
                let inputs = normalize_inputs(
                    parsed.get("inputs").unwrap_or(&Value::Null),
                    &problem.inputs,
                    &problem.statement,
                );
                debug!(
                    agents = plan.len(),
                    inputs = inputs.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "architect plan normalized"
                );

                self.update(|s| {
                    s.plan = plan;
                    s.inputs = DataInputs::suggest(inputs);
                    s.architect_buffer = buffer;
                    s.stage = Stage::Data;
                });
                Ok(&self.state.plan)
            }
            Err(err) => {
                self.fail(&err, None);
                Err(err)
            }
        }
    }

    /// Change the data inputs. Allowed in `idle` and `data`; in `architect`
    /// the planning call is about to replace them.
    pub fn inputs_mut(&mut self, f: impl FnOnce(&mut DataInputs)) -> Result<(), RelayError> {
        self.ensure_not_busy("change inputs")?;
        self.update(|s| f(&mut s.inputs));
        Ok(())
    }

    /// Run every planned agent in order, threading each one's output into
    /// the next prompt.
    ///
    /// Requires the `data` stage and at least one input; otherwise the error
    /// is recorded and the stage does not change. The first agent failure
    /// ends the run: that agent is `Errored` with its partial text, later
    /// agents never start, and the stage returns to `idle` with the error.
    pub fn execute(&mut self) -> Result<&[AgentExecution], RelayError> {
        if self.state.stage != Stage::Data {
            return Err(RelayError::InvalidStage {
                action: "execute agents",
                actual: self.state.stage,
            });
        }
        if self.state.plan.is_empty() {
            return Err(self.reject(EMPTY_PLAN));
        }
        let entries = self.state.inputs.collect();
        if entries.is_empty() {
            return Err(self.reject(NO_INPUTS));
        }

        let started = Instant::now();
        match self.run_agents(&entries) {
            Ok(()) => {
                self.update(|s| {
                    s.stage = Stage::Idle;
                    s.running = None;
                    s.error = None;
                });
                info!(
                    agents = self.state.executions.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "all agents finished"
                );
                Ok(&self.state.executions)
            }
            Err(err) => {
                let agent = self.state.running_execution().map(|e| e.name.clone());
                self.fail(&err, agent.as_deref());
                Err(err)
            }
        }
    }

    fn stream_architect(&mut self, problem: &Problem) -> Result<String, RelayError> {
        let endpoint = self.settings.credentials()?.clone();
        let system = format!(
            "{}\nLimit to <= {} agents.",
            self.settings.architect_prompt, self.settings.max_agents
        );
        let request = ChatRequest::new(
            self.settings.model.clone(),
            vec![
                ChatMessage::system(system.trim()),
                ChatMessage::user(problem.statement.clone()),
            ],
        );

        let Self {
            client,
            state,
            observers,
            ..
        } = &mut *self;
        client.stream(&endpoint, &request, |token| {
            state.architect_buffer.push_str(token);
            notify(observers, state);
        })?;

        Ok(self.state.architect_buffer.clone())
    }

    fn run_agents(&mut self, entries: &[DataEntry]) -> Result<(), RelayError> {
        let endpoint = self.settings.credentials()?.clone();
        let plan = self.state.plan.clone();
        let statement = self
            .state
            .problem
            .as_ref()
            .map(|p| p.statement.clone())
            .unwrap_or_default();
        let data_blob = format_data_entries(entries);

        self.update(|s| {
            s.stage = Stage::Run;
            s.executions.clear();
            s.running = None;
            s.error = None;
        });

        let mut context = data_blob.clone();
        for (index, spec) in plan.iter().enumerate() {
            let request = ChatRequest::new(
                self.settings.model.clone(),
                agent_messages(spec, &self.settings.agent_style, &statement, &data_blob, &context),
            );
            self.update(|s| {
                s.executions.push(AgentExecution::start(spec));
                s.running = Some(index);
            });

            let Self {
                client,
                state,
                observers,
                ..
            } = &mut *self;
            let streamed = client.stream(&endpoint, &request, |token| {
                if let Some(exec) = state.executions.last_mut() {
                    exec.append(token);
                }
                notify(observers, state);
            });

            let status = match &streamed {
                Ok(()) => ExecutionStatus::Done,
                Err(_) => ExecutionStatus::Errored,
            };
            self.update(|s| {
                if let Some(exec) = s.executions.last_mut() {
                    exec.finish(status);
                }
            });
            streamed?;

            let output = self
                .state
                .executions
                .last()
                .map(|e| e.text.trim())
                .unwrap_or_default();
            if !output.is_empty() {
                context = output.to_string();
            }
            debug!(step = index + 1, agent = %spec.name, chars = output.len(), "agent finished");
        }
        Ok(())
    }

    /// Record a validation failure without leaving the current stage.
    fn reject(&mut self, msg: &str) -> RelayError {
        self.update(|s| s.error = Some(msg.to_string()));
        RelayError::validation(msg)
    }

    /// Record a failure and return to `idle`. An architect failure also
    /// drops the suggestions and the partial planner output.
    fn fail(&mut self, err: &RelayError, agent: Option<&str>) {
        let stage = self.state.stage;
        if let Some(cb) = &mut self.on_error {
            cb(&ErrorEvent {
                stage,
                agent,
                error: err,
            });
        }
        self.update(|s| {
            if s.stage == Stage::Architect {
                s.inputs = DataInputs::default();
                s.architect_buffer.clear();
            }
            s.stage = Stage::Idle;
            s.running = None;
            s.error = Some(err.to_string());
        });
    }

    fn ensure_not_busy(&self, action: &'static str) -> Result<(), RelayError> {
        if self.state.is_busy() {
            return Err(RelayError::InvalidStage {
                action,
                actual: self.state.stage,
            });
        }
        Ok(())
    }

    fn update(&mut self, f: impl FnOnce(&mut PipelineState)) {
        f(&mut self.state);
        notify(&mut self.observers, &self.state);
    }
}

fn notify(observers: &mut [Box<dyn StateObserver>], state: &PipelineState) {
    for observer in observers.iter_mut() {
        observer.on_state(state);
    }
}

/// System and user messages for one agent's turn.
pub fn agent_messages(
    spec: &AgentSpec,
    agent_style: &str,
    problem: &str,
    data_blob: &str,
    context: &str,
) -> Vec<ChatMessage> {
    let system = format!("{}\n{}", spec.system_instruction, agent_style);
    let user = format!(
        "Problem:\n{problem}\n\nTask:\n{}\n\nInput Data:\n{data_blob}\n\nPrevious Output:\n{}",
        spec.initial_task,
        truncate(context, CONTEXT_CHARS)
    );
    vec![ChatMessage::system(system.trim()), ChatMessage::user(user)]
}
