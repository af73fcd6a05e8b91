//! # Pipeline state
//!
//! The stage model the [`crate::Runner`] drives and observers render:
//!
//! ```text
//! idle -> architect -> data -> run -> idle
//! ```
//!
//! Any stage except `data` exits to `idle` with an error message on failure.
//! A failed validation in `data` stays in `data` with the message set.

use serde::Serialize;
use std::fmt;

use crate::config::Problem;
use crate::data::{DataInputs, new_id};
use crate::plan::AgentSpec;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing in flight. Carries the last error, if any.
    #[default]
    Idle,
    /// Streaming the planning call.
    Architect,
    /// Plan ready, waiting for input selection.
    Data,
    /// Executing agents one after another.
    Run,
}

impl Stage {
    /// A streaming call belongs to this stage.
    pub fn is_busy(&self) -> bool {
        matches!(self, Stage::Architect | Stage::Run)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Architect => "architect",
            Stage::Data => "data",
            Stage::Run => "run",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Done,
    Errored,
}

/// One agent's turn: its streamed text and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentExecution {
    pub id: String,
    pub name: String,
    pub task: String,
    pub instruction: String,
    pub text: String,
    pub status: ExecutionStatus,
}

impl AgentExecution {
    pub(crate) fn start(spec: &AgentSpec) -> Self {
        Self {
            id: new_id("agent"),
            name: spec.name.clone(),
            task: spec.initial_task.clone(),
            instruction: spec.system_instruction.clone(),
            text: String::new(),
            status: ExecutionStatus::Running,
        }
    }

    /// Text only grows, and only while running.
    pub(crate) fn append(&mut self, token: &str) {
        if self.status == ExecutionStatus::Running {
            self.text.push_str(token);
        }
    }

    /// Leave `Running` exactly once. Later calls are ignored.
    pub(crate) fn finish(&mut self, status: ExecutionStatus) {
        if self.status == ExecutionStatus::Running && status != ExecutionStatus::Running {
            self.status = status;
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }
}

/// Everything an observer needs to render one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub stage: Stage,
    pub problem: Option<Problem>,
    pub plan: Vec<AgentSpec>,
    pub inputs: DataInputs,
    pub executions: Vec<AgentExecution>,
    /// Index into `plan` of the agent currently streaming.
    pub running: Option<usize>,
    /// Raw architect output as it streams in.
    pub architect_buffer: String,
    pub error: Option<String>,
}

impl PipelineState {
    pub fn running_execution(&self) -> Option<&AgentExecution> {
        self.executions.get(self.running?)
    }

    pub fn completed(&self) -> impl Iterator<Item = &AgentExecution> {
        self.executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Done)
    }

    pub fn is_busy(&self) -> bool {
        self.stage.is_busy()
    }
}

/// Receives the state after every transition and every streamed token.
pub trait StateObserver {
    fn on_state(&mut self, state: &PipelineState);
}

impl<F: FnMut(&PipelineState)> StateObserver for F {
    fn on_state(&mut self, state: &PipelineState) {
        self(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AgentSpec {
        AgentSpec {
            name: "Analyst".into(),
            system_instruction: "Analyze.".into(),
            initial_task: "Look at Q3.".into(),
        }
    }

    #[test]
    fn execution_starts_running_and_empty() {
        let exec = AgentExecution::start(&spec());
        assert!(exec.is_running());
        assert!(exec.text.is_empty());
        assert_eq!(exec.name, "Analyst");
        assert_eq!(exec.task, "Look at Q3.");
        assert_eq!(exec.instruction, "Analyze.");
        assert!(exec.id.starts_with("agent-"));
    }

    #[test]
    fn status_changes_exactly_once() {
        let mut exec = AgentExecution::start(&spec());
        exec.append("partial");
        exec.finish(ExecutionStatus::Errored);
        exec.finish(ExecutionStatus::Done);
        exec.append(" more");

        assert_eq!(exec.status, ExecutionStatus::Errored);
        assert_eq!(exec.text, "partial");
    }

    #[test]
    fn busy_stages() {
        assert!(!Stage::Idle.is_busy());
        assert!(Stage::Architect.is_busy());
        assert!(!Stage::Data.is_busy());
        assert!(Stage::Run.is_busy());
    }

    #[test]
    fn running_execution_follows_index() {
        let mut state = PipelineState::default();
        assert!(state.running_execution().is_none());

        state.executions.push(AgentExecution::start(&spec()));
        state.running = Some(0);
        assert_eq!(state.running_execution().map(|e| e.name.as_str()), Some("Analyst"));
    }

    #[test]
    fn closures_are_observers() {
        let mut seen = Vec::new();
        {
            let mut observer = |state: &PipelineState| seen.push(state.stage);
            observer.on_state(&PipelineState::default());
        }
        assert_eq!(seen, [Stage::Idle]);
    }

    #[test]
    fn state_serializes_for_renderers() {
        let state = PipelineState {
            stage: Stage::Run,
            ..PipelineState::default()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["stage"], "run");
        assert!(value["executions"].as_array().unwrap().is_empty());
    }
}
