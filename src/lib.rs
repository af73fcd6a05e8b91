//! Plan-then-execute agent pipelines over streaming chat-completion APIs.
//!
//! An *architect* call turns a problem statement into a short plan of agents
//! and a few suggested inputs. After the inputs are chosen, each agent runs
//! in order as its own streaming completion, and every agent sees the
//! previous agent's output. The [`Runner`] drives the stages and publishes a
//! [`PipelineState`] to observers after every change, including every
//! streamed token.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use agent_relay::{Endpoint, PipelineState, Problem, RunSettings, Runner, UreqTransport};
//!
//! let settings = RunSettings {
//!     endpoint: Endpoint::new("https://api.openai.com/v1", "sk-..."),
//!     architect_prompt: "Return {\"plan\": [...], \"inputs\": [...]} as JSON.".into(),
//!     ..RunSettings::default()
//! };
//!
//! let mut runner = Runner::new(UreqTransport::default(), settings)
//!     .with_tracing()
//!     .observe(|state: &PipelineState| {
//!         if let Some(agent) = state.running_execution() {
//!             eprint!("\r{}: {} chars", agent.name, agent.text.len());
//!         }
//!     });
//!
//! runner.select(Problem::custom("Why did churn rise in Q3?")?)?;
//! runner.plan()?;
//! runner.inputs_mut(|inputs| inputs.set_notes("Churn went from 3% to 5%."))?;
//!
//! for agent in runner.execute()? {
//!     println!("## {}\n{}", agent.name, agent.text);
//! }
//! # Ok::<(), agent_relay::RelayError>(())
//! ```

mod client;
mod config;
mod data;
mod error;
mod parse;
mod pipeline;
mod plan;
mod runner;
mod stream;
mod transport;

#[cfg(test)]
mod test_util;

pub use client::{ChatMessage, ChatRequest, CompletionClient, Endpoint, Role};
pub use config::{DEFAULT_MODEL, Defaults, Demo, EndpointConfig, Problem, RelayConfig};
pub use data::{
    CONTEXT_CHARS, DataEntry, DataInputs, DataKind, DataSource, ENTRY_CHARS, MAX_SUGGESTED_INPUTS,
    PREVIEW_CHARS, format_data_entries, normalize_inputs, truncate,
};
pub use error::RelayError;
pub use parse::parse_lenient;
pub use pipeline::{AgentExecution, ExecutionStatus, PipelineState, Stage, StateObserver};
pub use plan::{
    AgentSpec, FALLBACK_MAX_AGENTS, MAX_AGENTS, MIN_AGENTS, clamp_max_agents, normalize_plan,
};
pub use runner::{ErrorEvent, RunSettings, Runner, agent_messages};
pub use stream::{SseParser, TokenStream};
pub use transport::{HttpResponse, Transport, UreqTransport};
