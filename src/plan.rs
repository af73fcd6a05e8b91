use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fewest agents a plan may be bounded to.
pub const MIN_AGENTS: usize = 2;
/// Most agents a plan may be bounded to.
pub const MAX_AGENTS: usize = 6;
/// Used when the requested bound cannot be read at all.
pub const FALLBACK_MAX_AGENTS: usize = 5;

const DEFAULT_INSTRUCTION: &str = "Deliver the next actionable step.";

/// One step of the architect's plan. Execution order is list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(rename = "agentName")]
    pub name: String,
    pub system_instruction: String,
    pub initial_task: String,
}

/// Bound a requested agent count to `MIN_AGENTS..=MAX_AGENTS`.
pub fn clamp_max_agents(requested: i64) -> usize {
    requested.clamp(MIN_AGENTS as i64, MAX_AGENTS as i64) as usize
}

/// Turn untrusted planner output into at most `max_agents` agent specs.
///
/// Never fails: anything that is not a list yields no agents, non-object
/// elements are dropped before the bound is applied, and missing or blank
/// fields get defaults. Applying it to its own serialized output is a no-op.
pub fn normalize_plan(raw: &Value, max_agents: usize) -> Vec<AgentSpec> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    let max_agents = max_agents.clamp(MIN_AGENTS, MAX_AGENTS);

    items
        .iter()
        .filter_map(Value::as_object)
        .take(max_agents)
        .enumerate()
        .map(|(index, item)| {
            let name =
                text_field(item, "agentName").unwrap_or_else(|| format!("Agent {}", index + 1));
            let system_instruction = text_field(item, "systemInstruction")
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string());
            let initial_task =
                text_field(item, "initialTask").unwrap_or_else(|| system_instruction.clone());
            AgentSpec {
                name,
                system_instruction,
                initial_task,
            }
        })
        .collect()
}

/// A trimmed, non-blank string field. Anything else counts as absent.
pub(crate) fn text_field(item: &Map<String, Value>, key: &str) -> Option<String> {
    item.get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
