//! Static configuration: endpoint, run defaults, and the demo catalog.
//!
//! Read from TOML, or from JSON when the file ends in `.json`. JSON keys may
//! use camelCase (`architectPrompt`, `maxAgents`, `baseUrl`, `apiKey`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::Endpoint;
use crate::data::DataEntry;
use crate::error::RelayError;
use crate::plan::{FALLBACK_MAX_AGENTS, clamp_max_agents};
use crate::runner::RunSettings;

pub const DEFAULT_MODEL: &str = "gpt-5-mini";
const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub endpoint: EndpointConfig,
    pub defaults: Defaults,
    pub demos: Vec<Demo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(alias = "connectTimeoutSecs")]
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            connect_timeout_secs: 10,
        }
    }
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub model: String,
    #[serde(alias = "architectPrompt")]
    pub architect_prompt: String,
    #[serde(alias = "agentStyle")]
    pub agent_style: String,
    #[serde(alias = "maxAgents")]
    pub max_agents: i64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            architect_prompt: String::new(),
            agent_style: String::new(),
            max_agents: 4,
        }
    }
}

impl Defaults {
    /// The agent bound, clamped to 2..=6. Zero means unset.
    pub fn max_agents(&self) -> usize {
        if self.max_agents == 0 {
            FALLBACK_MAX_AGENTS
        } else {
            clamp_max_agents(self.max_agents)
        }
    }

    pub fn model(&self) -> &str {
        match self.model.trim() {
            "" => DEFAULT_MODEL,
            model => model,
        }
    }
}

/// A catalog entry: a ready-made problem with its built-in inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Demo {
    pub icon: String,
    pub title: String,
    pub body: String,
    pub problem: String,
    pub inputs: Vec<DataEntry>,
}

/// The problem a pipeline works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub title: String,
    pub body: String,
    pub statement: String,
    pub inputs: Vec<DataEntry>,
}

impl Problem {
    pub fn from_demo(demo: &Demo) -> Self {
        Self {
            title: demo.title.clone(),
            body: demo.body.clone(),
            statement: demo.problem.clone(),
            inputs: demo.inputs.clone(),
        }
    }

    /// A user-written problem without built-in inputs.
    pub fn custom(statement: &str) -> Result<Self, RelayError> {
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(RelayError::validation(
                "Enter a custom problem statement before running.",
            ));
        }
        Ok(Self {
            title: "Custom Problem".into(),
            body: "User-supplied brief".into(),
            statement: statement.to_string(),
            inputs: Vec::new(),
        })
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("failed to read {}: {e}", path.display()))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config: RelayConfig = if is_json {
            serde_json::from_str(&text).map_err(|e| {
                RelayError::config(format!("invalid config {}: {e}", path.display()))
            })?
        } else {
            toml::from_str(&text).map_err(|e| {
                RelayError::config(format!("invalid config {}: {e}", path.display()))
            })?
        };

        tracing::debug!(
            path = %path.display(),
            demos = config.demos.len(),
            "loaded relay config"
        );
        Ok(config)
    }

    /// Override credentials from the environment.
    pub fn with_env(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override `base_url` and `api_key` from `OPENAI_BASE_URL` and
    /// `OPENAI_API_KEY` when `lookup` returns a non-blank value.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(base_url) = non_blank(BASE_URL_ENV) {
            self.endpoint.base_url = base_url;
        }
        if let Some(api_key) = non_blank(API_KEY_ENV) {
            self.endpoint.api_key = api_key;
        }
        self
    }

    pub fn demo(&self, index: usize) -> Option<&Demo> {
        self.demos.get(index)
    }

    pub fn settings(&self) -> RunSettings {
        RunSettings {
            endpoint: Endpoint::new(
                self.endpoint.base_url.trim(),
                self.endpoint.api_key.trim(),
            ),
            model: self.defaults.model().to_string(),
            architect_prompt: self.defaults.architect_prompt.trim().to_string(),
            agent_style: self.defaults.agent_style.trim().to_string(),
            max_agents: self.defaults.max_agents(),
        }
    }
}
