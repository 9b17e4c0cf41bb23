//! Configuration loading for the research agent.
//!
//! Settings come from an optional TOML file with every field defaulted,
//! then environment variables override the deployment-specific parts
//! (provider, model, credentials, iteration limits).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::error::ConfigError;

/// Root configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub tools: ToolSettings,
    pub progress: ProgressSettings,
    pub session: SessionSettings,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    #[serde(alias = "gemini")]
    Google,
    OpenAi,
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelProvider::Google => f.write_str("google"),
            ModelProvider::OpenAi => f.write_str("openai"),
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(ModelProvider::Google),
            "openai" => Ok(ModelProvider::OpenAi),
            other => Err(ConfigError::Invalid(format!(
                "unsupported llm provider: {other}. Use 'openai' or 'google'"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: ModelProvider,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Google,
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            api_base_url: None,
            temperature: 0.1,
            max_output_tokens: 4096,
            request_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_base_url", &self.api_base_url)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub min_tool_calls: u32,
    pub max_reminders: u32,
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let defaults = AgentConfig::default();
        Self {
            max_iterations: 15,
            min_tool_calls: defaults.min_tool_calls,
            max_reminders: defaults.max_reminders,
            system_prompt: None,
        }
    }
}

impl AgentSettings {
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.max_iterations,
            min_tool_calls: self.min_tool_calls,
            max_reminders: self.max_reminders,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Tavily is only registered when this is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,
    pub tavily_api_url: String,
    pub duckduckgo_api_url: String,
    pub wikipedia_api_url: String,
    pub wikipedia_top_k: usize,
    pub wikipedia_max_chars: usize,
    pub max_output_chars: usize,
    pub request_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            tavily_api_url: "https://api.tavily.com/search".to_string(),
            duckduckgo_api_url: "https://api.duckduckgo.com/".to_string(),
            wikipedia_api_url: "https://en.wikipedia.org/w/api.php".to_string(),
            wikipedia_top_k: 3,
            wikipedia_max_chars: 4000,
            max_output_chars: crate::tools::DEFAULT_MAX_OUTPUT_CHARS,
            request_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for ToolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSettings")
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("tavily_api_url", &self.tavily_api_url)
            .field("duckduckgo_api_url", &self.duckduckgo_api_url)
            .field("wikipedia_api_url", &self.wikipedia_api_url)
            .field("wikipedia_top_k", &self.wikipedia_top_k)
            .field("wikipedia_max_chars", &self.wikipedia_max_chars)
            .field("max_output_chars", &self.max_output_chars)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    /// Minimum spacing between two text deliveries.
    pub min_interval_ms: u64,
    /// Capacity of the loop → delivery channel.
    pub buffer: usize,
    /// How long a finished session waits for pending deliveries before
    /// the pump is aborted.
    pub drain_grace_ms: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 2000,
            buffer: 64,
            drain_grace_ms: 5000,
        }
    }
}

impl ProgressSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Wall-clock limit for one research session; unlimited when unset.
    pub timeout_secs: Option<u64>,
}

impl SessionSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl ResearchConfig {
    /// Parses a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ResearchConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let mut config: ResearchConfig = toml::from_str(&source)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded research config");
        Ok(config)
    }

    /// Defaults plus environment overrides, for deployments without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ResearchConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(provider) = non_empty("LLM_PROVIDER") {
            self.model.provider = provider.parse()?;
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = non_empty("LLM_BASE_URL") {
            self.model.api_base_url = Some(url);
        }

        let key = match self.model.provider {
            ModelProvider::Google => {
                non_empty("GOOGLE_API_KEY").or_else(|| non_empty("GEMINI_API_KEY"))
            }
            ModelProvider::OpenAi => non_empty("OPENAI_API_KEY"),
        };
        if key.is_some() {
            self.model.api_key = key;
        }

        if let Some(key) = non_empty("TAVILY_API_KEY") {
            self.tools.tavily_api_key = Some(key);
        }
        if let Some(value) = non_empty("RESEARCH_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_number("RESEARCH_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = non_empty("RESEARCH_MIN_TOOL_CALLS") {
            self.agent.min_tool_calls = parse_number("RESEARCH_MIN_TOOL_CALLS", &value)?;
        }
        if let Some(value) = non_empty("RESEARCH_TIMEOUT_SECS") {
            self.session.timeout_secs = Some(parse_number("RESEARCH_TIMEOUT_SECS", &value)?);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.agent.min_tool_calls > self.agent.max_iterations {
            return Err(ConfigError::Invalid(format!(
                "agent.min_tool_calls ({}) cannot exceed agent.max_iterations ({})",
                self.agent.min_tool_calls, self.agent.max_iterations
            )));
        }
        if self.progress.min_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "progress.min_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.progress.buffer == 0 {
            return Err(ConfigError::Invalid(
                "progress.buffer must be at least 1".to_string(),
            ));
        }
        if self.tools.max_output_chars == 0 {
            return Err(ConfigError::Invalid(
                "tools.max_output_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{key} must be a non-negative integer, got '{value}'"
            ))
        })
}
