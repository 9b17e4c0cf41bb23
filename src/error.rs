use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

/// Failures raised inside a tool handler. These never leave
/// [`ToolRegistry::invoke`](crate::tools::ToolRegistry::invoke); they are
/// rendered into the observation text instead.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    NotFound(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
}

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("requester {requester_id} already has an active research session")]
    Busy { requester_id: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("research session cancelled")]
    Cancelled,
    #[error("research session timed out after {}s", after.as_secs())]
    TimedOut { after: Duration },
    #[error("research configuration error: {0}")]
    Config(String),
    #[error("research stream ended without an outcome")]
    MissingOutcome,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ResearchError {
    fn from(err: ConfigError) -> Self {
        ResearchError::Config(err.to_string())
    }
}

#[derive(Debug, Error)]
#[error("progress delivery failed: {0}")]
pub struct DeliveryError(pub String);
