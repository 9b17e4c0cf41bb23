mod gemini;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ModelProvider, ModelSettings};
use crate::error::ProviderError;

pub use gemini::{GeminiModel, GeminiModelConfig};
pub use openai::{OpenAiModel, OpenAiModelConfig};

/// One entry of the research transcript.
///
/// The transcript is append-only: every `ToolResult` follows the
/// `Assistant` message whose `tool_calls` requested it.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ModelToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

impl ModelMessage {
    /// Free text of an assistant turn, if it carries any non-blank text.
    pub fn assistant_text(&self) -> Option<&str> {
        match self {
            ModelMessage::Assistant {
                content: Some(text),
                ..
            } if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug)]
pub struct ModelToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelToolChoice {
    Auto,
    Required,
    None,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelCompletion {
    pub text: Option<String>,
    pub tool_calls: Vec<ModelToolCall>,
    pub usage: Option<ModelUsage>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ModelUsage {
    pub fn accumulate(&mut self, other: ModelUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// A language model that turns a transcript into the next assistant turn.
///
/// Implementations must be reentrant: one instance is shared by every
/// concurrent research session.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError>;
}

/// Builds the configured provider adapter.
pub fn model_from_settings(settings: &ModelSettings) -> Result<Arc<dyn ChatModel>, ProviderError> {
    let api_key = settings.api_key.clone().ok_or_else(|| {
        ProviderError::Request(format!(
            "no api key configured for provider {}",
            settings.provider
        ))
    })?;
    let timeout = Duration::from_secs(settings.request_timeout_secs);

    match settings.provider {
        ModelProvider::Google => {
            let mut config = GeminiModelConfig::new(api_key, settings.model.clone());
            config.api_base_url = settings.api_base_url.clone();
            config.temperature = Some(settings.temperature);
            config.max_output_tokens = Some(settings.max_output_tokens);
            config.request_timeout = timeout;
            Ok(Arc::new(GeminiModel::new(config)?))
        }
        ModelProvider::OpenAi => {
            let mut config = OpenAiModelConfig::new(api_key, settings.model.clone());
            config.api_base_url = settings.api_base_url.clone();
            config.temperature = Some(settings.temperature);
            config.max_tokens = Some(settings.max_output_tokens);
            config.request_timeout = timeout;
            Ok(Arc::new(OpenAiModel::new(config)?))
        }
    }
}

pub(crate) fn join_parts(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

pub(crate) async fn read_api_error(provider: &str, response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<Value>(&body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match message {
        Some(message) => format!("{provider} api error ({status}): {message}"),
        None if body.is_empty() => format!("{provider} api request failed ({status})"),
        None => format!("{provider} api request failed ({status}): {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_skips_blank_and_tool_only_turns() {
        let blank = ModelMessage::Assistant {
            content: Some("   ".to_string()),
            tool_calls: vec![],
        };
        let tool_only = ModelMessage::Assistant {
            content: None,
            tool_calls: vec![ModelToolCall {
                id: "c1".to_string(),
                name: "wikipedia".to_string(),
                arguments: serde_json::json!({"query": "rust"}),
            }],
        };
        let answer = ModelMessage::Assistant {
            content: Some("Rust is a language".to_string()),
            tool_calls: vec![],
        };

        assert_eq!(blank.assistant_text(), None);
        assert_eq!(tool_only.assistant_text(), None);
        assert_eq!(answer.assistant_text(), Some("Rust is a language"));
        assert_eq!(ModelMessage::User("hi".to_string()).assistant_text(), None);
    }

    #[test]
    fn model_from_settings_requires_api_key() {
        let settings = ModelSettings::default();
        let err = model_from_settings(&settings).err().expect("must fail");
        assert!(err.to_string().contains("no api key"));
    }
}
