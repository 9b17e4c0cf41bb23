use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage, read_api_error,
};

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
/// Runtime configuration for [`OpenAiModel`]. Any endpoint speaking the
/// chat-completions protocol works through `api_base_url`.
pub struct OpenAiModelConfig {
    pub api_key: String,
    pub model: String,
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
}

impl OpenAiModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            max_tokens: Some(4096),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: Client,
    config: OpenAiModelConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Request("OPENAI_API_KEY is not set".to_string()))?;

        Self::new(OpenAiModelConfig::new(api_key, model))
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let request = build_request(messages, tools, tool_choice, &self.config);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(
                read_api_error("openai", response).await,
            ));
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(payload)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RequestMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    type_: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

fn build_request(
    messages: &[ModelMessage],
    tools: &[ModelToolDefinition],
    tool_choice: ModelToolChoice,
    config: &OpenAiModelConfig,
) -> ChatCompletionRequest {
    let request_messages = messages
        .iter()
        .filter_map(|message| match message {
            ModelMessage::System(content) => (!content.is_empty()).then(|| RequestMessage::System {
                content: content.clone(),
            }),
            ModelMessage::User(content) => (!content.is_empty()).then(|| RequestMessage::User {
                content: content.clone(),
            }),
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let content = content.as_ref().filter(|text| !text.is_empty()).cloned();
                if content.is_none() && tool_calls.is_empty() {
                    return None;
                }
                Some(RequestMessage::Assistant {
                    content,
                    tool_calls: tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            type_: function_type(),
                            function: WireFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                })
            }
            ModelMessage::ToolResult {
                tool_call_id,
                content,
                ..
            } => Some(RequestMessage::Tool {
                tool_call_id: tool_call_id.clone(),
                content: content.clone(),
            }),
        })
        .collect();

    let tools_payload = tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect::<Vec<_>>();

    let tool_choice = (!tools_payload.is_empty()).then_some(match tool_choice {
        ModelToolChoice::Auto => "auto",
        ModelToolChoice::Required => "required",
        ModelToolChoice::None => "none",
    });

    ChatCompletionRequest {
        model: config.model.clone(),
        messages: request_messages,
        tools: tools_payload,
        tool_choice,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

fn normalize_response(response: ChatCompletionResponse) -> Result<ModelCompletion, ProviderError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .ok_or_else(|| ProviderError::Response("openai response missing choices".to_string()))?;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            let arguments = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str::<Value>(&call.function.arguments).map_err(|err| {
                    ProviderError::Response(format!(
                        "tool call arguments for '{}' are not valid JSON: {err}",
                        call.function.name
                    ))
                })?
            };
            Ok(ModelToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;

    Ok(ModelCompletion {
        text: message.content.filter(|text| !text.is_empty()),
        tool_calls,
        usage: response.usage.map(|usage| ModelUsage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
        }),
    })
}
