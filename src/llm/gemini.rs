use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage, join_parts, read_api_error,
};

const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
/// Runtime configuration for [`GeminiModel`].
pub struct GeminiModelConfig {
    pub api_key: String,
    /// Model id (for example `gemini-2.5-flash`).
    pub model: String,
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Upper bound for a single `generateContent` round trip.
    pub request_timeout: Duration,
}

impl GeminiModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            max_output_tokens: Some(4096),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
/// Google Gemini adapter implementing [`ChatModel`].
pub struct GeminiModel {
    client: Client,
    config: GeminiModelConfig,
}

impl GeminiModel {
    pub fn new(config: GeminiModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Creates an adapter using `GOOGLE_API_KEY` (or `GEMINI_API_KEY`).
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                ProviderError::Request("GOOGLE_API_KEY (or GEMINI_API_KEY) is not set".to_string())
            })?;

        Self::new(GeminiModelConfig::new(api_key, model))
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/models/{}:generateContent", self.config.model)
    }
}

#[async_trait]
impl ChatModel for GeminiModel {
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
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(
                read_api_error("gemini", response).await,
            ));
        }

        let payload = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(payload)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<Value>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    thoughts_token_count: Option<u32>,
}

fn build_request(
    messages: &[ModelMessage],
    tools: &[ModelToolDefinition],
    tool_choice: ModelToolChoice,
    config: &GeminiModelConfig,
) -> GenerateContentRequest {
    let mut system_lines = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(text) if !text.is_empty() => system_lines.push(text.clone()),
            ModelMessage::User(text) if !text.is_empty() => contents.push(Content {
                role: "user".to_string(),
                parts: vec![Part::text(text.clone())],
            }),
            ModelMessage::System(_) | ModelMessage::User(_) => {}
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::new();
                if let Some(text) = content
                    && !text.is_empty()
                {
                    parts.push(Part::text(text.clone()));
                }
                parts.extend(tool_calls.iter().map(|call| Part {
                    function_call: Some(FunctionCall {
                        id: Some(call.id.clone()),
                        name: Some(call.name.clone()),
                        args: Some(call.arguments.clone()),
                    }),
                    ..Part::default()
                }));
                if !parts.is_empty() {
                    contents.push(Content {
                        role: "model".to_string(),
                        parts,
                    });
                }
            }
            ModelMessage::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => {
                let response = if *is_error {
                    json!({ "error": content })
                } else {
                    json!({ "result": content })
                };
                contents.push(Content {
                    role: "user".to_string(),
                    parts: vec![Part {
                        function_response: Some(FunctionResponse {
                            name: tool_name.clone(),
                            response,
                        }),
                        ..Part::default()
                    }],
                });
            }
        }
    }

    let (tools_payload, tool_config) = if tools.is_empty() {
        (Vec::new(), None)
    } else {
        let declarations = tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: strip_unsupported_keys(tool.parameters.clone()),
            })
            .collect();
        let mode = match tool_choice {
            ModelToolChoice::Auto => "AUTO",
            ModelToolChoice::Required => "ANY",
            ModelToolChoice::None => "NONE",
        };
        (
            vec![ToolDeclarations {
                function_declarations: declarations,
            }],
            Some(json!({ "functionCallingConfig": { "mode": mode } })),
        )
    };

    GenerateContentRequest {
        contents,
        system_instruction: (!system_lines.is_empty()).then(|| Content {
            role: String::new(),
            parts: vec![Part::text(system_lines.join("\n\n"))],
        }),
        tools: tools_payload,
        tool_config,
        generation_config: GenerationConfig {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        },
    }
}

/// Gemini rejects JSON-schema keywords it does not model.
fn strip_unsupported_keys(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| key != "additionalProperties" && key != "$schema")
                .map(|(key, value)| (key, strip_unsupported_keys(value)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_unsupported_keys).collect())
        }
        other => other,
    }
}

fn normalize_response(response: GenerateContentResponse) -> Result<ModelCompletion, ProviderError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ProviderError::Response(
            "gemini response missing candidates".to_string(),
        ));
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for (index, part) in candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .enumerate()
    {
        if let Some(text) = part.text
            && !part.thought.unwrap_or(false)
        {
            text_parts.push(text);
        }

        if let Some(call) = part.function_call {
            let Some(name) = call.name else {
                return Err(ProviderError::Response(
                    "gemini functionCall missing name".to_string(),
                ));
            };
            tool_calls.push(ModelToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{}", index + 1)),
                name,
                arguments: call.args.unwrap_or_else(|| json!({})),
            });
        }
    }

    let usage = response.usage_metadata.map(|usage| ModelUsage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage
            .candidates_token_count
            .unwrap_or(0)
            .saturating_add(usage.thoughts_token_count.unwrap_or(0)),
    });

    Ok(ModelCompletion {
        text: join_parts(text_parts).filter(|text| !text.is_empty()),
        tool_calls,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn search_tool() -> ModelToolDefinition {
        ModelToolDefinition {
            name: "wikipedia".to_string(),
            description: "Look up an encyclopedia article".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    #[test]
    fn build_request_folds_system_messages_and_maps_tool_results() {
        let messages = vec![
            ModelMessage::System("be thorough".to_string()),
            ModelMessage::User("history of rust".to_string()),
            ModelMessage::Assistant {
                content: None,
                tool_calls: vec![ModelToolCall {
                    id: "call_1".to_string(),
                    name: "wikipedia".to_string(),
                    arguments: json!({"query": "Rust (programming language)"}),
                }],
            },
            ModelMessage::ToolResult {
                tool_call_id: "call_1".to_string(),
                tool_name: "wikipedia".to_string(),
                content: "Error: Request timed out".to_string(),
                is_error: true,
            },
            ModelMessage::System("keep researching".to_string()),
        ];

        let request = build_request(
            &messages,
            &[search_tool()],
            ModelToolChoice::None,
            &GeminiModelConfig::new("key", "gemini-2.5-flash"),
        );
        let value = serde_json::to_value(request).expect("serializes");

        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "be thorough\n\nkeep researching"
        );
        assert_eq!(value["contents"].as_array().map(Vec::len), Some(3));
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(
            value["contents"][1]["parts"][0]["functionCall"]["name"],
            "wikipedia"
        );
        assert_eq!(
            value["contents"][2]["parts"][0]["functionResponse"]["response"]["error"],
            "Error: Request timed out"
        );
        assert_eq!(value["toolConfig"]["functionCallingConfig"]["mode"], "NONE");
        assert!(
            value["tools"][0]["functionDeclarations"][0]["parameters"]
                .get("additionalProperties")
                .is_none()
        );
    }

    #[test]
    fn normalize_response_skips_thoughts_and_numbers_missing_call_ids() {
        let payload: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "internal plan", "thought": true},
                        {"text": "Searching first."},
                        {"functionCall": {"name": "wikipedia", "args": {"query": "rust"}}}
                    ]
                }
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5, "thoughtsTokenCount": 2}
        }))
        .expect("valid payload");

        let completion = normalize_response(payload).expect("normalizes");
        assert_eq!(completion.text.as_deref(), Some("Searching first."));
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].id, "call_3");
        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 12,
                output_tokens: 7,
            })
        );
    }

    #[test]
    fn normalize_response_requires_candidates() {
        let err = normalize_response(GenerateContentResponse {
            candidates: Vec::new(),
            usage_metadata: None,
        })
        .expect_err("should fail");
        assert!(matches!(err, ProviderError::Response(message) if message.contains("candidates")));
    }
}
