pub mod research;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ResearchError, SchemaError, ToolError};
use crate::llm::ModelToolDefinition;

/// Default cap on a single observation, in characters.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 5000;

/// Every failed observation starts with this marker.
pub const FAILURE_MARKER: &str = "Error";

const TRUNCATION_SUFFIX: &str = "...[truncated]";

type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync;

/// A named retrieval capability with a JSON-schema input.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    display_name: Option<String>,
    description: String,
    json_schema: Value,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
            handler: Arc::new(|_args| {
                Box::pin(async {
                    Err(ToolError::Execution(
                        "tool handler not configured".to_string(),
                    ))
                })
            }),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args| Box::pin(handler(args)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args = self.normalize_arguments(args);
        validate_arguments(self.name(), &self.json_schema, &args)?;
        (self.handler)(args).await
    }

    /// Models sometimes send the bare query instead of an object; bind it
    /// to the first required field.
    fn normalize_arguments(&self, args: Value) -> Value {
        let Value::String(raw) = args else {
            return args;
        };
        let Some(field) = self
            .json_schema
            .get("required")
            .and_then(Value::as_array)
            .and_then(|required| required.first())
            .and_then(Value::as_str)
        else {
            return Value::String(raw);
        };

        let mut object = Map::new();
        object.insert(field.to_string(), Value::String(raw));
        Value::Object(object)
    }
}

/// Outcome of one registry invocation. Always produced, never an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolInvocation {
    pub text: String,
    pub is_error: bool,
}

/// Named tools shared by every research session.
///
/// [`invoke`](Self::invoke) never fails: unknown tools, invalid input and
/// retrieval failures all come back as text starting with
/// [`FAILURE_MARKER`], and successful output is capped at
/// `max_output_chars`.
#[derive(Clone, Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
    max_output_chars: usize,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolSpec>) -> Result<Self, ResearchError> {
        let mut registry = Self::default();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn with_max_output_chars(mut self, max_output_chars: usize) -> Self {
        self.max_output_chars = max_output_chars;
        self
    }

    pub fn register(&mut self, tool: ToolSpec) -> Result<(), ResearchError> {
        if self.index.contains_key(tool.name()) {
            return Err(ResearchError::Config(format!(
                "duplicate tool registered: {}",
                tool.name()
            )));
        }
        self.index.insert(tool.name().to_string(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(ToolSpec::name)
    }

    pub fn definitions(&self) -> Vec<ModelToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ModelToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.json_schema().clone(),
            })
            .collect()
    }

    /// User-facing label for a tool, `🔧 <name>` when nothing better is known.
    pub fn display_name(&self, name: &str) -> String {
        self.index
            .get(name)
            .and_then(|position| self.tools[*position].display_name.clone())
            .unwrap_or_else(|| research::display_name(name))
    }

    pub async fn invoke(&self, name: &str, args: Value) -> ToolInvocation {
        let Some(tool) = self.index.get(name).map(|position| &self.tools[*position]) else {
            warn!(tool = name, "model requested an unknown tool");
            let err = ToolError::NotFound(name.to_string());
            return ToolInvocation {
                text: format!("{FAILURE_MARKER}: {err}"),
                is_error: true,
            };
        };

        match tool.execute(args).await {
            Ok(text) => {
                let is_error = text.starts_with(FAILURE_MARKER);
                debug!(tool = name, chars = text.chars().count(), is_error, "tool finished");
                ToolInvocation {
                    text: truncate_chars(&text, self.max_output_chars),
                    is_error,
                }
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool execution failed");
                ToolInvocation {
                    text: truncate_chars(
                        &format!("{FAILURE_MARKER} executing tool: {err}"),
                        self.max_output_chars,
                    ),
                    is_error: true,
                }
            }
        }
    }
}

/// Cuts `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{TRUNCATION_SUFFIX}", &text[..byte_index]),
        None => text.to_string(),
    }
}

/// Short single-line preview for progress messages.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootTypeMustBeObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required.as_array().ok_or(SchemaError::InvalidRequired)?;
        if required_arr.iter().any(|item| !item.is_string()) {
            return Err(SchemaError::InvalidRequired);
        }
    }

    Ok(())
}

fn validate_arguments(tool_name: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let invalid = |message: String| ToolError::InvalidArguments {
        tool: tool_name.to_string(),
        message,
    };

    let args_obj = args
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for field_name in required.iter().filter_map(Value::as_str) {
        if !args_obj.contains_key(field_name) {
            return Err(invalid(format!("missing required field: {field_name}")));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in args_obj {
        let expected = properties
            .get(key)
            .and_then(|field| field.get("type"))
            .and_then(Value::as_str);
        if let Some(type_name) = expected
            && !value_matches_type(value, type_name)
        {
            return Err(invalid(format!("field '{key}' must be of type {type_name}")));
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.as_f64().is_some(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}
