//! Bounded ReACT research agent.
//!
//! - `ResearchAgent` alternates model turns and tool calls until a minimum
//!   amount of research is done, then asks the model for a final answer
//! - `research` and `research_stream` entry points
//! - Research tools (Tavily, DuckDuckGo, Wikipedia, web scraper) behind a
//!   never-failing `ToolRegistry`
//! - `ResearchService` with one session per requester and batched progress
//! - Gemini and OpenAI-compatible adapters via `model_from_settings`

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod progress;
pub mod service;
pub mod session;
pub mod tools;

pub use agent::{
    AgentConfig, ResearchAgent, ResearchAgentBuilder, ResearchEvent, ResearchOutcome,
};
pub use config::ResearchConfig;
pub use error::{
    ConfigError, DeliveryError, ProviderError, ResearchError, SchemaError, ToolError,
};
pub use llm::{
    ChatModel, GeminiModel, GeminiModelConfig, ModelCompletion, ModelMessage, ModelToolCall,
    ModelToolChoice, ModelToolDefinition, ModelUsage, OpenAiModel, OpenAiModelConfig,
    model_from_settings,
};
pub use progress::{
    ChannelSink, NoopSink, Progress, ProgressBatch, ProgressDelivery, ProgressEmbed, ProgressSink,
};
pub use service::ResearchService;
pub use session::{SessionGuard, SessionRegistry};
pub use tools::{ToolInvocation, ToolRegistry, ToolSpec};
