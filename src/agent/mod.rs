pub mod policy;
pub mod prompts;

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ResearchError;
use crate::llm::{ChatModel, ModelToolChoice, ModelUsage};
use crate::progress::{COLOR_ACTIVITY, COLOR_SUCCESS, Progress, ProgressSink};
use crate::tools::{ToolRegistry, ToolSpec, preview};

pub use policy::{DEGRADED_ANSWER, LoopCounters, Phase, ResearchState, Transition};

const THINKING_PREVIEW_CHARS: usize = 200;
const INPUT_PREVIEW_CHARS: usize = 100;
const RESULT_PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Reasoning steps allowed before synthesis is forced.
    pub max_iterations: u32,
    pub min_tool_calls: u32,
    /// Reminders sent while the minimum is unmet before synthesis is forced.
    pub max_reminders: u32,
    /// Replaces the built-in research prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            min_tool_calls: 3,
            max_reminders: 3,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResearchOutcome {
    pub answer: String,
    /// Reasoning steps taken, excluding the synthesis pass.
    pub steps: u32,
    pub tool_calls: u32,
    /// Set when no assistant text was found and the placeholder was used.
    pub degraded: bool,
    pub usage: ModelUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResearchEvent {
    Started {
        query: String,
    },
    Thinking {
        content: String,
    },
    ToolCall {
        tool: String,
        display_name: String,
        args_json: Value,
        tool_call_id: String,
    },
    ToolResult {
        tool: String,
        result_text: String,
        tool_call_id: String,
        is_error: bool,
    },
    ResearchProgress {
        completed: u32,
        required: u32,
    },
    Reminder {
        completed: u32,
        required: u32,
    },
    Synthesizing {
        steps: u32,
        tool_calls: u32,
    },
    Completed(ResearchOutcome),
}

impl ResearchEvent {
    /// Requester-facing rendering of the event.
    pub fn progress(&self) -> Progress {
        match self {
            ResearchEvent::Started { query } => Progress::rich(
                "🔬 Starting research...",
                "🔬 Research Started",
                format!("**Query**: {query}"),
                COLOR_ACTIVITY,
            ),
            ResearchEvent::Thinking { content } => Progress::text(format!(
                "💭 **Thinking**: {}",
                preview(content, THINKING_PREVIEW_CHARS)
            )),
            ResearchEvent::ToolCall {
                tool,
                display_name,
                args_json,
                ..
            } => Progress::rich(
                format!("{display_name}..."),
                "🔧 Tool Execution",
                format!(
                    "**Tool**: {tool}\n**Input**: {}",
                    preview(&render_input(args_json), INPUT_PREVIEW_CHARS)
                ),
                COLOR_ACTIVITY,
            ),
            ResearchEvent::ToolResult { result_text, .. } => Progress::text(format!(
                "📊 **Result**: {}",
                preview(result_text, RESULT_PREVIEW_CHARS)
            )),
            ResearchEvent::ResearchProgress {
                completed,
                required,
            } => Progress::text(format!(
                "📈 Research progress: {completed}/{required} tool calls"
            )),
            ResearchEvent::Reminder {
                completed,
                required,
            } => Progress::text(format!(
                "🔁 Only {completed}/{required} tool calls so far, asking for more research"
            )),
            ResearchEvent::Synthesizing { steps, tool_calls } => Progress::rich(
                "🧠 Synthesizing findings...",
                "🧠 Finalizing Research",
                format!("Completed {tool_calls} tool calls in {steps} steps"),
                COLOR_SUCCESS,
            ),
            ResearchEvent::Completed(outcome) => Progress::rich(
                "✅ Research complete",
                "✅ Research Complete",
                format!(
                    "Finished in {} steps with {} tool calls",
                    outcome.steps, outcome.tool_calls
                ),
                COLOR_SUCCESS,
            )
            .into_final(),
        }
    }
}

fn render_input(args: &Value) -> String {
    match args {
        Value::String(text) => text.clone(),
        Value::Object(map) if map.len() == 1 => match map.values().next() {
            Some(Value::String(text)) => text.clone(),
            _ => args.to_string(),
        },
        _ => args.to_string(),
    }
}

#[derive(Default)]
pub struct ResearchAgentBuilder {
    model: Option<Arc<dyn ChatModel>>,
    tools: Vec<ToolSpec>,
    registry: Option<ToolRegistry>,
    config: AgentConfig,
}

impl ResearchAgentBuilder {
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Starts from an existing registry; tools added with
    /// [`tool`](Self::tool) are registered on top of it.
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn min_tool_calls(mut self, min_tool_calls: u32) -> Self {
        self.config.min_tool_calls = min_tool_calls;
        self
    }

    pub fn max_reminders(mut self, max_reminders: u32) -> Self {
        self.config.max_reminders = max_reminders;
        self
    }

    pub fn build(self) -> Result<ResearchAgent, ResearchError> {
        let Some(model) = self.model else {
            return Err(ResearchError::Config(
                "research model must be configured via ResearchAgentBuilder::model(...)"
                    .to_string(),
            ));
        };
        if self.config.max_iterations == 0 {
            return Err(ResearchError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let mut registry = self.registry.unwrap_or_default();
        for tool in self.tools {
            registry.register(tool)?;
        }

        info!(
            tools = registry.len(),
            max_iterations = self.config.max_iterations,
            min_tool_calls = self.config.min_tool_calls,
            "research agent ready"
        );

        Ok(ResearchAgent {
            model,
            tools: registry,
            config: self.config,
        })
    }
}

/// Runs research sessions. Holds no per-session state, so one instance
/// can serve many concurrent sessions.
pub struct ResearchAgent {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl ResearchAgent {
    pub fn builder() -> ResearchAgentBuilder {
        ResearchAgentBuilder::default()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Runs one session to completion, forwarding every event to `sink`.
    pub async fn research(
        &self,
        query: impl Into<String>,
        sink: &dyn ProgressSink,
    ) -> Result<ResearchOutcome, ResearchError> {
        let stream = self.research_stream(query);
        futures_util::pin_mut!(stream);

        let mut outcome = None;
        while let Some(event) = stream.next().await {
            let event = event?;
            sink.notify(event.progress()).await;
            if let ResearchEvent::Completed(done) = event {
                outcome = Some(done);
            }
        }

        outcome.ok_or(ResearchError::MissingOutcome)
    }

    pub fn research_stream(
        &self,
        query: impl Into<String>,
    ) -> impl Stream<Item = Result<ResearchEvent, ResearchError>> + '_ {
        let query = query.into();

        try_stream! {
            let config = &self.config;
            info!(query = %query, "research started");
            yield ResearchEvent::Started { query: query.clone() };

            let mut state = ResearchState::new(self.system_prompt(), query);
            let tool_definitions = self.tools.definitions();
            let tool_choice = if tool_definitions.is_empty() {
                ModelToolChoice::None
            } else {
                ModelToolChoice::Auto
            };

            loop {
                match state.phase {
                    Phase::Reasoning => {
                        let completion = self
                            .model
                            .invoke(&state.transcript, &tool_definitions, tool_choice.clone())
                            .await?;
                        state.record_step(&completion);
                        debug!(
                            step = state.counters.step_count,
                            tool_calls_requested = completion.tool_calls.len(),
                            input_tokens = completion.usage.map(|usage| usage.input_tokens),
                            output_tokens = completion.usage.map(|usage| usage.output_tokens),
                            "reasoning step"
                        );

                        if let Some(text) = completion.text.as_deref() {
                            if !text.trim().is_empty() {
                                yield ResearchEvent::Thinking {
                                    content: text.to_string(),
                                };
                            }
                        }

                        let transition = policy::next_transition(
                            &state.counters,
                            config,
                            !completion.tool_calls.is_empty(),
                        );
                        info!(
                            step = state.counters.step_count,
                            tool_calls = state.counters.tool_call_count,
                            ?transition,
                            "policy decision"
                        );

                        match transition {
                            Transition::Remind => {
                                state.remind(config.min_tool_calls);
                                yield ResearchEvent::Reminder {
                                    completed: state.counters.tool_call_count,
                                    required: config.min_tool_calls,
                                };
                            }
                            Transition::Synthesize => {
                                let skipped = state.skip_pending_tool_calls();
                                if skipped > 0 {
                                    warn!(skipped, "iteration limit reached with tool calls pending");
                                }
                            }
                            Transition::Act | Transition::End => {}
                        }
                        state.phase = transition.next_phase();
                    }
                    Phase::Acting => {
                        let calls = state.pending_tool_calls();
                        for call in &calls {
                            yield ResearchEvent::ToolCall {
                                tool: call.name.clone(),
                                display_name: self.tools.display_name(&call.name),
                                args_json: call.arguments.clone(),
                                tool_call_id: call.id.clone(),
                            };

                            let invocation = self.tools.invoke(&call.name, call.arguments.clone()).await;
                            state.record_tool_result(call, &invocation);
                            debug!(
                                tool = %call.name,
                                is_error = invocation.is_error,
                                result = %preview(&invocation.text, RESULT_PREVIEW_CHARS),
                                "tool observation recorded"
                            );

                            yield ResearchEvent::ToolResult {
                                tool: call.name.clone(),
                                result_text: invocation.text,
                                tool_call_id: call.id.clone(),
                                is_error: invocation.is_error,
                            };
                        }

                        state.counters.tool_call_count += calls.len() as u32;
                        if state.counters.tool_call_count < config.min_tool_calls {
                            yield ResearchEvent::ResearchProgress {
                                completed: state.counters.tool_call_count,
                                required: config.min_tool_calls,
                            };
                        }
                        state.phase = Phase::Reasoning;
                    }
                    Phase::Synthesizing => {
                        info!(
                            steps = state.counters.step_count,
                            tool_calls = state.counters.tool_call_count,
                            "synthesizing final answer"
                        );
                        yield ResearchEvent::Synthesizing {
                            steps: state.counters.step_count,
                            tool_calls: state.counters.tool_call_count,
                        };

                        let completion = self
                            .model
                            .invoke(&state.transcript, &tool_definitions, ModelToolChoice::None)
                            .await?;
                        if !completion.tool_calls.is_empty() {
                            warn!(
                                requested = completion.tool_calls.len(),
                                "ignoring tool calls requested during synthesis"
                            );
                        }
                        state.record_synthesis(&completion);
                        state.phase = Phase::Done;
                    }
                    Phase::Done => break,
                }
            }

            let (answer, degraded) = state.answer();
            if degraded {
                warn!(steps = state.counters.step_count, "no final answer text produced");
            }
            info!(
                steps = state.counters.step_count,
                tool_calls = state.counters.tool_call_count,
                input_tokens = state.usage.input_tokens,
                output_tokens = state.usage.output_tokens,
                degraded,
                "research complete"
            );

            yield ResearchEvent::Completed(ResearchOutcome {
                answer,
                steps: state.counters.step_count,
                tool_calls: state.counters.tool_call_count,
                degraded,
                usage: state.usage,
            });
        }
    }

    fn system_prompt(&self) -> String {
        let base = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(prompts::RESEARCH_SYSTEM_PROMPT);
        prompts::system_prompt(base, self.tools.names(), self.config.min_tool_calls)
    }
}

#[cfg(test)]
mod tests;
