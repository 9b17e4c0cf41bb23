use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

use super::*;
use crate::error::{ProviderError, ToolError};
use crate::llm::{ModelCompletion, ModelMessage, ModelToolCall, ModelToolDefinition};

type Invocation = (Vec<ModelMessage>, ModelToolChoice);

#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelCompletion, ProviderError>>>,
    seen: Mutex<Vec<Invocation>>,
}

impl ScriptedModel {
    fn with_responses(responses: Vec<Result<ModelCompletion, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from(responses)),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Invocation> {
        self.seen.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        _tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push((messages.to_vec(), tool_choice));
        let mut guard = self.responses.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Response(
                "no more mock model responses".to_string(),
            ))
        })
    }
}

/// Requests one search on every reasoning step and only answers when tools
/// are switched off.
#[derive(Default)]
struct NeverSatisfiedModel {
    steps: AtomicU32,
    seen: Mutex<Vec<Invocation>>,
}

#[async_trait]
impl ChatModel for NeverSatisfiedModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        _tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push((messages.to_vec(), tool_choice.clone()));
        if tool_choice == ModelToolChoice::None {
            return Ok(text_completion("summary of everything"));
        }
        let step = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ModelCompletion {
            text: None,
            tool_calls: vec![call(&format!("call_{step}"), "wikipedia", "more")],
            usage: None,
        })
    }
}

fn search_tool() -> ToolSpec {
    ToolSpec::new("wikipedia", "look up a topic")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        }))
        .expect("valid schema")
        .with_handler(|args| async move {
            let query = args
                .get("query")
                .and_then(|value| value.as_str())
                .ok_or_else(|| ToolError::Execution("query missing".to_string()))?;
            Ok(format!("Page: {query}\nSummary: facts about {query}"))
        })
}

fn failing_tool() -> ToolSpec {
    ToolSpec::new("web_scraper", "fetch a page")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"}
            },
            "required": ["url"]
        }))
        .expect("valid schema")
        .with_handler(|_args| async move {
            Err(ToolError::Execution("connection reset".to_string()))
        })
}

fn call(id: &str, name: &str, query: &str) -> ModelToolCall {
    ModelToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: json!({"query": query}),
    }
}

fn tool_turn(calls: Vec<ModelToolCall>) -> Result<ModelCompletion, ProviderError> {
    Ok(ModelCompletion {
        text: None,
        tool_calls: calls,
        usage: None,
    })
}

fn text_completion(text: &str) -> ModelCompletion {
    ModelCompletion {
        text: Some(text.to_string()),
        ..ModelCompletion::default()
    }
}

fn text_turn(text: &str) -> Result<ModelCompletion, ProviderError> {
    Ok(text_completion(text))
}

fn agent_with(model: Arc<dyn ChatModel>, config: AgentConfig) -> ResearchAgent {
    ResearchAgent::builder()
        .shared_model(model)
        .tool(search_tool())
        .tool(failing_tool())
        .config(config)
        .build()
        .expect("agent builds")
}

fn config(max_iterations: u32, min_tool_calls: u32) -> AgentConfig {
    AgentConfig {
        max_iterations,
        min_tool_calls,
        ..AgentConfig::default()
    }
}

async fn run_events(
    agent: &ResearchAgent,
    query: &str,
) -> Result<Vec<ResearchEvent>, ResearchError> {
    agent
        .research_stream(query)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect()
}

fn outcome_of(events: &[ResearchEvent]) -> &ResearchOutcome {
    match events.last() {
        Some(ResearchEvent::Completed(outcome)) => outcome,
        other => panic!("expected completion, got {other:?}"),
    }
}

fn tool_result_ids(messages: &[ModelMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match message {
            ModelMessage::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
            _ => None,
        })
        .collect()
}

fn requested_ids(messages: &[ModelMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match message {
            ModelMessage::Assistant { tool_calls, .. } => Some(tool_calls),
            _ => None,
        })
        .flatten()
        .map(|call| call.id.clone())
        .collect()
}

#[tokio::test]
async fn synthesizes_once_minimum_is_met_and_model_stops_calling_tools() {
    let model = ScriptedModel::with_responses(vec![
        tool_turn(vec![call("c1", "wikipedia", "rust")]),
        tool_turn(vec![call("c2", "wikipedia", "ownership")]),
        tool_turn(vec![call("c3", "wikipedia", "borrowing")]),
        text_turn("I have enough material."),
        text_turn("Rust guarantees memory safety without a garbage collector."),
    ]);
    let agent = agent_with(model.clone(), config(25, 3));

    let events = run_events(&agent, "What is Rust?").await.expect("research succeeds");
    let outcome = outcome_of(&events);

    assert_eq!(
        outcome.answer,
        "Rust guarantees memory safety without a garbage collector."
    );
    assert_eq!(outcome.steps, 4);
    assert_eq!(outcome.tool_calls, 3);
    assert!(!outcome.degraded);

    let progress = events
        .iter()
        .filter_map(|event| match event {
            ResearchEvent::ResearchProgress {
                completed,
                required,
            } => Some((*completed, *required)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(progress, vec![(1, 3), (2, 3)]);
    assert!(events
        .iter()
        .any(|event| matches!(event, ResearchEvent::Synthesizing { steps: 4, tool_calls: 3 })));

    let seen = model.seen();
    assert_eq!(seen.len(), 5);
    assert!(seen[..4].iter().all(|(_, choice)| *choice == ModelToolChoice::Auto));
    assert_eq!(seen[4].1, ModelToolChoice::None);
}

#[tokio::test]
async fn iteration_cap_forces_synthesis_with_a_tool_hungry_model() {
    let model = Arc::new(NeverSatisfiedModel::default());
    let agent = agent_with(model.clone(), config(5, 3));

    let events = run_events(&agent, "endless").await.expect("research succeeds");
    let outcome = outcome_of(&events);

    assert_eq!(outcome.steps, 5);
    assert_eq!(outcome.tool_calls, 4);
    assert_eq!(outcome.answer, "summary of everything");

    let seen = model.seen.lock().expect("lock poisoned").clone();
    assert_eq!(seen.len(), 6);
    let (synthesis_transcript, choice) = &seen[5];
    assert_eq!(*choice, ModelToolChoice::None);
    assert_eq!(
        requested_ids(synthesis_transcript),
        tool_result_ids(synthesis_transcript)
    );
    let tool_results = events
        .iter()
        .filter(|event| matches!(event, ResearchEvent::ToolResult { .. }))
        .count();
    assert_eq!(tool_results, 4);
}

#[tokio::test]
async fn silent_model_terminates_with_placeholder() {
    let model = ScriptedModel::with_responses(
        (0..10).map(|_| Ok(ModelCompletion::default())).collect(),
    );
    let agent = agent_with(model.clone(), config(25, 3));

    let events = run_events(&agent, "anything").await.expect("research succeeds");
    let outcome = outcome_of(&events);

    assert!(outcome.degraded);
    assert_eq!(outcome.answer, DEGRADED_ANSWER);
    assert_eq!(outcome.tool_calls, 0);
    assert_eq!(outcome.steps, 4);

    let reminders = events
        .iter()
        .filter(|event| matches!(event, ResearchEvent::Reminder { .. }))
        .count();
    assert_eq!(reminders, 3);
    assert_eq!(model.seen().len(), 5);
}

#[tokio::test]
async fn every_tool_call_is_answered_in_order_before_next_step() {
    let model = ScriptedModel::with_responses(vec![
        tool_turn(vec![
            call("a", "wikipedia", "first"),
            call("b", "wikipedia", "second"),
        ]),
        text_turn("Both lookups agree."),
    ]);
    let agent = agent_with(model.clone(), config(25, 2));

    let events = run_events(&agent, "compare").await.expect("research succeeds");
    let outcome = outcome_of(&events);

    assert_eq!(outcome.answer, "Both lookups agree.");
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.tool_calls, 2);
    assert!(!events
        .iter()
        .any(|event| matches!(event, ResearchEvent::Synthesizing { .. })));

    let seen = model.seen();
    assert_eq!(seen.len(), 2);
    let transcript = &seen[1].0;
    assert_eq!(tool_result_ids(transcript), vec!["a", "b"]);
    match &transcript[transcript.len() - 2] {
        ModelMessage::ToolResult { content, .. } => {
            assert_eq!(content, "Page: first\nSummary: facts about first");
        }
        other => panic!("expected tool result, got {other:?}"),
    }

    let order = events
        .iter()
        .filter_map(|event| match event {
            ResearchEvent::ToolCall { tool_call_id, .. } => Some(format!("call:{tool_call_id}")),
            ResearchEvent::ToolResult { tool_call_id, .. } => {
                Some(format!("result:{tool_call_id}"))
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["call:a", "result:a", "call:b", "result:b"]);
}

#[tokio::test]
async fn reminder_is_appended_as_system_message() {
    let model = ScriptedModel::with_responses(vec![
        text_turn("I already know this."),
        tool_turn(vec![call("c1", "wikipedia", "check")]),
        text_turn("Checked."),
        text_turn("Final, verified answer."),
    ]);
    let agent = agent_with(model.clone(), config(25, 1));

    let events = run_events(&agent, "quick one").await.expect("research succeeds");
    assert_eq!(outcome_of(&events).answer, "Final, verified answer.");

    let seen = model.seen();
    let second_step = &seen[1].0;
    match second_step.last() {
        Some(ModelMessage::System(text)) => {
            assert!(text.starts_with("RESEARCH PROGRESS CHECK: 0/1"));
        }
        other => panic!("expected reminder, got {other:?}"),
    }
    match &seen[0].0[0] {
        ModelMessage::System(prompt) => {
            assert!(prompt.contains("at least 1 tool calls"));
            assert!(prompt.contains("- wikipedia: background"));
            assert!(!prompt.contains("tavily_search_results_json"));
        }
        other => panic!("expected system prompt, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_failures_become_observations() {
    let model = ScriptedModel::with_responses(vec![
        tool_turn(vec![
            ModelToolCall {
                id: "s1".to_string(),
                name: "web_scraper".to_string(),
                arguments: json!({"url": "https://example.com"}),
            },
            call("u1", "calculator", "2+2"),
        ]),
        text_turn("Sources were unavailable."),
    ]);
    let agent = agent_with(model.clone(), config(25, 2));

    let events = run_events(&agent, "fragile").await.expect("research succeeds");

    let failures = events
        .iter()
        .filter_map(|event| match event {
            ResearchEvent::ToolResult {
                result_text,
                is_error: true,
                ..
            } => Some(result_text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|text| text.starts_with("Error")));
    assert_eq!(failures[1], "Error: Tool calculator not found");
    assert_eq!(outcome_of(&events).tool_calls, 2);
}

#[tokio::test]
async fn model_failure_aborts_the_session() {
    let model = ScriptedModel::with_responses(vec![
        tool_turn(vec![call("c1", "wikipedia", "rust")]),
        Err(ProviderError::Request("connection refused".to_string())),
    ]);
    let agent = agent_with(model, config(25, 3));

    let err = agent
        .research("doomed", &crate::progress::NoopSink)
        .await
        .expect_err("model failure is fatal");
    assert!(matches!(err, ResearchError::Provider(ProviderError::Request(_))));
}

#[derive(Default)]
struct RecordingSink {
    notifications: Mutex<Vec<Progress>>,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn notify(&self, progress: Progress) {
        self.notifications
            .lock()
            .expect("lock poisoned")
            .push(progress);
    }
}

#[tokio::test]
async fn research_reports_progress_to_sink() {
    let model = ScriptedModel::with_responses(vec![
        tool_turn(vec![call("c1", "wikipedia", "tokio")]),
        text_turn("Tokio is an async runtime."),
    ]);
    let agent = agent_with(model, config(25, 1));
    let sink = RecordingSink::default();

    let outcome = agent.research("What is tokio?", &sink).await.expect("research succeeds");
    assert_eq!(outcome.answer, "Tokio is an async runtime.");

    let notifications = sink.notifications.lock().expect("lock poisoned");
    let first = notifications.first().expect("started notification");
    assert_eq!(
        first.embed.as_ref().map(|embed| embed.title.as_str()),
        Some("🔬 Research Started")
    );
    assert!(notifications.iter().any(|progress| {
        progress.message == "📚 Wikipedia..."
            && progress
                .embed
                .as_ref()
                .is_some_and(|embed| embed.description.contains("**Input**: tokio"))
    }));
    assert!(notifications
        .iter()
        .any(|progress| progress.message.starts_with("📊 **Result**: Page: tokio")));
    let last = notifications.last().expect("completion notification");
    assert!(last.embed.as_ref().is_some_and(|embed| embed.is_final));
}

#[test]
fn thinking_progress_is_previewed() {
    let event = ResearchEvent::Thinking {
        content: "x".repeat(500),
    };
    let progress = event.progress();
    assert!(progress.embed.is_none());
    assert_eq!(
        progress.message,
        format!("💭 **Thinking**: {}...", "x".repeat(200))
    );
}

#[test]
fn build_requires_model() {
    let err = ResearchAgent::builder()
        .build()
        .err()
        .expect("missing model rejected");
    assert!(err.to_string().contains("model must be configured"));
}

#[test]
fn build_rejects_duplicate_tools() {
    let model = ScriptedModel::with_responses(vec![]);
    let err = ResearchAgent::builder()
        .shared_model(model)
        .tool(search_tool())
        .tool(search_tool())
        .build()
        .err()
        .expect("duplicate rejected");
    assert!(err.to_string().contains("duplicate tool registered: wikipedia"));
}
