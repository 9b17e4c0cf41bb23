//! Control policy of the research loop, kept free of I/O so every branch
//! can be exercised directly.

use crate::llm::{ModelCompletion, ModelMessage, ModelToolCall, ModelUsage};
use crate::tools::ToolInvocation;

use super::AgentConfig;
use super::prompts;

/// Returned when the transcript holds no usable assistant text.
pub const DEGRADED_ANSWER: &str =
    "Research completed, but no final summary was generated. Please try again.";

/// Observation recorded for calls requested on the step that hit the
/// iteration cap. They are answered but never executed.
pub const SKIPPED_CALL_RESULT: &str = "Error: iteration limit reached, tool call not executed";

/// Steps up to this count may end without a synthesis pass once the
/// minimum is met.
const EARLY_END_STEPS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Reasoning,
    Acting,
    Synthesizing,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Act,
    Remind,
    Synthesize,
    End,
}

impl Transition {
    pub fn next_phase(self) -> Phase {
        match self {
            Transition::Act => Phase::Acting,
            Transition::Remind => Phase::Reasoning,
            Transition::Synthesize => Phase::Synthesizing,
            Transition::End => Phase::Done,
        }
    }
}

/// Counters the policy reads after each reasoning step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopCounters {
    pub step_count: u32,
    pub tool_call_count: u32,
    pub reminders_issued: u32,
}

/// Decides what follows a reasoning step.
///
/// The iteration cap wins over everything. Below the tool minimum the
/// model is reminded while reminders remain, then forced into synthesis.
/// Once the minimum is met a tool-less step ends the session directly
/// only within the first [`EARLY_END_STEPS`] steps.
pub fn next_transition(
    counters: &LoopCounters,
    config: &AgentConfig,
    has_tool_calls: bool,
) -> Transition {
    if counters.step_count >= config.max_iterations {
        return Transition::Synthesize;
    }

    if has_tool_calls {
        return Transition::Act;
    }

    if counters.tool_call_count < config.min_tool_calls {
        if counters.reminders_issued < config.max_reminders {
            Transition::Remind
        } else {
            Transition::Synthesize
        }
    } else if counters.step_count > EARLY_END_STEPS {
        Transition::Synthesize
    } else {
        Transition::End
    }
}

/// Appends the progress reminder as a system message.
pub fn inject_reminder(
    mut transcript: Vec<ModelMessage>,
    tool_call_count: u32,
    min_tool_calls: u32,
) -> Vec<ModelMessage> {
    transcript.push(ModelMessage::System(prompts::reminder(
        tool_call_count,
        min_tool_calls,
    )));
    transcript
}

/// Text of the most recent assistant turn that has any.
pub fn final_answer(transcript: &[ModelMessage]) -> Option<&str> {
    transcript.iter().rev().find_map(ModelMessage::assistant_text)
}

/// Everything one research session owns while it runs.
#[derive(Clone, Debug)]
pub struct ResearchState {
    pub transcript: Vec<ModelMessage>,
    pub counters: LoopCounters,
    pub phase: Phase,
    pub usage: ModelUsage,
}

impl ResearchState {
    pub fn new(system_prompt: String, query: String) -> Self {
        Self {
            transcript: vec![ModelMessage::System(system_prompt), ModelMessage::User(query)],
            counters: LoopCounters::default(),
            phase: Phase::Reasoning,
            usage: ModelUsage::default(),
        }
    }

    /// Appends a reasoning turn and counts the step.
    pub fn record_step(&mut self, completion: &ModelCompletion) {
        self.counters.step_count += 1;
        self.record_usage(completion);
        self.transcript.push(ModelMessage::Assistant {
            content: completion.text.clone(),
            tool_calls: completion.tool_calls.clone(),
        });
    }

    /// Appends the synthesis turn. Tool calls on it are dropped.
    pub fn record_synthesis(&mut self, completion: &ModelCompletion) {
        self.record_usage(completion);
        self.transcript.push(ModelMessage::Assistant {
            content: completion.text.clone(),
            tool_calls: Vec::new(),
        });
    }

    pub fn record_tool_result(&mut self, call: &ModelToolCall, invocation: &ToolInvocation) {
        self.transcript.push(ModelMessage::ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: invocation.text.clone(),
            is_error: invocation.is_error,
        });
    }

    pub fn remind(&mut self, min_tool_calls: u32) {
        let transcript = std::mem::take(&mut self.transcript);
        self.transcript =
            inject_reminder(transcript, self.counters.tool_call_count, min_tool_calls);
        self.counters.reminders_issued += 1;
    }

    /// Tool calls requested by the latest assistant turn.
    pub fn pending_tool_calls(&self) -> Vec<ModelToolCall> {
        self.transcript
            .iter()
            .rev()
            .find_map(|message| match message {
                ModelMessage::Assistant { tool_calls, .. } => Some(tool_calls.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Answers pending calls without running them, so the transcript stays
    /// well formed for the synthesis request.
    pub fn skip_pending_tool_calls(&mut self) -> usize {
        let pending = self.pending_tool_calls();
        for call in &pending {
            self.transcript.push(ModelMessage::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: SKIPPED_CALL_RESULT.to_string(),
                is_error: true,
            });
        }
        pending.len()
    }

    /// Final answer and whether the placeholder had to be used.
    pub fn answer(&self) -> (String, bool) {
        match final_answer(&self.transcript) {
            Some(text) => (text.to_string(), false),
            None => (DEGRADED_ANSWER.to_string(), true),
        }
    }

    fn record_usage(&mut self, completion: &ModelCompletion) {
        if let Some(usage) = completion.usage {
            self.usage.accumulate(usage);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(max_iterations: u32, min_tool_calls: u32, max_reminders: u32) -> AgentConfig {
        AgentConfig {
            max_iterations,
            min_tool_calls,
            max_reminders,
            system_prompt: None,
        }
    }

    fn counters(step_count: u32, tool_call_count: u32, reminders_issued: u32) -> LoopCounters {
        LoopCounters {
            step_count,
            tool_call_count,
            reminders_issued,
        }
    }

    #[test]
    fn iteration_cap_forces_synthesis_even_with_tool_calls() {
        let config = config(5, 3, 3);
        assert_eq!(
            next_transition(&counters(5, 4, 0), &config, true),
            Transition::Synthesize
        );
        assert_eq!(
            next_transition(&counters(5, 0, 3), &config, false),
            Transition::Synthesize
        );
    }

    #[test]
    fn tool_calls_act_below_and_above_minimum() {
        let config = config(25, 3, 3);
        assert_eq!(next_transition(&counters(1, 0, 0), &config, true), Transition::Act);
        assert_eq!(next_transition(&counters(6, 5, 0), &config, true), Transition::Act);
    }

    #[test]
    fn under_minimum_reminds_until_reminders_run_out() {
        let config = config(25, 3, 2);
        assert_eq!(
            next_transition(&counters(1, 0, 0), &config, false),
            Transition::Remind
        );
        assert_eq!(
            next_transition(&counters(2, 1, 1), &config, false),
            Transition::Remind
        );
        assert_eq!(
            next_transition(&counters(3, 1, 2), &config, false),
            Transition::Synthesize
        );
    }

    #[test]
    fn minimum_met_ends_early_or_synthesizes() {
        let config = config(25, 1, 3);
        assert_eq!(next_transition(&counters(2, 1, 0), &config, false), Transition::End);
        assert_eq!(
            next_transition(&counters(3, 1, 0), &config, false),
            Transition::Synthesize
        );

        let no_minimum = self::config(25, 0, 3);
        assert_eq!(
            next_transition(&counters(1, 0, 0), &no_minimum, false),
            Transition::End
        );
    }

    #[test]
    fn inject_reminder_appends_one_system_message() {
        let transcript = vec![ModelMessage::User("q".to_string())];
        let updated = inject_reminder(transcript, 1, 3);
        assert_eq!(updated.len(), 2);
        let ModelMessage::System(text) = &updated[1] else {
            panic!("expected system message");
        };
        assert!(text.starts_with("RESEARCH PROGRESS CHECK: 1/3"));
    }

    #[test]
    fn final_answer_takes_latest_non_blank_assistant_text() {
        let transcript = vec![
            ModelMessage::User("q".to_string()),
            ModelMessage::Assistant {
                content: Some("draft".to_string()),
                tool_calls: vec![],
            },
            ModelMessage::Assistant {
                content: Some("  ".to_string()),
                tool_calls: vec![],
            },
            ModelMessage::ToolResult {
                tool_call_id: "c1".to_string(),
                tool_name: "wikipedia".to_string(),
                content: "observation".to_string(),
                is_error: false,
            },
        ];
        assert_eq!(final_answer(&transcript), Some("draft"));
        assert_eq!(final_answer(&transcript[..1]), None);
    }

    #[test]
    fn skipped_calls_are_answered_once_each() {
        let mut state = ResearchState::new("system".to_string(), "q".to_string());
        state.record_step(&ModelCompletion {
            text: None,
            tool_calls: vec![
                ModelToolCall {
                    id: "a".to_string(),
                    name: "wikipedia".to_string(),
                    arguments: json!({"query": "x"}),
                },
                ModelToolCall {
                    id: "b".to_string(),
                    name: "duckduckgo_search".to_string(),
                    arguments: json!({"query": "y"}),
                },
            ],
            usage: None,
        });

        assert_eq!(state.skip_pending_tool_calls(), 2);
        let answered = state
            .transcript
            .iter()
            .filter_map(|message| match message {
                ModelMessage::ToolResult {
                    tool_call_id,
                    is_error,
                    ..
                } => Some((tool_call_id.as_str(), *is_error)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(answered, vec![("a", true), ("b", true)]);
        assert_eq!(state.counters.tool_call_count, 0);
    }

    #[test]
    fn answer_falls_back_to_placeholder() {
        let mut state = ResearchState::new("system".to_string(), "q".to_string());
        assert_eq!(state.answer(), (DEGRADED_ANSWER.to_string(), true));

        state.record_synthesis(&ModelCompletion {
            text: Some("summary".to_string()),
            tool_calls: vec![],
            usage: Some(ModelUsage {
                input_tokens: 10,
                output_tokens: 4,
            }),
        });
        assert_eq!(state.answer(), ("summary".to_string(), false));
        assert_eq!(state.usage.output_tokens, 4);
        assert_eq!(state.counters.step_count, 0);
    }
}
