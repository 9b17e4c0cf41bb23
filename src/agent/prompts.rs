use crate::tools::research::{DUCKDUCKGO_TOOL, TAVILY_TOOL, WEB_SCRAPER_TOOL, WIKIPEDIA_TOOL};

/// Base instructions for the research model. The available tools and the
/// minimum-effort requirement are appended by [`system_prompt`].
pub const RESEARCH_SYSTEM_PROMPT: &str = "\
You are a research agent. Your job is to gather accurate, detailed and well-sourced \
information before you answer.

## Method

1. Break the question into its key components and subtopics.
2. Research each part with the tools available, using several sources.
3. Cross-check important facts between sources and note contradictions.
4. Only then write the final answer.

Work in a Thought -> Action -> Observation cycle: decide what is still unknown, call the \
tool best suited to find it, read the result carefully, and repeat.

Search for different aspects separately. Do not stop after one or two searches and do \
not rely on a single source.

## Final answer

Structure the answer with short headings, lead with the direct answer, then supporting \
detail. Mention where the key facts came from and flag anything that remained uncertain.";

/// Full system prompt for one session, listing only the tools that are
/// actually registered.
pub fn system_prompt<'a>(
    base: &str,
    tool_names: impl IntoIterator<Item = &'a str>,
    min_tool_calls: u32,
) -> String {
    let mut prompt = base.to_string();

    let guide = tool_names
        .into_iter()
        .map(|name| match tool_hint(name) {
            Some(hint) => format!("- {name}: {hint}"),
            None => format!("- {name}"),
        })
        .collect::<Vec<_>>();
    if !guide.is_empty() {
        prompt.push_str("\n\n## Tools\n\n");
        prompt.push_str(&guide.join("\n"));
    }

    if min_tool_calls > 0 {
        prompt.push_str(&format!(
            "\n\nREQUIREMENT: for this query you MUST make at least {min_tool_calls} tool \
             calls before giving your final answer. Track your progress and keep researching \
             until this minimum is met."
        ));
    }
    prompt
}

fn tool_hint(name: &str) -> Option<&'static str> {
    match name {
        TAVILY_TOOL => Some("recent news, current events, broad web coverage."),
        DUCKDUCKGO_TOOL => Some("an alternative search for different perspectives."),
        WIKIPEDIA_TOOL => Some("background, definitions, history and established facts."),
        WEB_SCRAPER_TOOL => Some("full text of one specific URL you already know is valuable."),
        _ => None,
    }
}

/// Nudge sent when the model answers before meeting the minimum.
pub fn reminder(tool_call_count: u32, min_tool_calls: u32) -> String {
    format!(
        "RESEARCH PROGRESS CHECK: {tool_call_count}/{min_tool_calls} tool calls completed.\n\n\
         You have not met the minimum yet. Continue researching by:\n\
         - exploring a different aspect or subtopic\n\
         - using a different search tool for another perspective\n\
         - cross-referencing what you found so far\n\n\
         Do not write the final answer until at least {min_tool_calls} tool calls are done."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_states_minimum() {
        let prompt = system_prompt(RESEARCH_SYSTEM_PROMPT, [WIKIPEDIA_TOOL], 3);
        assert!(prompt.starts_with("You are a research agent."));
        assert!(prompt.contains("at least 3 tool calls"));
        assert_eq!(system_prompt("base", Vec::<&str>::new(), 0), "base");
    }

    #[test]
    fn system_prompt_lists_only_registered_tools() {
        let prompt = system_prompt(
            RESEARCH_SYSTEM_PROMPT,
            [DUCKDUCKGO_TOOL, WIKIPEDIA_TOOL, WEB_SCRAPER_TOOL, "calculator"],
            3,
        );
        assert!(!prompt.contains(TAVILY_TOOL));
        assert!(prompt.contains("- duckduckgo_search: an alternative search"));
        assert!(prompt.contains("- web_scraper: full text"));
        assert!(prompt.contains("- calculator\n"));
    }
}
