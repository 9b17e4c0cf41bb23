//! Retrieval tools used by the research agent: Tavily and DuckDuckGo web
//! search, Wikipedia summaries, and a plain-text web page scraper.
//!
//! Retrieval failures are returned as observation text starting with
//! [`FAILURE_MARKER`](super::FAILURE_MARKER) so the model can react to them.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ToolSpec, truncate_chars};
use crate::config::ToolSettings;
use crate::error::ToolError;

pub const TAVILY_TOOL: &str = "tavily_search_results_json";
pub const DUCKDUCKGO_TOOL: &str = "duckduckgo_search";
pub const WIKIPEDIA_TOOL: &str = "wikipedia";
pub const WEB_SCRAPER_TOOL: &str = "web_scraper";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";
const API_USER_AGENT: &str = concat!("research-agent-rs/", env!("CARGO_PKG_VERSION"));

/// User-facing label for a research tool.
pub fn display_name(name: &str) -> String {
    match name {
        TAVILY_TOOL => "🔍 Tavily Search".to_string(),
        DUCKDUCKGO_TOOL => "🦆 DuckDuckGo Search".to_string(),
        WIKIPEDIA_TOOL => "📚 Wikipedia".to_string(),
        WEB_SCRAPER_TOOL => "🌐 Web Scraper".to_string(),
        other => format!("🔧 {other}"),
    }
}

/// Builds every research tool the settings allow. Tavily is left out when
/// no API key is configured.
pub fn research_tools(settings: &ToolSettings) -> Result<Vec<ToolSpec>, ToolError> {
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let api_client = Client::builder()
        .timeout(timeout)
        .user_agent(API_USER_AGENT)
        .build()?;
    let browser_client = Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()?;

    let mut tools = Vec::new();

    match settings.tavily_api_key.clone() {
        Some(api_key) => {
            tools.push(tavily_tool(
                api_client.clone(),
                settings.tavily_api_url.clone(),
                api_key,
            )?);
            info!("tavily search tool initialized");
        }
        None => info!("no tavily api key configured; tavily search disabled"),
    }

    tools.push(duckduckgo_tool(
        api_client.clone(),
        settings.duckduckgo_api_url.clone(),
    )?);
    tools.push(wikipedia_tool(
        api_client,
        settings.wikipedia_api_url.clone(),
        settings.wikipedia_top_k,
        settings.wikipedia_max_chars,
    )?);
    tools.push(web_scraper_tool(browser_client, settings.max_output_chars)?);

    Ok(tools)
}

fn query_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": description}
        },
        "required": ["query"],
        "additionalProperties": false
    })
}

fn query_arg(args: &Value) -> Result<String, ToolError> {
    args.get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ToolError::Execution("query must not be empty".to_string()))
}

pub fn tavily_tool(
    client: Client,
    api_url: String,
    api_key: String,
) -> Result<ToolSpec, ToolError> {
    let tool = ToolSpec::new(
        TAVILY_TOOL,
        "A search engine optimized for comprehensive, accurate results. Best for recent news \
         and current events. Input should be a search query.",
    )
    .with_display_name(display_name(TAVILY_TOOL))
    .with_schema(query_schema("search query"))?
    .with_handler(move |args| {
        let client = client.clone();
        let api_url = api_url.clone();
        let api_key = api_key.clone();
        async move {
            let query = query_arg(&args)?;
            let response = client
                .post(&api_url)
                .json(&json!({
                    "api_key": api_key,
                    "query": query,
                    "max_results": 5,
                    "search_depth": "advanced",
                    "include_answer": true,
                    "include_raw_content": false,
                }))
                .send()
                .await?
                .error_for_status()?
                .json::<TavilyResponse>()
                .await?;
            Ok(render_tavily(response))
        }
    });
    Ok(tool)
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

fn render_tavily(response: TavilyResponse) -> String {
    let mut sections = Vec::new();
    if let Some(answer) = response.answer.filter(|answer| !answer.trim().is_empty()) {
        sections.push(format!("Answer: {answer}"));
    }
    for (position, result) in response.results.iter().enumerate() {
        sections.push(format!(
            "[{}] {} ({})\n{}",
            position + 1,
            result.title,
            result.url,
            result.content
        ));
    }
    if sections.is_empty() {
        "No good Tavily Search Result was found".to_string()
    } else {
        sections.join("\n\n")
    }
}

pub fn duckduckgo_tool(client: Client, api_url: String) -> Result<ToolSpec, ToolError> {
    let tool = ToolSpec::new(
        DUCKDUCKGO_TOOL,
        "A wrapper around DuckDuckGo instant answers. Useful for broad results and alternative \
         perspectives. Input should be a search query.",
    )
    .with_display_name(display_name(DUCKDUCKGO_TOOL))
    .with_schema(query_schema("search query"))?
    .with_handler(move |args| {
        let client = client.clone();
        let api_url = api_url.clone();
        async move {
            let query = query_arg(&args)?;
            let response = client
                .get(&api_url)
                .query(&[
                    ("q", query.as_str()),
                    ("format", "json"),
                    ("no_html", "1"),
                    ("skip_disambig", "1"),
                ])
                .send()
                .await?
                .error_for_status()?
                .json::<DuckDuckGoResponse>()
                .await?;
            Ok(render_duckduckgo(response))
        }
    });
    Ok(tool)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DuckDuckGoResponse {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<DuckDuckGoTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DuckDuckGoTopic {
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
    #[serde(default)]
    topics: Vec<DuckDuckGoTopic>,
}

fn render_duckduckgo(response: DuckDuckGoResponse) -> String {
    let mut lines = Vec::new();
    if !response.answer.is_empty() {
        lines.push(format!("Answer: {}", response.answer));
    }
    if !response.abstract_text.is_empty() {
        lines.push(format!(
            "{}: {} ({})",
            response.heading, response.abstract_text, response.abstract_url
        ));
    }

    let mut pending = response.related_topics;
    pending.reverse();
    while let Some(topic) = pending.pop() {
        if lines.len() >= 8 {
            break;
        }
        if let Some(text) = topic.text {
            match topic.first_url {
                Some(url) => lines.push(format!("- {text} ({url})")),
                None => lines.push(format!("- {text}")),
            }
        }
        pending.extend(topic.topics.into_iter().rev());
    }

    if lines.is_empty() {
        "No good DuckDuckGo Search Result was found".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn wikipedia_tool(
    client: Client,
    api_url: String,
    top_k: usize,
    max_chars: usize,
) -> Result<ToolSpec, ToolError> {
    let tool = ToolSpec::new(
        WIKIPEDIA_TOOL,
        "A wrapper around Wikipedia. Useful for background information, definitions, history \
         and established facts. Input should be a search query.",
    )
    .with_display_name(display_name(WIKIPEDIA_TOOL))
    .with_schema(query_schema("topic to look up"))?
    .with_handler(move |args| {
        let client = client.clone();
        let api_url = api_url.clone();
        async move {
            let query = query_arg(&args)?;
            let limit = top_k.to_string();
            let search = client
                .get(&api_url)
                .query(&[
                    ("action", "query"),
                    ("list", "search"),
                    ("srsearch", query.as_str()),
                    ("srlimit", limit.as_str()),
                    ("format", "json"),
                ])
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;

            let titles = search
                .pointer("/query/search")
                .and_then(Value::as_array)
                .map(|hits| {
                    hits.iter()
                        .filter_map(|hit| hit.get("title").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let mut pages = Vec::new();
            for title in titles.iter().take(top_k) {
                let extract = client
                    .get(&api_url)
                    .query(&[
                        ("action", "query"),
                        ("prop", "extracts"),
                        ("exintro", "1"),
                        ("explaintext", "1"),
                        ("redirects", "1"),
                        ("titles", title.as_str()),
                        ("format", "json"),
                    ])
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await?;
                if let Some(summary) = first_extract(&extract) {
                    pages.push(format!("Page: {title}\nSummary: {summary}"));
                }
            }

            if pages.is_empty() {
                return Ok("No good Wikipedia Search Result was found".to_string());
            }
            Ok(truncate_chars(&pages.join("\n\n"), max_chars))
        }
    });
    Ok(tool)
}

fn first_extract(payload: &Value) -> Option<String> {
    payload
        .pointer("/query/pages")
        .and_then(Value::as_object)?
        .values()
        .filter_map(|page| page.get("extract").and_then(Value::as_str))
        .map(str::trim)
        .find(|extract| !extract.is_empty())
        .map(str::to_string)
}

pub fn web_scraper_tool(client: Client, max_chars: usize) -> Result<ToolSpec, ToolError> {
    let tool = ToolSpec::new(
        WEB_SCRAPER_TOOL,
        "Scrapes content from a specific URL. Input should be a valid URL string. Returns the \
         main text content from the webpage.",
    )
    .with_display_name(display_name(WEB_SCRAPER_TOOL))
    .with_schema(json!({
        "type": "object",
        "properties": {
            "url": {"type": "string", "description": "absolute http(s) URL"}
        },
        "required": ["url"],
        "additionalProperties": false
    }))?
    .with_handler(move |args| {
        let client = client.clone();
        async move {
            let url = args
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            Ok(scrape(&client, &url, max_chars).await)
        }
    });
    Ok(tool)
}

async fn scrape(client: &Client, url: &str, max_chars: usize) -> String {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => return describe_fetch_error(url, &err),
    };

    if response.status() != StatusCode::OK {
        return format!(
            "Error: Unable to fetch URL (Status {})",
            response.status().as_u16()
        );
    }

    match response.text().await {
        Ok(html) => truncate_chars(&html_to_text(&html), max_chars),
        Err(err) => describe_fetch_error(url, &err),
    }
}

fn describe_fetch_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "Error: Request timed out".to_string();
    }
    warn!(url, error = %err, "scrape failed");
    format!("Error scraping URL: {err}")
}

static HIDDEN_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "nav", "footer", "header", "noscript"]
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).ok())
        .collect()
});
static COMMENTS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());
static TAGS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());

/// Reduces an HTML document to its visible text, one phrase per line.
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in HIDDEN_BLOCKS.iter().chain(COMMENTS.iter()) {
        text = pattern.replace_all(&text, "\n").into_owned();
    }
    if let Some(tags) = TAGS.as_ref() {
        text = tags.replace_all(&text, "\n").into_owned();
    }
    let text = decode_entities(&text);

    text.lines()
        .flat_map(|line| line.split("  "))
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
