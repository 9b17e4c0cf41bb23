use std::env;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use research_agent_rs::{
    DeliveryError, ProgressBatch, ProgressDelivery, ResearchConfig, ResearchService,
};
use tokio_util::sync::CancellationToken;

const REQUESTER_ID: &str = "cli";

/// Prints each progress batch as it is flushed.
struct StdoutDelivery;

#[async_trait]
impl ProgressDelivery for StdoutDelivery {
    async fn deliver(&self, batch: ProgressBatch) -> Result<(), DeliveryError> {
        let text = batch.combined_text();
        if !text.is_empty() {
            println!("{text}");
        }
        if let Some(embed) = batch.embed {
            println!("[{}] {}", embed.title, embed.description);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let query = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: research <query>");
        std::process::exit(2);
    }

    let config = match env::var("RESEARCH_CONFIG") {
        Ok(path) => ResearchConfig::load(path)?,
        Err(_) => ResearchConfig::from_env()?,
    };
    let service = ResearchService::from_config(&config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let outcome = service
        .start_research_with_cancel(REQUESTER_ID, &query, Arc::new(StdoutDelivery), cancel)
        .await?;

    println!();
    println!("{}", outcome.answer);
    println!();
    println!(
        "steps: {} | tool calls: {} | tokens in/out: {}/{}",
        outcome.steps, outcome.tool_calls, outcome.usage.input_tokens, outcome.usage.output_tokens
    );

    Ok(())
}
