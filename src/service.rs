//! Session entry point: one research run per requester at a time, with
//! progress streamed through a batching pump.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::agent::{ResearchAgent, ResearchOutcome};
use crate::config::{ProgressSettings, ResearchConfig};
use crate::error::ResearchError;
use crate::llm::model_from_settings;
use crate::progress::{COLOR_FAILURE, ChannelSink, Progress, ProgressDelivery, spawn_progress_pump};
use crate::session::SessionRegistry;
use crate::tools::ToolRegistry;
use crate::tools::research::research_tools;

const MIN_PUMP_INTERVAL: Duration = Duration::from_millis(1);

pub struct ResearchService {
    agent: Arc<ResearchAgent>,
    sessions: SessionRegistry,
    progress: ProgressSettings,
    timeout: Option<Duration>,
}

impl ResearchService {
    pub fn new(agent: Arc<ResearchAgent>) -> Self {
        Self {
            agent,
            sessions: SessionRegistry::new(),
            progress: ProgressSettings::default(),
            timeout: None,
        }
    }

    /// Builds the model adapter, the research tools and the agent from
    /// `config`.
    pub fn from_config(config: &ResearchConfig) -> Result<Self, ResearchError> {
        config.validate()?;

        let model = model_from_settings(&config.model)?;
        let tools = research_tools(&config.tools)
            .map_err(|err| ResearchError::Config(err.to_string()))?;
        let registry =
            ToolRegistry::new(tools)?.with_max_output_chars(config.tools.max_output_chars);
        let agent = ResearchAgent::builder()
            .shared_model(model)
            .registry(registry)
            .config(config.agent.to_agent_config())
            .build()?;

        info!(
            provider = %config.model.provider,
            model = %config.model.model,
            "research service configured"
        );

        Ok(Self::new(Arc::new(agent))
            .with_progress(config.progress.clone())
            .with_timeout(config.session.timeout()))
    }

    pub fn with_progress(mut self, progress: ProgressSettings) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn agent(&self) -> &ResearchAgent {
        &self.agent
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Runs one research session for `requester_id`, rejecting it with
    /// [`ResearchError::Busy`] when that requester already has one running.
    pub async fn start_research(
        &self,
        requester_id: &str,
        query: &str,
        delivery: Arc<dyn ProgressDelivery>,
    ) -> Result<ResearchOutcome, ResearchError> {
        self.start_research_with_cancel(requester_id, query, delivery, CancellationToken::new())
            .await
    }

    /// Like [`start_research`](Self::start_research); cancelling `cancel`
    /// stops the loop at its next suspension point.
    pub async fn start_research_with_cancel(
        &self,
        requester_id: &str,
        query: &str,
        delivery: Arc<dyn ProgressDelivery>,
        cancel: CancellationToken,
    ) -> Result<ResearchOutcome, ResearchError> {
        let Some(guard) = self.sessions.acquire(requester_id) else {
            warn!(requester_id, "research request rejected: session already active");
            return Err(ResearchError::Busy {
                requester_id: requester_id.to_string(),
            });
        };

        let (tx, rx) = mpsc::channel(self.progress.buffer.max(1));
        let mut pump = spawn_progress_pump(
            rx,
            delivery,
            self.progress.min_interval().max(MIN_PUMP_INTERVAL),
        );
        let sink = ChannelSink::new(tx);

        let result = self
            .run_session(query, &sink, &cancel)
            .instrument(info_span!("research_session", requester_id))
            .await;

        match &result {
            Ok(outcome) => info!(
                requester_id,
                steps = outcome.steps,
                tool_calls = outcome.tool_calls,
                degraded = outcome.degraded,
                "research session finished"
            ),
            Err(err) => {
                warn!(requester_id, error = %err, "research session failed");
                if !sink.try_notify(failure_progress(err)) {
                    warn!(requester_id, "failure notification dropped: progress channel full");
                }
            }
        }

        drop(sink);
        drop(guard);

        let grace = self.progress.drain_grace();
        match tokio::time::timeout(grace, &mut pump).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "progress pump task failed"),
            Err(_) => {
                warn!(
                    requester_id,
                    grace_ms = grace.as_millis() as u64,
                    "progress delivery did not drain in time; aborting pump"
                );
                pump.abort();
            }
        }

        result
    }

    async fn run_session(
        &self,
        query: &str,
        sink: &ChannelSink,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, ResearchError> {
        let research = self.agent.research(query, sink);
        let bounded = async {
            match self.timeout {
                Some(after) => match tokio::time::timeout(after, research).await {
                    Ok(result) => result,
                    Err(_) => Err(ResearchError::TimedOut { after }),
                },
                None => research.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResearchError::Cancelled),
            result = bounded => result,
        }
    }
}

fn failure_progress(err: &ResearchError) -> Progress {
    Progress::rich(
        "❌ Research failed",
        "❌ Research Failed",
        err.to_string(),
        COLOR_FAILURE,
    )
    .into_final()
}
