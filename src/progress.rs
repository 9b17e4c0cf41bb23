//! Progress reporting from a research session to its requester.
//!
//! The loop only ever talks to a [`ProgressSink`]. In a service deployment
//! the sink is a [`ChannelSink`] feeding a bounded channel; a separate pump
//! task ([`spawn_progress_pump`]) drains it, batches text updates on a
//! minimum interval and hands each batch to a [`ProgressDelivery`]. Rich
//! updates flush immediately. When the channel closes the pump flushes what
//! it holds and exits, so nothing is dropped at session end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::DeliveryError;

pub const COLOR_ACTIVITY: u32 = 0x5865F2;
pub const COLOR_SUCCESS: u32 = 0x57F287;
pub const COLOR_FAILURE: u32 = 0xED4245;

/// Combined text of one batch keeps at most this many trailing characters.
pub const BATCH_TEXT_LIMIT: usize = 300;

/// Structured, platform-neutral rendering hint for a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
    /// Marks the last rich update of a session.
    pub is_final: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub message: String,
    pub embed: Option<ProgressEmbed>,
}

impl Progress {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            embed: None,
        }
    }

    pub fn rich(
        message: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        color: u32,
    ) -> Self {
        Self {
            message: message.into(),
            embed: Some(ProgressEmbed {
                title: title.into(),
                description: description.into(),
                color,
                is_final: false,
            }),
        }
    }

    pub fn into_final(mut self) -> Self {
        if let Some(embed) = self.embed.as_mut() {
            embed.is_final = true;
        }
        self
    }

    pub fn is_rich(&self) -> bool {
        self.embed.is_some()
    }
}

/// Receives notifications from a running research loop.
///
/// Called at high frequency from the loop; implementations must not block
/// on slow external delivery.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, progress: Progress);
}

/// Discards every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn notify(&self, _progress: Progress) {}
}

/// Sink half of the loop → pump channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Progress>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Progress>) -> Self {
        Self { tx }
    }

    /// Queues without waiting; returns `false` when the channel is full or
    /// closed.
    pub fn try_notify(&self, progress: Progress) -> bool {
        match self.tx.try_send(progress) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "progress notification not queued");
                false
            }
        }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn notify(&self, progress: Progress) {
        if self.tx.send(progress).await.is_err() {
            debug!("progress pump already stopped; notification discarded");
        }
    }
}

/// Notifications flushed together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressBatch {
    pub messages: Vec<String>,
    /// Set when the batch was closed by a rich notification.
    pub embed: Option<ProgressEmbed>,
}

impl ProgressBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.embed.is_none()
    }

    /// Newline-joined messages, keeping the trailing
    /// [`BATCH_TEXT_LIMIT`] characters.
    pub fn combined_text(&self) -> String {
        let combined = self
            .messages
            .iter()
            .filter(|message| !message.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let count = combined.chars().count();
        if count <= BATCH_TEXT_LIMIT {
            return combined;
        }
        combined.chars().skip(count - BATCH_TEXT_LIMIT).collect()
    }

    fn push(&mut self, progress: Progress) {
        if !progress.message.is_empty() {
            self.messages.push(progress.message);
        }
        if progress.embed.is_some() {
            self.embed = progress.embed;
        }
    }
}

/// The external surface a batch is finally shown on (a chat message being
/// edited, a terminal, ...).
#[async_trait]
pub trait ProgressDelivery: Send + Sync {
    async fn deliver(&self, batch: ProgressBatch) -> Result<(), DeliveryError>;
}

/// Spawns the batching consumer for `rx`. The task ends once every sender
/// is dropped and the remaining buffer is delivered.
pub fn spawn_progress_pump(
    rx: mpsc::Receiver<Progress>,
    delivery: Arc<dyn ProgressDelivery>,
    min_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run_progress_pump(rx, delivery, min_interval))
}

pub async fn run_progress_pump(
    mut rx: mpsc::Receiver<Progress>,
    delivery: Arc<dyn ProgressDelivery>,
    min_interval: Duration,
) {
    let mut batch = ProgressBatch::default();
    let mut last_flush = Instant::now();

    loop {
        match tokio::time::timeout(min_interval, rx.recv()).await {
            Ok(Some(progress)) => {
                let rich = progress.is_rich();
                batch.push(progress);
                if rich || last_flush.elapsed() >= min_interval {
                    flush(&mut batch, delivery.as_ref()).await;
                    last_flush = Instant::now();
                }
            }
            Ok(None) => {
                flush(&mut batch, delivery.as_ref()).await;
                break;
            }
            Err(_) => {
                if !batch.is_empty() {
                    flush(&mut batch, delivery.as_ref()).await;
                    last_flush = Instant::now();
                }
            }
        }
    }
}

async fn flush(batch: &mut ProgressBatch, delivery: &dyn ProgressDelivery) {
    if batch.is_empty() {
        return;
    }
    let batch = std::mem::take(batch);
    if let Err(err) = delivery.deliver(batch).await {
        warn!(error = %err, "failed to deliver research progress");
    }
}
