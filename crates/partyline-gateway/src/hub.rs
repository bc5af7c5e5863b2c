use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;

use partyline_core::{MentionParser, Store};
use partyline_types::events::{InboundMessage, Outbound};

use crate::worker::{self, ChannelWorker, Job};

/// Jobs queued per channel before senders start waiting.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("worker for channel {0} has shut down")]
    WorkerGone(String),

    #[error("storage failed")]
    Storage(#[source] anyhow::Error),
}

/// Routes inbound messages to one worker task per channel.
#[derive(Clone)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: Arc<dyn Store>,
    parser: Arc<MentionParser>,

    /// channel name -> that channel's job queue
    workers: RwLock<HashMap<String, mpsc::Sender<Job>>>,
}

impl ChannelHub {
    pub fn new(store: Arc<dyn Store>, parser: MentionParser) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                parser: Arc::new(parser),
                workers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Returns the live queue for `channel`, spawning its worker if needed.
    async fn queue_for(&self, channel: &str) -> mpsc::Sender<Job> {
        if let Some(tx) = self.inner.workers.read().await.get(channel) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let mut workers = self.inner.workers.write().await;
        // Another caller may have spawned it while we waited for the lock
        if let Some(tx) = workers.get(channel) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = ChannelWorker::new(
            channel,
            self.inner.store.clone(),
            self.inner.parser.clone(),
        );
        tokio::spawn(worker::run(worker, rx));
        workers.insert(channel.to_string(), tx.clone());
        info!("Started worker for channel {}", channel);
        tx
    }

    /// Handles one message on its channel's worker and returns what to
    /// deliver, in order.
    pub async fn handle(
        &self,
        message: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>, HubError> {
        let channel = message.channel.clone();
        let tx = self.queue_for(&channel).await;
        let (reply, rx) = oneshot::channel();

        tx.send(Job::Message {
            message,
            now,
            reply,
        })
        .await
        .map_err(|_| HubError::WorkerGone(channel.clone()))?;

        rx.await.map_err(|_| HubError::WorkerGone(channel))
    }

    /// Stops the channel's worker once its queued messages are done, then
    /// deletes the stored channel. Targets and reasons are kept.
    pub async fn delete_channel(&self, name: &str) -> Result<(), HubError> {
        // Held throughout so no new worker can load the channel mid-delete
        let mut workers = self.inner.workers.write().await;

        match workers.remove(name) {
            Some(tx) if !tx.is_closed() => {
                let (reply, rx) = oneshot::channel();
                tx.send(Job::Delete { reply })
                    .await
                    .map_err(|_| HubError::WorkerGone(name.to_string()))?;
                rx.await
                    .map_err(|_| HubError::WorkerGone(name.to_string()))?
                    .map_err(HubError::Storage)?;
            }
            _ => {
                let store = self.inner.store.clone();
                let target = name.to_string();
                tokio::task::spawn_blocking(move || store.delete_channel(&target))
                    .await
                    .map_err(|e| HubError::Storage(anyhow::anyhow!("delete task failed: {}", e)))?
                    .map_err(HubError::Storage)?;
            }
        }

        info!("Deleted channel {}", name);
        Ok(())
    }

    /// Number of channels with a live worker.
    pub async fn active_channels(&self) -> usize {
        self.inner
            .workers
            .read()
            .await
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}
