//! One task per channel. The task owns the channel state outright, so every
//! message to that channel is handled strictly one after another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use partyline_core::{Channel, CoreError, MentionParser, Session, Store, normalize_identity};
use partyline_types::events::{InboundMessage, Outbound};

pub(crate) enum Job {
    Message {
        message: InboundMessage,
        now: DateTime<Utc>,
        reply: oneshot::Sender<Vec<Outbound>>,
    },
    /// Deletes the stored channel and stops the worker.
    Delete {
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
}

pub(crate) struct ChannelWorker {
    name: String,
    store: Arc<dyn Store>,
    parser: Arc<MentionParser>,
    /// Loaded on the first message.
    channel: Option<Channel>,
}

impl ChannelWorker {
    pub(crate) fn new(name: &str, store: Arc<dyn Store>, parser: Arc<MentionParser>) -> Self {
        Self {
            name: name.to_string(),
            store,
            parser,
            channel: None,
        }
    }

    fn load(&self) -> anyhow::Result<Channel> {
        match self.store.load_channel(&self.name)? {
            Some(mut channel) => {
                if channel.fix_up() {
                    self.store.put_channel(&channel)?;
                }
                Ok(channel)
            }
            None => {
                info!("Creating channel {}", self.name);
                Ok(Channel::new(&self.name))
            }
        }
    }

    fn process(&mut self, message: &InboundMessage, now: DateTime<Utc>) -> Vec<Outbound> {
        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => match self.load() {
                Ok(channel) => channel,
                Err(e) => {
                    error!("Failed to load channel {}: {:#}", self.name, e);
                    let line = CoreError::Persistence(e).user_message();
                    return vec![Outbound::direct(line, &normalize_identity(&message.sender))];
                }
            },
        };

        let out = Session::new(self.store.as_ref(), &self.parser).respond(&mut channel, message, now);
        self.channel = Some(channel);
        out
    }
}

/// Drains `rx` until every sender is dropped or the channel is deleted.
pub(crate) async fn run(mut worker: ChannelWorker, mut rx: mpsc::Receiver<Job>) {
    let name = worker.name.clone();
    debug!("Channel worker for {} started", name);

    while let Some(job) = rx.recv().await {
        match job {
            Job::Message {
                message,
                now,
                reply,
            } => {
                let result = tokio::task::spawn_blocking(move || {
                    let out = worker.process(&message, now);
                    (worker, out)
                })
                .await;

                match result {
                    Ok((w, out)) => {
                        worker = w;
                        // The caller may have given up waiting
                        let _ = reply.send(out);
                    }
                    Err(e) => {
                        error!("Channel worker for {} panicked: {}", name, e);
                        return;
                    }
                }
            }
            Job::Delete { reply } => {
                let store = worker.store.clone();
                let target = name.clone();
                let result = tokio::task::spawn_blocking(move || store.delete_channel(&target))
                    .await
                    .unwrap_or_else(|e| Err(anyhow::anyhow!("delete task failed: {}", e)));
                let _ = reply.send(result);
                break;
            }
        }
    }

    debug!("Channel worker for {} stopped", name);
}
