//! Line-oriented chat
//!
//! Every line a client sends is broadcast on one topic; every payload on that
//! topic is written to each locally connected client.

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::app::{AppContext, Application};
use crate::server::Incoming;

/// Default chat topic
pub const CHAT_TOPIC: &str = "chat message";

/// Chat over newline-delimited text
#[derive(Debug, Clone)]
pub struct LineChat {
    topic: String,
}

impl LineChat {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Default for LineChat {
    fn default() -> Self {
        Self::new(CHAT_TOPIC)
    }
}

impl Application for LineChat {
    fn name(&self) -> &str {
        "line-chat"
    }

    async fn serve(&self, incoming: Incoming, context: AppContext) {
        let Incoming {
            stream,
            peer,
            origin,
        } = incoming;
        info!(%peer, ?origin, slot = context.slot, "client connected");

        let mut messages = context.fanout.join(&self.topic).await;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let greeting = format!("* connected to worker {}\n", context.slot);
        if writer.write_all(greeting.as_bytes()).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim_end_matches('\r');
                        if line.is_empty() {
                            continue;
                        }
                        context
                            .fanout
                            .publish(&self.topic, Bytes::copy_from_slice(line.as_bytes()))
                            .await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(%peer, error = %e, "client read failed");
                        break;
                    }
                },
                message = messages.recv() => match message {
                    Ok(payload) => {
                        let mut out = Vec::with_capacity(payload.len() + 1);
                        out.extend_from_slice(&payload);
                        out.push(b'\n');
                        if writer.write_all(&out).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%peer, skipped, "client fell behind on chat");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!(%peer, slot = context.slot, "client disconnected");
    }

    async fn on_control(&self, message: Bytes) {
        info!(
            app = self.name(),
            len = message.len(),
            "control message ignored"
        );
    }
}
