//! Realtime change feed.
//!
//! A table trigger announces every insert, update and delete on the
//! `media_changes` channel. One listener task per process republishes those
//! notifications on a broadcast channel; each SSE subscriber receives them and
//! re-fetches the listing.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgListener, PgPool};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Notification channel the media trigger publishes on
pub const CHANNEL: &str = "media_changes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One row-level change to the media table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChange {
    pub op: ChangeOp,
    pub id: Uuid,
}

/// Fan-out of media changes to in-process subscribers
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<MediaChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaChange> {
        self.sender.subscribe()
    }

    /// Deliver a change to current subscribers; returns how many received it.
    pub fn publish(&self, change: MediaChange) -> usize {
        self.sender.send(change).unwrap_or(0)
    }

    /// Start the database listener. It runs until `shutdown` is cancelled.
    pub fn spawn_listener(&self, pool: PgPool, shutdown: CancellationToken) -> JoinHandle<()> {
        let feed = self.clone();
        tokio::spawn(async move {
            if let Err(e) = feed.listen(pool, shutdown).await {
                error!(error = %e, "Change feed listener stopped");
            }
        })
    }

    async fn listen(&self, pool: PgPool, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut listener = PgListener::connect_with(&pool)
            .await
            .context("Failed to connect change feed listener")?;
        listener
            .listen(CHANNEL)
            .await
            .context("Failed to LISTEN on media_changes")?;

        info!(channel = CHANNEL, "Change feed listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Change feed shutting down");
                    return Ok(());
                }
                notification = listener.recv() => match notification {
                    Ok(notification) => match parse_notification(notification.payload()) {
                        Ok(change) => {
                            let receivers = self.publish(change.clone());
                            debug!(op = ?change.op, id = %change.id, receivers, "Media change published");
                        }
                        Err(e) => warn!(error = %e, payload = notification.payload(), "Unreadable change notification"),
                    },
                    Err(e) => {
                        // The listener reconnects on the next recv.
                        warn!(error = %e, "Change feed connection lost");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Decode a `{"op": ..., "id": ...}` trigger payload
pub fn parse_notification(payload: &str) -> serde_json::Result<MediaChange> {
    serde_json::from_str(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_payload() {
        let id = Uuid::new_v4();
        let change = parse_notification(&format!(r#"{{"op" : "delete", "id" : "{id}"}}"#)).unwrap();
        assert_eq!(change, MediaChange { op: ChangeOp::Delete, id });

        assert!(parse_notification(r#"{"op": "truncate", "id": "x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let feed = ChangeFeed::new(8);
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();

        let change = MediaChange {
            op: ChangeOp::Insert,
            id: Uuid::new_v4(),
        };
        assert_eq!(feed.publish(change.clone()), 2);

        assert_eq!(first.recv().await.unwrap(), change);
        assert_eq!(second.recv().await.unwrap(), change);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = ChangeFeed::new(8);
        let change = MediaChange {
            op: ChangeOp::Update,
            id: Uuid::new_v4(),
        };
        assert_eq!(feed.publish(change), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let feed = ChangeFeed::new(1);
        let mut rx = feed.subscribe();
        for _ in 0..3 {
            feed.publish(MediaChange {
                op: ChangeOp::Insert,
                id: Uuid::new_v4(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
