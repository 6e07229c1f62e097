//! Process-crossing event fan-out.
//!
//! Every worker publishes job events to a single well-known pub/sub channel
//! ([`draftmill_types::EVENT_CHANNEL`]); every API process holds one
//! long-lived subscriber and relays matching events to its local sessions.
//!
//! Delivery is fire-and-forget, at-most-once, best-effort: a publish error
//! is logged and swallowed, never surfaced into pipeline control flow.
//! Order is preserved per publisher; nothing is replayed.
//!
//! Two implementations: [`RedisBus`] for multi-process deployments and
//! [`LocalBus`] for tests and collocated single-process runs.

use async_trait::async_trait;
use draftmill_types::{BusMessage, EVENT_CHANNEL};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Errors from bus connection setup. Publishing itself never errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("redis connection failed: {0}")]
    Connect(#[from] redis::RedisError),
}

/// Fire-and-forget room/event publication.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to a room. At-most-once; errors are swallowed.
    async fn publish(&self, room: &str, event: &str, data: serde_json::Value);
}

/// A drained stream of bus messages, however the bus is backed.
pub struct BusSubscriber {
    rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscriber {
    /// Receive the next message; `None` when the feeding connection closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Event bus over a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisBus {
    conn: redis::aio::ConnectionManager,
}

impl RedisBus {
    /// Connect a publisher. The connection manager reconnects on failure;
    /// messages published while disconnected are dropped (at-most-once).
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Open a dedicated subscriber connection on the event channel.
    ///
    /// A background task drains the Redis stream into the returned
    /// subscriber; undecodable payloads are logged and skipped.
    pub async fn subscribe(url: &str) -> Result<BusSubscriber, BusError> {
        let client = redis::Client::open(url)?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(EVENT_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "bus payload was not a string");
                        continue;
                    }
                };
                match serde_json::from_str::<BusMessage>(&payload) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable bus message"),
                }
            }
            debug!("bus subscriber stream ended");
        });

        Ok(BusSubscriber { rx })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, room: &str, event: &str, data: serde_json::Value) {
        let message = BusMessage {
            room: room.to_string(),
            event: event.to_string(),
            data,
        };
        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unencodable bus message");
                return;
            }
        };
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> =
            redis::AsyncCommands::publish(&mut conn, EVENT_CHANNEL, payload).await;
        if let Err(e) = result {
            warn!(room, event, error = %e, "bus publish dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Local (in-process)
// ---------------------------------------------------------------------------

/// In-process bus on a broadcast channel. Collocated deployments and tests
/// get the same at-most-once semantics without a Redis round trip.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Open a subscriber over everything published after this call.
    pub fn subscriber(&self) -> BusSubscriber {
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    // Lagged receivers skip; at-most-once allows it.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "local bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        BusSubscriber { rx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, room: &str, event: &str, data: serde_json::Value) {
        let message = BusMessage {
            room: room.to_string(),
            event: event.to_string(),
            data,
        };
        // An error just means nobody is subscribed right now.
        let _ = self.tx.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn local_bus_delivers_to_subscriber() {
        let bus = LocalBus::new();
        let mut sub = bus.subscriber();
        bus.publish("generation:1", "generation:log", json!({"m": 1}))
            .await;
        let msg = sub.recv().await.expect("message");
        assert_eq!(msg.room, "generation:1");
        assert_eq!(msg.event, "generation:log");
        assert_eq!(msg.data["m"], 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = LocalBus::new();
        bus.publish("generation:2", "generation:status", json!({}))
            .await;
        // nothing to assert: fire-and-forget must not error or panic
    }

    #[tokio::test]
    async fn per_publisher_order_is_preserved() {
        let bus = LocalBus::new();
        let mut sub = bus.subscriber();
        for i in 0..10 {
            bus.publish("generation:3", "generation:log", json!({"seq": i}))
                .await;
        }
        for i in 0..10 {
            let msg = sub.recv().await.expect("message");
            assert_eq!(msg.data["seq"], i);
        }
    }

    #[tokio::test]
    async fn each_subscriber_sees_every_message() {
        let bus = LocalBus::new();
        let mut a = bus.subscriber();
        let mut b = bus.subscriber();
        bus.publish("generation:4", "generation:blocks", json!({"n": 7}))
            .await;
        assert_eq!(a.recv().await.expect("a").data["n"], 7);
        assert_eq!(b.recv().await.expect("b").data["n"], 7);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_messages() {
        let bus = LocalBus::new();
        bus.publish("generation:5", "generation:log", json!({"early": true}))
            .await;
        let mut sub = bus.subscriber();
        bus.publish("generation:5", "generation:log", json!({"late": true}))
            .await;
        let msg = sub.recv().await.expect("message");
        assert_eq!(msg.data["late"], true);
    }
}
