//! Subscription gateway.
//!
//! Client sessions connect over WebSocket with an identity token, then
//! subscribe to per-job rooms (`generation:<id>`). A single bus
//! subscriber per API process relays every matching event to every
//! session currently joined to the named room.
//!
//! Room subscription is authorized by token validity only; the room label
//! carries no principal.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use draftmill_auth::TokenSigner;
use draftmill_bus::BusSubscriber;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-process mapping from room to live session senders.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<String>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a session to a room.
    pub async fn join(
        &self,
        room: &str,
        session: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(session, sender);
    }

    /// Remove a session from one room.
    pub async fn leave(&self, room: &str, session: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&session);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Remove a session from every room (socket closed).
    pub async fn leave_all(&self, session: Uuid) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&session);
            !members.is_empty()
        });
    }

    /// Write a frame to every member of a room; sessions whose channel is
    /// gone are pruned. Returns the number of live deliveries.
    pub async fn broadcast(&self, room: &str, frame: &str) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };
        let mut delivered = 0;
        members.retain(|_, sender| match sender.send(frame.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if members.is_empty() {
            rooms.remove(room);
        }
        delivered
    }

    /// Sessions currently joined to a room.
    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map_or(0, HashMap::len)
    }
}

/// Drain the bus subscriber into the room registry. One task per API
/// process, alive for the process lifetime.
pub async fn relay(registry: Arc<RoomRegistry>, mut subscriber: BusSubscriber) {
    while let Some(message) = subscriber.recv().await {
        let frame = serde_json::json!({
            "event": message.event,
            "data": message.data,
        })
        .to_string();
        let delivered = registry.broadcast(&message.room, &frame).await;
        debug!(room = %message.room, event = %message.event, delivered, "relayed event");
    }
    warn!("bus subscriber stream ended; gateway relay stopped");
}

/// Shared state for the WebSocket endpoint.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<RoomRegistry>,
    pub signer: TokenSigner,
}

#[derive(Deserialize)]
pub struct WsAuth {
    #[serde(default)]
    token: String,
}

/// Client→server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
    #[serde(rename = "generation:subscribe")]
    Subscribe {
        #[serde(rename = "generationId")]
        generation_id: Uuid,
    },
    #[serde(rename = "generation:unsubscribe")]
    Unsubscribe {
        #[serde(rename = "generationId")]
        generation_id: Uuid,
    },
}

/// `GET /ws?token=…` — upgrade after verifying the identity token.
pub async fn ws_handler(
    State(state): State<GatewayState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.signer.verify(&auth.token).is_err() {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let session = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { generation_id }) => {
                    let room = draftmill_types::generation_room(generation_id);
                    registry.join(&room, session, tx.clone()).await;
                    debug!(%session, %room, "session subscribed");
                }
                Ok(ClientFrame::Unsubscribe { generation_id }) => {
                    let room = draftmill_types::generation_room(generation_id);
                    registry.leave(&room, session).await;
                    debug!(%session, %room, "session unsubscribed");
                }
                Err(e) => {
                    debug!(%session, error = %e, "unparseable client frame");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    registry.leave_all(session).await;
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftmill_bus::{EventBus, LocalBus};

    #[tokio::test]
    async fn broadcast_reaches_joined_sessions_only() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.join("generation:1", a, tx_a).await;
        registry.join("generation:2", b, tx_b).await;

        let delivered = registry.broadcast("generation:1", "frame-1").await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap(), "frame-1");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_sessions_are_pruned_on_broadcast() {
        let registry = RoomRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let session = Uuid::new_v4();
        registry.join("generation:1", session, tx).await;

        assert_eq!(registry.broadcast("generation:1", "frame").await, 0);
        assert_eq!(registry.member_count("generation:1").await, 0);
    }

    #[tokio::test]
    async fn leave_all_clears_every_room() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        registry.join("generation:1", session, tx.clone()).await;
        registry.join("generation:2", session, tx).await;

        registry.leave_all(session).await;
        assert_eq!(registry.member_count("generation:1").await, 0);
        assert_eq!(registry.member_count("generation:2").await, 0);
    }

    #[tokio::test]
    async fn relay_fans_bus_events_into_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let bus = LocalBus::new();
        let subscriber = bus.subscriber();
        tokio::spawn(relay(registry.clone(), subscriber));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        registry.join("generation:abc", session, tx).await;

        bus.publish(
            "generation:abc",
            "generation:status",
            serde_json::json!({"progress": 42}),
        )
        .await;

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("frame in time")
            .expect("frame");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "generation:status");
        assert_eq!(value["data"]["progress"], 42);
    }

    #[test]
    fn client_frames_parse() {
        let id = Uuid::new_v4();
        let subscribe: ClientFrame = serde_json::from_str(&format!(
            r#"{{"action": "generation:subscribe", "generationId": "{id}"}}"#
        ))
        .expect("subscribe");
        assert!(matches!(subscribe, ClientFrame::Subscribe { generation_id } if generation_id == id));

        let bad = serde_json::from_str::<ClientFrame>(r#"{"action": "nope"}"#);
        assert!(bad.is_err());
    }
}
