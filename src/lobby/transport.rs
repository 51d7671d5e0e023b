//! Outbound delivery seam between the coordinator and the WebSocket actors.

use super::model::ConnectionId;
use crate::protocol::ServerMessage;
use actix::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{trace, warn};

/// Delivery to single connections and to lobby rooms.
///
/// Sends never block: messages are queued on the receiving side.
pub trait Transport: Send + Sync {
    fn emit_to(&self, connection_id: &ConnectionId, message: &ServerMessage);
    fn broadcast(&self, lobby_id: &str, message: &ServerMessage);
    fn join_room(&self, lobby_id: &str, connection_id: &ConnectionId);
    fn leave_room(&self, lobby_id: &str, connection_id: &ConnectionId);
    fn close_room(&self, lobby_id: &str);
}

/// Serialized message for a connection actor.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct Outbound(pub String);

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, Recipient<Outbound>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Maps connection ids to actor mailboxes and lobby ids to member sets.
#[derive(Default)]
pub struct ConnectionHub {
    inner: Mutex<HubInner>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, connection_id: ConnectionId, recipient: Recipient<Outbound>) {
        self.lock().connections.insert(connection_id, recipient);
    }

    /// Forget a connection and drop it from every room.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        let mut inner = self.lock();
        inner.connections.remove(connection_id);
        inner.rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn room_members(&self, lobby_id: &str) -> Vec<ConnectionId> {
        self.lock()
            .rooms
            .get(lobby_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    fn encode(message: &ServerMessage) -> Option<String> {
        match serde_json::to_string(message) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(kind = message.kind(), "Failed to serialize outbound message: {}", e);
                None
            }
        }
    }
}

impl Transport for ConnectionHub {
    fn emit_to(&self, connection_id: &ConnectionId, message: &ServerMessage) {
        let Some(json) = Self::encode(message) else {
            return;
        };
        match self.lock().connections.get(connection_id) {
            Some(recipient) => {
                trace!(%connection_id, kind = message.kind(), "Emit");
                recipient.do_send(Outbound(json));
            }
            None => warn!(%connection_id, kind = message.kind(), "Emit to unknown connection"),
        }
    }

    fn broadcast(&self, lobby_id: &str, message: &ServerMessage) {
        let Some(json) = Self::encode(message) else {
            return;
        };
        let inner = self.lock();
        let Some(members) = inner.rooms.get(lobby_id) else {
            return;
        };
        trace!(lobby_id, kind = message.kind(), members = members.len(), "Broadcast");
        for member in members {
            if let Some(recipient) = inner.connections.get(member) {
                recipient.do_send(Outbound(json.clone()));
            }
        }
    }

    fn join_room(&self, lobby_id: &str, connection_id: &ConnectionId) {
        self.lock()
            .rooms
            .entry(lobby_id.to_string())
            .or_default()
            .insert(*connection_id);
    }

    fn leave_room(&self, lobby_id: &str, connection_id: &ConnectionId) {
        let mut inner = self.lock();
        if let Some(members) = inner.rooms.get_mut(lobby_id) {
            members.remove(connection_id);
            if members.is_empty() {
                inner.rooms.remove(lobby_id);
            }
        }
    }

    fn close_room(&self, lobby_id: &str) {
        self.lock().rooms.remove(lobby_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_rooms_track_membership() {
        let hub = ConnectionHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        hub.join_room("ROOM01", &a);
        hub.join_room("ROOM01", &b);
        assert_eq!(hub.room_members("ROOM01").len(), 2);

        hub.leave_room("ROOM01", &a);
        assert_eq!(hub.room_members("ROOM01"), vec![b]);

        hub.unregister(&b);
        assert!(hub.room_members("ROOM01").is_empty());

        hub.join_room("ROOM02", &a);
        hub.close_room("ROOM02");
        assert!(hub.room_members("ROOM02").is_empty());
    }

    #[test]
    fn test_emit_to_unknown_connection_is_ignored() {
        let hub = ConnectionHub::new();
        hub.emit_to(&Uuid::new_v4(), &ServerMessage::Pong { timestamp: 1 });
        hub.broadcast("NOPE00", &ServerMessage::Pong { timestamp: 1 });
        assert_eq!(hub.connection_count(), 0);
    }
}
