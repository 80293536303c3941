//! Connections and per-session broadcast rooms.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use ulid::Ulid;

use super::events::ServerEvent;

/// Room name for a session's participants.
pub fn session_room(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// One authenticated client connection.
///
/// Holds the outbound channel to the connection's writer task; the socket
/// itself never leaves the I/O loop.
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub email: String,
    session_id: Mutex<Option<String>>,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Connection {
    pub fn new(user_id: String, email: String, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: format!("conn-{}", Ulid::new().to_string().to_lowercase()),
            user_id,
            email,
            session_id: Mutex::new(None),
            outbound,
        }
    }

    /// Send an event to this connection. A closed channel means the client
    /// is gone; that is logged, not an error.
    pub async fn send(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(conn_id = %self.id, "dropping event for disconnected client");
        }
    }

    /// The session this connection has joined, if any.
    pub fn joined_session(&self) -> Option<String> {
        match self.session_id.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_session(&self, session_id: &str) {
        match self.session_id.lock() {
            Ok(mut guard) => *guard = Some(session_id.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(session_id.to_string()),
        }
    }
}

/// Broadcast groups keyed by room name. Owned by the gateway instance so
/// tests get isolated registries.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, HashMap<String, Arc<Connection>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, conn: Arc<Connection>) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn.id.clone(), conn);
    }

    /// Remove a connection from a room; the room itself is dropped once empty.
    pub fn leave(&self, room: &str, conn_id: &str) {
        let emptied = match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.remove(conn_id);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Whether the room has any member other than the given connection.
    pub fn has_other_members(&self, room: &str, conn_id: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.keys().any(|id| id != conn_id))
    }

    /// Send an event to every member belonging to a user other than the
    /// sender. Returns how many connections were reached.
    pub async fn broadcast_to_other_users(
        &self,
        room: &str,
        sender_id: &str,
        event: ServerEvent,
    ) -> usize {
        let members: Vec<Arc<Connection>> = match self.rooms.get(room) {
            Some(members) => members
                .values()
                .filter(|conn| conn.user_id != sender_id)
                .cloned()
                .collect(),
            None => return 0,
        };
        let reached = members.len();
        for conn in members {
            conn.send(event.clone()).await;
        }
        reached
    }

    /// Fan an event out to every room member, in emission order, optionally
    /// skipping one connection.
    pub async fn broadcast(&self, room: &str, event: ServerEvent, exclude: Option<&str>) {
        let members: Vec<Arc<Connection>> = match self.rooms.get(room) {
            Some(members) => members
                .values()
                .filter(|conn| exclude != Some(conn.id.as_str()))
                .cloned()
                .collect(),
            None => {
                warn!(room, "broadcast to unknown room");
                return;
            }
        };
        for conn in members {
            conn.send(event.clone()).await;
        }
    }
}
