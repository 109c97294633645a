//! Room registry for WebSocket connections.
//!
//! A connection joins at most one project room and any number of file rooms
//! of that project. Broadcasts take a snapshot of the room members and then
//! send, so no lock is held while delivering.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::types::WsEvent;
use crate::workspace::RelativePath;

/// Identifies one WebSocket connection for the lifetime of the process.
pub type ConnectionId = u64;

/// A sender for WebSocket messages to a specific connection.
///
/// Unbounded so that broadcasting never waits on a slow client.
pub type WsSender = mpsc::UnboundedSender<WsEvent>;

/// A broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Everyone looking at a project's tree.
    Project(String),
    /// Everyone editing one file.
    File { project: String, path: RelativePath },
}

impl RoomId {
    pub fn project(project_id: impl Into<String>) -> Self {
        RoomId::Project(project_id.into())
    }

    pub fn file(project_id: impl Into<String>, path: RelativePath) -> Self {
        RoomId::File {
            project: project_id.into(),
            path,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            RoomId::Project(project) | RoomId::File { project, .. } => project,
        }
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomId::Project(project) => write!(f, "project-{}", project),
            RoomId::File { project, path } => write!(f, "file-{}-{}", project, path),
        }
    }
}

struct Connection {
    user_id: String,
    tx: WsSender,
}

pub struct RoomHub {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the connection id and the receiver for events targeted at it.
    pub fn register(&self, user_id: &str) -> (ConnectionId, mpsc::UnboundedReceiver<WsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            conn_id,
            Connection {
                user_id: user_id.to_string(),
                tx,
            },
        );
        info!("Registered connection {} for user {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Drop a connection and all of its room memberships.
    pub fn unregister(&self, conn_id: ConnectionId) {
        self.leave_all(conn_id);
        if let Some((_, conn)) = self.connections.remove(&conn_id) {
            info!(
                "Unregistered connection {} for user {}",
                conn_id, conn.user_id
            );
        }
    }

    pub fn user_id(&self, conn_id: ConnectionId) -> Option<String> {
        self.connections.get(&conn_id).map(|c| c.user_id.clone())
    }

    pub fn join(&self, conn_id: ConnectionId, room: RoomId) {
        self.rooms.entry(room.clone()).or_default().insert(conn_id);
        debug!("Connection {} joined {}", conn_id, room);
        self.memberships.entry(conn_id).or_default().insert(room);
    }

    pub fn leave(&self, conn_id: ConnectionId, room: &RoomId) {
        let emptied = match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.remove(&conn_id);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        if let Some(mut rooms) = self.memberships.get_mut(&conn_id) {
            rooms.remove(room);
        }
        debug!("Connection {} left {}", conn_id, room);
    }

    /// Join a project room, leaving every room of any other project.
    pub fn join_project(&self, conn_id: ConnectionId, project_id: &str) {
        let stale: Vec<RoomId> = self
            .rooms_of(conn_id)
            .into_iter()
            .filter(|room| room.project_id() != project_id)
            .collect();
        for room in &stale {
            self.leave(conn_id, room);
        }
        self.join(conn_id, RoomId::project(project_id));
    }

    pub fn leave_all(&self, conn_id: ConnectionId) {
        for room in self.rooms_of(conn_id) {
            self.leave(conn_id, &room);
        }
        self.memberships.remove(&conn_id);
    }

    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<RoomId> {
        self.memberships
            .get(&conn_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, conn_id: ConnectionId, room: &RoomId) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(&conn_id))
            .unwrap_or(false)
    }

    /// Send an event to one connection.
    pub fn send_to(&self, conn_id: ConnectionId, event: WsEvent) -> bool {
        let Some(conn) = self.connections.get(&conn_id) else {
            return false;
        };
        if conn.tx.send(event).is_err() {
            warn!("Failed to send event to connection {}", conn_id);
            return false;
        }
        true
    }

    /// Send an event to every member of a room, optionally skipping one.
    ///
    /// Returns the number of connections the event was delivered to.
    pub fn broadcast(&self, room: &RoomId, event: WsEvent, except: Option<ConnectionId>) -> usize {
        let members = self.members(room);
        members
            .into_iter()
            .filter(|id| Some(*id) != except)
            .filter(|id| self.send_to(*id, event.clone()))
            .count()
    }

    /// Drop every room of a project. Members stay connected.
    pub fn close_project(&self, project_id: &str) {
        let rooms: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|e| e.key().project_id() == project_id)
            .map(|e| e.key().clone())
            .collect();
        for room in rooms {
            for conn_id in self.members(&room) {
                self.leave(conn_id, &room);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}
