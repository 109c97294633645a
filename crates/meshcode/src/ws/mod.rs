//! Real-time collaboration over WebSocket.

mod collab;
mod handler;
mod hub;
mod types;

pub use collab::CollabService;
pub use handler::ws_handler;
pub use hub::{ConnectionId, RoomHub, RoomId, WsSender};
pub use types::{WsCommand, WsEvent};
