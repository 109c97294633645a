//! Meshcode server library
//!
//! Bridges collaborative editors to per-project containers: file trees and
//! content are read and written inside the container, edits are cached and
//! flushed in the background, and terminals are relayed over WebSocket.

pub mod api;
pub mod cache;
pub mod container;
pub mod db;
pub mod flush;
pub mod project;
pub mod terminal;
pub mod workspace;
pub mod ws;
