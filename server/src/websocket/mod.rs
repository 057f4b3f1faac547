//! WebSocket pub-sub hub.
//!
//! Clients open one socket per subscription and exchange the JSON messages
//! defined in `marksync_engine::protocol`.

mod manager;

pub use manager::ConnectionManager;
pub use marksync_engine::{ClientMessage, ServerMessage};
