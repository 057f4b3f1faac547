//! Request handlers for records and the pub-sub hub.

mod records;
mod websocket;

pub use records::*;
pub use websocket::*;
