//! Concrete transports for the persistence and channel boundaries.

mod http;
mod memory;
mod ws;

pub use http::HttpPersistence;
pub use memory::MemoryBackend;
pub use ws::WsChannel;
