//! # marksync client
//!
//! Replica runtime that keeps every open client of one session in sync with
//! the source of truth. Each client holds a [`ReplicaStore`] built on the
//! engine's [`marksync_engine::Replica`]:
//!
//! - local writes are applied optimistically, then persisted;
//! - peers learn about them through the [`ChannelSubscriptionManager`];
//! - ambiguous or lost notifications are repaired by the
//!   [`ReconciliationFetcher`].
//!
//! ## Quick start
//!
//! ```no_run
//! use marksync_client::{ClientConfig, ReplicaStore, Session};
//! use marksync_engine::RecordDraft;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let session = Session::connect(&config, "alice");
//!
//! let fetcher = marksync_client::ReconciliationFetcher::new(session.persistence.clone());
//! let seed = fetcher.fetch(&session.owner_id).await?;
//!
//! let store = ReplicaStore::start(session, seed, &config).await;
//! store
//!     .request_insert(RecordDraft::new("Rust", "https://www.rust-lang.org"))
//!     .await?;
//!
//! let mut changes = store.subscribe_changes();
//! while changes.changed().await.is_ok() {
//!     println!("{} bookmarks", changes.borrow().snapshot.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod persistence;
pub mod session;
pub mod store;
pub mod transport;

pub use channel::{Channel, LinkEvent, Subscription, SubscriptionId};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use fetcher::ReconciliationFetcher;
pub use manager::{ChannelSubscriptionManager, SubscriptionHandle};
pub use persistence::Persistence;
pub use session::Session;
pub use store::{ReplicaStore, StoreEvent, StoreView};
pub use transport::{HttpPersistence, MemoryBackend, WsChannel};
