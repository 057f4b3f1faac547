//! Authenticated session passed explicitly to every replica.

use std::fmt;
use std::sync::Arc;

use marksync_engine::OwnerId;

use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::persistence::Persistence;
use crate::transport::{HttpPersistence, WsChannel};

/// Owner identity plus the two boundaries it talks through.
#[derive(Clone)]
pub struct Session {
    pub owner_id: OwnerId,
    pub persistence: Arc<dyn Persistence>,
    pub channel: Arc<dyn Channel>,
}

impl Session {
    pub fn new(
        owner_id: impl Into<OwnerId>,
        persistence: Arc<dyn Persistence>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            persistence,
            channel,
        }
    }

    /// Session against a marksync server, authenticated as `owner_id`.
    pub fn connect(config: &ClientConfig, owner_id: impl Into<OwnerId>) -> Self {
        let owner_id = owner_id.into();
        let persistence = Arc::new(HttpPersistence::new(&config.api_url));
        let channel = Arc::new(WsChannel::new(&config.ws_url, owner_id.clone()));
        Self::new(owner_id, persistence, channel)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}
