//! Channel boundary to the pub-sub transport.
//!
//! A transport hands out one [`Subscription`] per topic. The subscription's
//! event stream ends after a [`LinkEvent::Dropped`]; re-establishing the
//! link is the caller's job.

use async_trait::async_trait;
use marksync_engine::{Notification, Topic};
use tokio::sync::mpsc;

use crate::error::Result;

/// Identifier of one transport-level subscription.
pub type SubscriptionId = u64;

/// Event on a subscribed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A notification published on the topic.
    Message(Notification),
    /// The link dropped. No further events follow.
    Dropped { reason: String },
}

/// A live subscription to one topic.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Best-effort publish/subscribe transport.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Subscribe to a topic. Resolves once the subscription is active.
    async fn subscribe(&self, topic: Topic) -> Result<Subscription>;

    /// Release a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Send a notification to every subscriber of `topic`, without waiting
    /// for delivery.
    async fn publish(&self, topic: &Topic, notification: &Notification) -> Result<()>;
}
