//! Channel subscription manager.
//!
//! Owns the one pub-sub link per owner and delivers every notification to a
//! registered handler. The handler sits in an [`ArcSwap`] cell and can be
//! replaced at any time; the link itself depends only on the owner id and
//! is torn down only when the owner changes or the manager is told to
//! unsubscribe. Replacing the handler never touches the transport.
//!
//! Two topics make up the link: the owner's broadcast topic and the
//! storage change feed. The change feed is never filtered by owner: a
//! redacted insert hint cannot be matched against a predicate, and a
//! filtered subscription would drop it instead of delivering it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use marksync_engine::{ConnectionStatus, Notification, OwnerId, Topic};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::channel::{Channel, LinkEvent, Subscription};
use crate::error::Result;

type HandlerFn = dyn Fn(Notification) + Send + Sync;

struct Handler {
    call: Box<HandlerFn>,
}

impl Handler {
    fn new(call: impl Fn(Notification) + Send + Sync + 'static) -> Self {
        Self {
            call: Box::new(call),
        }
    }

    fn noop() -> Self {
        Self::new(|_| {})
    }
}

/// Handle to the manager's active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    owner_id: OwnerId,
}

impl SubscriptionHandle {
    /// Owner the subscription is scoped to.
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }
}

struct Active {
    handle: SubscriptionHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Active {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!("Subscription task ended abnormally: {}", e);
        }
    }
}

/// Keeps one subscription per owner alive and routes notifications.
pub struct ChannelSubscriptionManager {
    channel: Arc<dyn Channel>,
    handler: Arc<ArcSwap<Handler>>,
    status: watch::Sender<ConnectionStatus>,
    active: Mutex<Option<Active>>,
    next_handle: AtomicU64,
    reconnect_delay: Duration,
}

impl ChannelSubscriptionManager {
    /// Create a manager over a transport.
    pub fn new(channel: Arc<dyn Channel>, reconnect_delay: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            channel,
            handler: Arc::new(ArcSwap::from_pointee(Handler::noop())),
            status,
            active: Mutex::new(None),
            next_handle: AtomicU64::new(1),
            reconnect_delay,
        }
    }

    /// Subscribe for `owner_id`, delivering notifications to `handler`.
    ///
    /// Idempotent per owner: while a subscription for the same owner exists
    /// this only swaps the handler and returns the existing handle. A
    /// different owner replaces the subscription.
    pub async fn subscribe(
        &self,
        owner_id: &str,
        handler: impl Fn(Notification) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.handle.owner_id == owner_id {
                self.set_handler(handler);
                tracing::debug!(
                    owner_id = %owner_id,
                    "Subscription already active, handler replaced"
                );
                return current.handle.clone();
            }
        }

        if let Some(previous) = active.take() {
            tracing::info!(
                from = %previous.handle.owner_id,
                to = %owner_id,
                "Owner changed, replacing subscription"
            );
            previous.stop().await;
        }

        self.set_handler(handler);

        let handle = SubscriptionHandle {
            id: self.next_handle.fetch_add(1, Ordering::SeqCst),
            owner_id: owner_id.to_string(),
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let link = Link {
            channel: self.channel.clone(),
            owner_id: handle.owner_id.clone(),
            handler: self.handler.clone(),
            status: self.status.clone(),
            reconnect_delay: self.reconnect_delay,
        };
        let task = tokio::spawn(link.run(shutdown_rx));

        *active = Some(Active {
            handle: handle.clone(),
            shutdown,
            task,
        });

        handle
    }

    /// Replace the notification handler in place. The link is untouched.
    pub fn set_handler(&self, handler: impl Fn(Notification) + Send + Sync + 'static) {
        self.handler.store(Arc::new(Handler::new(handler)));
    }

    /// Release the subscription behind `handle`.
    ///
    /// Safe to call repeatedly and with stale handles.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut active = self.active.lock().await;
        let matches = active
            .as_ref()
            .map(|current| &current.handle == handle)
            .unwrap_or(false);

        if matches {
            if let Some(current) = active.take() {
                current.stop().await;
                tracing::info!(owner_id = %handle.owner_id, "Unsubscribed");
            }
        }
    }

    /// Best-effort publish on the owner's topic.
    ///
    /// Returns `Ok(false)` without sending when the link is not `Live` or
    /// `owner_id` is not the subscribed owner. There is no queue and no
    /// retry: a notification published while disconnected is lost, and
    /// peers catch up on their next reconciliation fetch.
    pub async fn publish(&self, owner_id: &str, notification: &Notification) -> Result<bool> {
        let subscribed = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .map(|current| current.handle.owner_id == owner_id)
                .unwrap_or(false)
        };

        if !subscribed || self.current_status() != ConnectionStatus::Live {
            tracing::debug!(
                owner_id = %owner_id,
                kind = notification.kind(),
                "Link not live, dropping publish"
            );
            return Ok(false);
        }

        self.channel
            .publish(&Topic::owner(owner_id), notification)
            .await?;
        Ok(true)
    }

    /// Current link status.
    pub fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch link status transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Handle of the active subscription, if any.
    pub async fn active_handle(&self) -> Option<SubscriptionHandle> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| current.handle.clone())
    }
}

/// Why a live link ended.
enum LinkEnd {
    Shutdown,
    Dropped(String),
}

/// The link task for one owner.
struct Link {
    channel: Arc<dyn Channel>,
    owner_id: OwnerId,
    handler: Arc<ArcSwap<Handler>>,
    status: watch::Sender<ConnectionStatus>,
    reconnect_delay: Duration,
}

impl Link {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            self.status.send_replace(ConnectionStatus::Connecting);

            match self.connect().await {
                Ok((broadcasts, changes)) => {
                    let ids = [broadcasts.id, changes.id];
                    self.status.send_replace(ConnectionStatus::Live);
                    tracing::info!(owner_id = %self.owner_id, "Subscription live");

                    let end = self.pump(broadcasts, changes, &mut shutdown).await;
                    self.release(&ids).await;
                    self.status.send_replace(ConnectionStatus::Disconnected);

                    match end {
                        LinkEnd::Shutdown => return,
                        LinkEnd::Dropped(reason) => {
                            tracing::warn!(
                                owner_id = %self.owner_id,
                                reason = %reason,
                                "Subscription dropped"
                            );
                        }
                    }
                }
                Err(e) => {
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    tracing::warn!(owner_id = %self.owner_id, "Failed to subscribe: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = &mut shutdown => return,
            }
        }
    }

    /// Subscribe to the owner topic and the unscoped change feed.
    async fn connect(&self) -> Result<(Subscription, Subscription)> {
        let broadcasts = self.channel.subscribe(Topic::owner(&self.owner_id)).await?;
        match self.channel.subscribe(Topic::ChangeFeed).await {
            Ok(changes) => Ok((broadcasts, changes)),
            Err(e) => {
                self.release(&[broadcasts.id]).await;
                Err(e)
            }
        }
    }

    async fn pump(
        &self,
        mut broadcasts: Subscription,
        mut changes: Subscription,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> LinkEnd {
        loop {
            let event = tokio::select! {
                _ = &mut *shutdown => return LinkEnd::Shutdown,
                event = broadcasts.events.recv() => event,
                event = changes.events.recv() => event,
            };

            match event {
                Some(LinkEvent::Message(notification)) => {
                    tracing::trace!(kind = notification.kind(), "Delivering notification");
                    let handler = self.handler.load();
                    (handler.call)(notification);
                }
                Some(LinkEvent::Dropped { reason }) => return LinkEnd::Dropped(reason),
                None => return LinkEnd::Dropped("event stream closed".to_string()),
            }
        }
    }

    async fn release(&self, ids: &[u64]) {
        for id in ids {
            if let Err(e) = self.channel.unsubscribe(*id).await {
                tracing::warn!(subscription = id, "Failed to release subscription: {}", e);
            }
        }
    }
}
