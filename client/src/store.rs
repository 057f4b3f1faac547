//! Replica store - the async runtime around [`Replica`].
//!
//! One tokio task owns the replica and consumes a command queue. Persistence
//! calls and reconciliation fetches run in spawned tasks and post their
//! completion back to the queue, so notifications are applied in arrival
//! order and no transition ever waits on the network.
//!
//! ```text
//!  request_insert ─┐                       ┌─> persistence.insert ─┐
//!  request_delete ─┼─> command queue ─> task ─> fetcher.fetch ─────┼─> command queue
//!  notifications ──┘          ^                                    │
//!                             └────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use marksync_engine::{
    ConnectionStatus, FetchSeq, IgnoreReason, Notification, OwnerId, Outcome, Record, RecordDraft,
    RecordId, Replica, ReplicaSnapshot,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::fetcher::ReconciliationFetcher;
use crate::manager::{ChannelSubscriptionManager, SubscriptionHandle};
use crate::session::Session;

const EVENT_CAPACITY: usize = 64;

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreView {
    pub snapshot: ReplicaSnapshot,
    pub status: ConnectionStatus,
}

/// Side events surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A write or fetch failed; local state was rolled back or left as is.
    TransientFailure { message: String },
    /// A reconciliation fetch replaced the snapshot.
    Reconciled { seq: FetchSeq },
    /// A superseded reconciliation result was dropped.
    StaleFetchDiscarded { seq: FetchSeq },
}

enum Command {
    Insert {
        draft: RecordDraft,
        reply: oneshot::Sender<Result<Record>>,
    },
    InsertSettled {
        record: Record,
        result: Result<Record>,
        reply: oneshot::Sender<Result<Record>>,
    },
    Delete {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteSettled {
        id: RecordId,
        result: Result<()>,
        reply: oneshot::Sender<Result<()>>,
    },
    Notify(Notification),
    FetchDone {
        seq: FetchSeq,
        result: Result<ReplicaSnapshot>,
    },
    Reconcile,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running replica.
pub struct ReplicaStore {
    owner_id: OwnerId,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<StoreView>,
    events: broadcast::Sender<StoreEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicaStore {
    /// Initialize a replica from `seed` and start its runtime.
    ///
    /// The seed comes from the server (typically a reconciliation fetch
    /// done before the first render); no fetch is issued here.
    pub async fn start(session: Session, seed: ReplicaSnapshot, config: &ClientConfig) -> Self {
        let owner_id = session.owner_id.clone();

        let mut replica = Replica::new(owner_id.clone());
        replica.initialize(seed);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(StoreView {
            snapshot: replica.snapshot().clone(),
            status: replica.status(),
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let manager = Arc::new(ChannelSubscriptionManager::new(
            session.channel.clone(),
            config.reconnect_delay,
        ));

        let weak = commands.downgrade();
        let subscription = manager
            .subscribe(&owner_id, move |notification| {
                if let Some(commands) = weak.upgrade() {
                    let _ = commands.send(Command::Notify(notification));
                }
            })
            .await;

        let status = manager.status();
        let runtime = Runtime {
            replica,
            fetcher: ReconciliationFetcher::new(session.persistence.clone()),
            session,
            manager,
            subscription,
            commands: commands.downgrade(),
            view: view_tx,
            events: events.clone(),
            deferred_deletes: Vec::new(),
            seen_live: false,
        };
        let task = tokio::spawn(runtime.run(commands_rx, status, config.reconcile_interval));

        tracing::info!(owner_id = %owner_id, "Replica store started");

        Self {
            owner_id,
            commands,
            view,
            events,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// The snapshot as currently rendered.
    pub fn current_snapshot(&self) -> ReplicaSnapshot {
        self.view.borrow().snapshot.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.view.borrow().status
    }

    /// Insert a record.
    ///
    /// The record is visible in the snapshot immediately; the returned
    /// future resolves once persistence settles. On failure the optimistic
    /// record has already been rolled back.
    pub async fn request_insert(&self, draft: RecordDraft) -> Result<Record> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Insert { draft, reply })?;
        rx.await.map_err(|_| ClientError::StoreClosed)?
    }

    /// Delete a record. Deleting an absent id succeeds.
    ///
    /// On failure the snapshot is resynchronized with a reconciliation fetch.
    pub async fn request_delete(&self, id: impl Into<RecordId>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Delete {
            id: id.into(),
            reply,
        })?;
        rx.await.map_err(|_| ClientError::StoreClosed)?
    }

    /// Watch snapshot and status changes.
    pub fn subscribe_changes(&self) -> watch::Receiver<StoreView> {
        self.view.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Issue a reconciliation fetch now.
    pub fn reconcile(&self) -> Result<()> {
        self.send(Command::Reconcile)
    }

    /// Release the subscription and stop the runtime. Idempotent.
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = task.await {
            tracing::warn!(owner_id = %self.owner_id, "Replica task ended abnormally: {}", e);
        }

        tracing::info!(owner_id = %self.owner_id, "Replica store stopped");
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::StoreClosed)
    }
}

/// State owned by the store task.
struct Runtime {
    replica: Replica,
    session: Session,
    fetcher: ReconciliationFetcher,
    manager: Arc<ChannelSubscriptionManager>,
    subscription: SubscriptionHandle,
    commands: mpsc::WeakUnboundedSender<Command>,
    view: watch::Sender<StoreView>,
    events: broadcast::Sender<StoreEvent>,
    /// Deletes held back until the insert of the same id settles
    deferred_deletes: Vec<(RecordId, oneshot::Sender<Result<()>>)>,
    seen_live: bool,
}

impl Runtime {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut status: watch::Receiver<ConnectionStatus>,
        reconcile_interval: Option<Duration>,
    ) {
        let mut interval = reconcile_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        let initial = *status.borrow_and_update();
        self.on_status(initial);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.close().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                Ok(()) = status.changed() => {
                    let current = *status.borrow_and_update();
                    self.on_status(current);
                }
                _ = tick(&mut interval) => self.reconcile("periodic"),
            }
        }

        self.close().await;
    }

    async fn close(&mut self) {
        self.manager.unsubscribe(&self.subscription).await;
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Insert { draft, reply } => self.insert(draft, reply),
            Command::InsertSettled {
                record,
                result,
                reply,
            } => self.insert_settled(record, result, reply),
            Command::Delete { id, reply } => self.delete(id, reply),
            Command::DeleteSettled { id, result, reply } => {
                self.delete_settled(id, result, reply)
            }
            Command::Notify(notification) => self.notify(notification),
            Command::FetchDone { seq, result } => self.fetch_done(seq, result),
            Command::Reconcile => self.reconcile("requested"),
            Command::Shutdown { .. } => {}
        }
    }

    fn insert(&mut self, draft: RecordDraft, reply: oneshot::Sender<Result<Record>>) {
        let record = Record::from_draft(
            Uuid::new_v4().to_string(),
            self.replica.owner_id().clone(),
            draft,
            now_ms(),
        );

        match self.replica.apply_local_insert(record.clone()) {
            Ok(true) => self.publish_view(),
            Ok(false) => {}
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        }

        let Some(commands) = self.commands.upgrade() else {
            let _ = reply.send(Err(ClientError::StoreClosed));
            return;
        };
        let persistence = self.session.persistence.clone();
        let owner_id = self.session.owner_id.clone();

        tokio::spawn(async move {
            let result = persistence.insert(&owner_id, &record).await;
            let _ = commands.send(Command::InsertSettled {
                record,
                result,
                reply,
            });
        });
    }

    fn insert_settled(
        &mut self,
        record: Record,
        result: Result<Record>,
        reply: oneshot::Sender<Result<Record>>,
    ) {
        match result {
            Ok(stored) => {
                self.replica.settle_insert(&record.id, true);
                self.notify(Notification::LocalInsertAck {
                    record: stored.clone(),
                });

                if self.release_deferred_deletes(&record.id) {
                    let _ = reply.send(Ok(stored));
                    return;
                }

                let manager = self.manager.clone();
                let owner_id = self.session.owner_id.clone();
                let broadcast = Notification::RemoteInsertBroadcast {
                    record: stored.clone(),
                };
                tokio::spawn(async move {
                    match manager.publish(&owner_id, &broadcast).await {
                        Ok(true) => {}
                        Ok(false) => tracing::debug!(
                            owner_id = %owner_id,
                            "Insert broadcast skipped, link not live"
                        ),
                        Err(e) => {
                            tracing::warn!(owner_id = %owner_id, "Insert broadcast failed: {}", e)
                        }
                    }
                });

                let _ = reply.send(Ok(stored));
            }
            Err(e) => {
                tracing::warn!(id = %record.id, "Insert failed, rolling back: {}", e);
                if self.replica.settle_insert(&record.id, false) {
                    self.publish_view();
                }
                self.fail(format!("Could not save \"{}\": {}", record.title, e));
                self.release_deferred_deletes(&record.id);
                let _ = reply.send(Err(e));
            }
        }
    }

    fn delete(&mut self, id: RecordId, reply: oneshot::Sender<Result<()>>) {
        match self.replica.apply_local_delete(&id) {
            Ok(Some(_)) => self.publish_view(),
            Ok(None) => {}
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        }

        // Storage must see the insert first, or the delete is a no-op there
        // and the row outlives it.
        if self.replica.is_pending_insert(&id) {
            tracing::debug!(id = %id, "Delete deferred until insert settles");
            self.deferred_deletes.push((id, reply));
            return;
        }
        self.spawn_delete(id, reply);
    }

    /// Send deletes held back for `id`. Returns `true` if there were any.
    fn release_deferred_deletes(&mut self, id: &str) -> bool {
        let (ready, waiting) = std::mem::take(&mut self.deferred_deletes)
            .into_iter()
            .partition::<Vec<_>, _>(|(deferred, _)| deferred == id);
        self.deferred_deletes = waiting;

        let released = !ready.is_empty();
        for (id, reply) in ready {
            self.spawn_delete(id, reply);
        }
        released
    }

    fn spawn_delete(&self, id: RecordId, reply: oneshot::Sender<Result<()>>) {
        let Some(commands) = self.commands.upgrade() else {
            let _ = reply.send(Err(ClientError::StoreClosed));
            return;
        };
        let persistence = self.session.persistence.clone();
        let owner_id = self.session.owner_id.clone();

        tokio::spawn(async move {
            let result = persistence.delete(&owner_id, &id).await;
            let _ = commands.send(Command::DeleteSettled { id, result, reply });
        });
    }

    fn delete_settled(
        &mut self,
        id: RecordId,
        result: Result<()>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        match result {
            Ok(()) => {
                self.replica.settle_delete(&id, true);
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                tracing::warn!(id = %id, "Delete failed, resynchronizing: {}", e);
                self.replica.settle_delete(&id, false);
                self.fail(format!("Could not delete bookmark: {}", e));
                self.reconcile("delete failed");
                let _ = reply.send(Err(e));
            }
        }
    }

    fn notify(&mut self, notification: Notification) {
        let kind = notification.kind();
        match self.replica.apply(notification) {
            Ok(Outcome::ReconcileNeeded) => self.reconcile("redacted insert"),
            Ok(outcome) if outcome.changed() => self.publish_view(),
            Ok(outcome) => tracing::trace!(kind, ?outcome, "Notification ignored"),
            Err(e) => tracing::warn!(kind, "Failed to apply notification: {}", e),
        }
    }

    /// Issue a fetch. Any result from an earlier fetch becomes stale.
    fn reconcile(&mut self, reason: &'static str) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let seq = self.replica.begin_fetch();
        let fetcher = self.fetcher.clone();
        let owner_id = self.session.owner_id.clone();

        tracing::debug!(owner_id = %owner_id, seq, reason, "Reconciliation fetch issued");

        tokio::spawn(async move {
            let result = fetcher.fetch(&owner_id).await;
            let _ = commands.send(Command::FetchDone { seq, result });
        });
    }

    fn fetch_done(&mut self, seq: FetchSeq, result: Result<ReplicaSnapshot>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(seq, "Reconciliation fetch failed, snapshot unchanged: {}", e);
                self.fail(format!("Could not refresh bookmarks: {}", e));
                return;
            }
        };

        match self
            .replica
            .apply(Notification::ReconciliationResult { seq, snapshot })
        {
            Ok(Outcome::Replaced { seq }) => {
                self.publish_view();
                let _ = self.events.send(StoreEvent::Reconciled { seq });
            }
            Ok(Outcome::Ignored(IgnoreReason::StaleFetch { seq, latest })) => {
                tracing::debug!(seq, latest, "Discarding stale reconciliation result");
                let _ = self.events.send(StoreEvent::StaleFetchDiscarded { seq });
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(seq, "Failed to apply reconciliation result: {}", e),
        }
    }

    fn on_status(&mut self, status: ConnectionStatus) {
        if !self.replica.set_status(status) {
            return;
        }
        if status == ConnectionStatus::Live {
            if self.seen_live {
                self.reconcile("reconnected");
            }
            self.seen_live = true;
        }
        self.publish_view();
    }

    fn fail(&self, message: String) {
        let _ = self.events.send(StoreEvent::TransientFailure { message });
    }

    fn publish_view(&self) {
        self.view.send_replace(StoreView {
            snapshot: self.replica.snapshot().clone(),
            status: self.replica.status(),
        });
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBackend;

    fn session(backend: &Arc<MemoryBackend>, owner_id: &str) -> Session {
        Session::new(owner_id, backend.clone(), backend.clone())
    }

    fn config() -> ClientConfig {
        ClientConfig::default().with_reconnect_delay(Duration::from_millis(20))
    }

    async fn start(backend: &Arc<MemoryBackend>) -> ReplicaStore {
        ReplicaStore::start(session(backend, "alice"), ReplicaSnapshot::new(), &config()).await
    }

    #[tokio::test]
    async fn insert_is_visible_and_persisted() {
        let backend = MemoryBackend::new();
        let store = start(&backend).await;

        let record = store
            .request_insert(RecordDraft::new("Rust", "https://rust-lang.org"))
            .await
            .unwrap();

        assert_eq!(record.owner_id, "alice");
        assert_eq!(store.current_snapshot().ids(), vec![&record.id]);
        assert_eq!(backend.records_of("alice"), vec![record]);

        store.shutdown().await;
    }

    #[tokio::test]
    async fn delete_absent_id_succeeds() {
        let backend = MemoryBackend::new();
        let store = start(&backend).await;

        store.request_delete("missing").await.unwrap();
        assert!(store.current_snapshot().is_empty());

        store.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_store() {
        let backend = MemoryBackend::new();
        let store = start(&backend).await;

        store.shutdown().await;
        store.shutdown().await;

        assert_eq!(backend.live_links(), 0);
        let err = store
            .request_insert(RecordDraft::new("x", "https://x.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::StoreClosed));
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(StoreEvent::Reconciled { seq: 3 }).unwrap();
        assert_eq!(json["type"], "reconciled");
        assert_eq!(json["seq"], 3);
    }
}
