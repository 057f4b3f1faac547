//! In-process backend implementing both boundaries.
//!
//! Acts as source of truth and pub-sub hub for replicas living in one
//! process. Like the real storage layer, every committed write emits a hint
//! on the unscoped change feed: redacted for inserts, id-only for deletes.
//! Failure injection and link drops make it the backbone of the tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use marksync_engine::{Notification, Record, RecordId, Topic};
use tokio::sync::mpsc;

use crate::channel::{Channel, LinkEvent, Subscription, SubscriptionId};
use crate::error::{ClientError, Result};
use crate::persistence::{ensure_owner, Persistence};

/// A stored record with its commit order.
#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    record: Record,
}

#[derive(Debug)]
struct MemoryLink {
    topic: Topic,
    sender: mpsc::UnboundedSender<LinkEvent>,
}

/// In-memory source of truth and pub-sub hub.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: DashMap<RecordId, Row>,
    links: DashMap<SubscriptionId, MemoryLink>,
    next_seq: AtomicU64,
    next_link: AtomicU64,
    fail_writes: AtomicBool,
    fail_queries: AtomicBool,
    query_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    publishes: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store records directly, without emitting change hints.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            self.rows.insert(record.id.clone(), Row { seq, record });
        }
    }

    /// Stored records of an owner, newest first.
    pub fn records_of(&self, owner_id: &str) -> Vec<Record> {
        let mut rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|entry| entry.value().record.is_owned_by(owner_id))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        rows.into_iter().map(|row| row.record).collect()
    }

    /// Make inserts and deletes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make queries fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Delay every query by `delay`.
    pub fn set_query_delay(&self, delay: Duration) {
        self.query_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every insert and delete by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Drop every live link, as if the hub went away.
    pub fn drop_links(&self) {
        let ids: Vec<SubscriptionId> = self.links.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, link)) = self.links.remove(&id) {
                let _ = link.sender.send(LinkEvent::Dropped {
                    reason: "link dropped".to_string(),
                });
            }
        }
    }

    /// Deliver a notification to every subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn deliver(&self, topic: &Topic, notification: &Notification) -> usize {
        let mut sent = 0;
        let mut closed = Vec::new();

        for entry in self.links.iter() {
            let link = entry.value();
            if &link.topic != topic {
                continue;
            }
            if link
                .sender
                .send(LinkEvent::Message(notification.clone()))
                .is_ok()
            {
                sent += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.links.remove(&id);
        }

        tracing::trace!(topic = %topic, recipients = sent, "Delivered notification");
        sent
    }

    /// Number of `subscribe` calls served.
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Number of `unsubscribe` calls that released a link.
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Number of `publish` calls served.
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Number of currently live links.
    pub fn live_links(&self) -> usize {
        self.links.len()
    }

    async fn check_writes(&self) -> Result<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(ClientError::Injected("write failed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Persistence for MemoryBackend {
    async fn insert(&self, owner_id: &str, record: &Record) -> Result<Record> {
        self.check_writes().await?;
        ensure_owner(owner_id, record)?;

        let stored = match self.rows.entry(record.id.clone()) {
            Entry::Occupied(existing) => {
                let existing = existing.get().record.clone();
                ensure_owner(owner_id, &existing)?;
                return Ok(existing);
            }
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                slot.insert(Row {
                    seq,
                    record: record.clone(),
                });
                record.clone()
            }
        };

        self.deliver(&Topic::ChangeFeed, &Notification::insert_hint());
        Ok(stored)
    }

    async fn delete(&self, owner_id: &str, id: &RecordId) -> Result<()> {
        self.check_writes().await?;

        if let Some(row) = self.rows.get(id) {
            ensure_owner(owner_id, &row.record)?;
        }
        if self.rows.remove(id).is_some() {
            self.deliver(&Topic::ChangeFeed, &Notification::delete_hint(id.clone()));
        }
        Ok(())
    }

    async fn query(&self, owner_id: &str) -> Result<Vec<Record>> {
        let delay = self.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ClientError::Injected("query failed".to_string()));
        }
        Ok(self.records_of(owner_id))
    }
}

#[async_trait]
impl Channel for MemoryBackend {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let id = self.next_link.fetch_add(1, Ordering::SeqCst);
        let (sender, events) = mpsc::unbounded_channel();

        self.links.insert(
            id,
            MemoryLink {
                topic: topic.clone(),
                sender,
            },
        );
        self.subscribes.fetch_add(1, Ordering::SeqCst);

        Ok(Subscription { id, topic, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.links.remove(&id).is_some() {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn publish(&self, topic: &Topic, notification: &Notification) -> Result<()> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.deliver(topic, notification);
        Ok(())
    }
}
