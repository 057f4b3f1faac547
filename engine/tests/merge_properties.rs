//! Merge properties for marksync-engine
//!
//! These tests drive the replica through the sequences replicas actually
//! see: optimistic writes, echoes, hints and racing reconciliation fetches.

use marksync_engine::{Notification, Outcome, Record, RecordDraft, Replica, ReplicaSnapshot};
use proptest::prelude::*;

const OWNER: &str = "owner-1";

fn record(id: &str, created_at: u64) -> Record {
    Record::from_draft(
        id,
        OWNER,
        RecordDraft::new(id.to_uppercase(), format!("https://{id}.test")),
        created_at,
    )
}

fn ready(records: Vec<Record>) -> Replica {
    let mut replica = Replica::new(OWNER);
    replica.initialize(ReplicaSnapshot::from_records(records));
    replica
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn insert_then_broadcast_keeps_single_copy() {
    let mut replica = ready(vec![]);
    let a = Record::from_draft(
        "a",
        OWNER,
        RecordDraft::new("A", "https://a.test"),
        1706745600000,
    );

    replica.apply_local_insert(a.clone()).unwrap();
    assert_eq!(replica.snapshot().ids(), vec!["a"]);

    replica.settle_insert("a", true);
    replica
        .apply(Notification::LocalInsertAck { record: a.clone() })
        .unwrap();
    replica
        .apply(Notification::RemoteInsertBroadcast { record: a })
        .unwrap();

    assert_eq!(replica.snapshot().ids(), vec!["a"]);
}

#[test]
fn delete_in_flight_and_remote_delete_empty_the_snapshot() {
    // Both arrival orders of the two delete confirmations.
    for hint_first in [true, false] {
        let mut replica = ready(vec![record("a", 2), record("b", 1)]);
        replica.apply_local_delete("a").unwrap();

        if hint_first {
            replica.apply(Notification::delete_hint("b")).unwrap();
            replica.settle_delete("a", true);
            replica.apply(Notification::delete_hint("a")).unwrap();
        } else {
            replica.settle_delete("a", true);
            replica.apply(Notification::delete_hint("a")).unwrap();
            replica.apply(Notification::delete_hint("b")).unwrap();
        }

        assert!(replica.snapshot().is_empty(), "hint_first = {hint_first}");
    }
}

#[test]
fn redacted_insert_resolves_to_fetched_snapshot() {
    let mut replica = ready(vec![record("a", 1)]);

    let outcome = replica.apply(Notification::insert_hint()).unwrap();
    assert_eq!(outcome, Outcome::ReconcileNeeded);

    let seq = replica.begin_fetch();
    let fetched = ReplicaSnapshot::from_records(vec![record("a", 1), record("z", 9)]);
    replica
        .apply(Notification::ReconciliationResult {
            seq,
            snapshot: fetched.clone(),
        })
        .unwrap();

    assert_eq!(replica.snapshot(), &fetched);
}

#[test]
fn delete_racing_its_own_insert_converges_on_fetch() {
    // The delete settles first and storage keeps the row the insert wrote.
    let a = record("a", 1);
    let mut replica = ready(vec![]);
    replica.apply_local_insert(a.clone()).unwrap();
    replica.apply_local_delete("a").unwrap();
    replica.settle_delete("a", true);
    replica.settle_insert("a", true);
    replica
        .apply(Notification::LocalInsertAck { record: a.clone() })
        .unwrap();

    let seq = replica.begin_fetch();
    let fetched = ReplicaSnapshot::from_records(vec![a]);
    replica
        .apply(Notification::ReconciliationResult {
            seq,
            snapshot: fetched.clone(),
        })
        .unwrap();

    assert_eq!(replica.snapshot(), &fetched);

    // A later delete of the surviving row still lands.
    replica.apply(Notification::delete_hint("a")).unwrap();
    assert!(replica.snapshot().is_empty());
}

#[test]
fn older_fetch_arriving_last_is_discarded() {
    let mut replica = ready(vec![]);
    let seq1 = replica.begin_fetch();
    let seq2 = replica.begin_fetch();

    let s2 = ReplicaSnapshot::from_records(vec![record("b", 2), record("a", 1)]);
    let s1 = ReplicaSnapshot::from_records(vec![record("a", 1)]);

    replica
        .apply(Notification::ReconciliationResult {
            seq: seq2,
            snapshot: s2.clone(),
        })
        .unwrap();
    replica
        .apply(Notification::ReconciliationResult {
            seq: seq1,
            snapshot: s1,
        })
        .unwrap();

    assert_eq!(replica.snapshot(), &s2);
}

// ============================================================================
// Property-based tests
// ============================================================================

fn arb_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec((0u8..12, 0u64..6), 0..10).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(id, ts)| record(&format!("r{id}"), ts))
            .collect()
    })
}

fn arb_ids() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(0u8..12, 0..6)
        .prop_map(|ids| ids.into_iter().map(|id| format!("r{id}")).collect())
}

fn assert_unique_and_ordered(snapshot: &ReplicaSnapshot) -> Result<(), TestCaseError> {
    let mut ids: Vec<_> = snapshot.ids();
    ids.sort();
    ids.dedup();
    prop_assert_eq!(ids.len(), snapshot.len());
    for pair in snapshot.as_slice().windows(2) {
        prop_assert!(pair[0].created_at >= pair[1].created_at);
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_full_insert_is_idempotent(
        seed in arb_records(),
        id in 0u8..12,
        ts in 0u64..6,
    ) {
        let r = record(&format!("r{id}"), ts);

        let mut once = ready(seed.clone());
        once.apply(Notification::RemoteInsertBroadcast { record: r.clone() }).unwrap();

        let mut twice = ready(seed);
        twice.apply(Notification::RemoteInsertBroadcast { record: r.clone() }).unwrap();
        twice.apply(Notification::RemoteInsertBroadcast { record: r }).unwrap();

        prop_assert_eq!(once.snapshot(), twice.snapshot());
        assert_unique_and_ordered(twice.snapshot())?;
    }

    #[test]
    fn prop_optimistic_insert_and_broadcast_dedup(
        seed in arb_records(),
        ts in 0u64..6,
        broadcast_before_settle in any::<bool>(),
    ) {
        let mut replica = ready(seed);
        let r = record("fresh", ts);

        replica.apply_local_insert(r.clone()).unwrap();
        if broadcast_before_settle {
            replica.apply(Notification::RemoteInsertBroadcast { record: r.clone() }).unwrap();
            replica.settle_insert("fresh", true);
        } else {
            replica.settle_insert("fresh", true);
            replica.apply(Notification::RemoteInsertBroadcast { record: r.clone() }).unwrap();
        }
        replica.apply(Notification::LocalInsertAck { record: r }).unwrap();

        let copies = replica.snapshot().iter().filter(|x| x.id == "fresh").count();
        prop_assert_eq!(copies, 1);
        assert_unique_and_ordered(replica.snapshot())?;
    }

    #[test]
    fn prop_delete_order_independent(
        seed in arb_records(),
        id in 0u8..12,
        local_first in any::<bool>(),
    ) {
        let target = format!("r{id}");
        let mut replica = ready(seed);

        if local_first {
            replica.apply_local_delete(&target).unwrap();
            replica.settle_delete(&target, true);
            replica.apply(Notification::delete_hint(target.clone())).unwrap();
        } else {
            replica.apply(Notification::delete_hint(target.clone())).unwrap();
            replica.apply_local_delete(&target).unwrap();
            replica.settle_delete(&target, true);
        }

        prop_assert!(!replica.snapshot().contains(&target));
        assert_unique_and_ordered(replica.snapshot())?;
    }

    #[test]
    fn prop_reconciliation_equals_fetched(
        seed in arb_records(),
        hinted in arb_ids(),
        settled in arb_ids(),
        fetched in arb_records(),
    ) {
        let mut replica = ready(seed);
        // Earlier deletes leave tombstones that the fetch may contradict.
        for id in hinted {
            replica.apply(Notification::delete_hint(id)).unwrap();
        }
        for id in settled {
            replica.apply_local_delete(&id).unwrap();
            replica.settle_delete(&id, true);
        }
        replica.apply(Notification::insert_hint()).unwrap();

        let fetched = ReplicaSnapshot::from_records(fetched);
        let seq = replica.begin_fetch();
        replica
            .apply(Notification::ReconciliationResult { seq, snapshot: fetched.clone() })
            .unwrap();

        prop_assert_eq!(replica.snapshot(), &fetched);

        for record in fetched.iter() {
            prop_assert!(!replica.is_tombstoned(&record.id));
            let echo = replica
                .apply(Notification::RemoteInsertBroadcast { record: record.clone() })
                .unwrap();
            prop_assert!(!echo.changed());
        }
        prop_assert_eq!(replica.snapshot(), &fetched);
    }

    #[test]
    fn prop_latest_issued_fetch_wins(
        first in arb_records(),
        second in arb_records(),
        first_arrives_last in any::<bool>(),
    ) {
        let mut replica = ready(vec![]);
        let seq1 = replica.begin_fetch();
        let seq2 = replica.begin_fetch();
        let s1 = ReplicaSnapshot::from_records(first);
        let s2 = ReplicaSnapshot::from_records(second);

        let results = if first_arrives_last {
            vec![(seq2, s2.clone()), (seq1, s1)]
        } else {
            vec![(seq1, s1), (seq2, s2.clone())]
        };
        for (seq, snapshot) in results {
            replica.apply(Notification::ReconciliationResult { seq, snapshot }).unwrap();
        }

        prop_assert_eq!(replica.snapshot(), &s2);
    }
}
