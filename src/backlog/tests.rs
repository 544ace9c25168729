//! Backlog Module Tests
//!
//! Exercises the in-process store against the coordination points every
//! implementation must honor.
//!
//! ## Test Scopes
//! - **Insert**: insert-if-absent and the counters that move with it.
//! - **Claim / Complete**: leases, stale reports and terminal states.
//! - **Reclaim**: abandoned leases return to the pending pool.
//! - **Reads**: listing order, topic filter and stats snapshots.

#[cfg(test)]
mod tests {
    use crate::backlog::memory::MemoryBacklog;
    use crate::backlog::types::*;
    use crate::backlog::BacklogStore;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(30);

    fn event(topic: &str, event_id: &str) -> NewEvent {
        NewEvent {
            key: IdentityKey::new(topic, event_id),
            timestamp: Utc::now(),
            source: "test".to_string(),
            payload: serde_json::json!({ "id": event_id }),
        }
    }

    fn owner(worker: usize) -> LeaseOwner {
        LeaseOwner::mint("test", worker)
    }

    // ============================================================
    // TEST 1: Insert-if-absent
    // ============================================================

    #[tokio::test]
    async fn test_insert_batch_drops_duplicates_within_and_across_batches() {
        // ARRANGE
        let store = MemoryBacklog::new();

        // ACT: Same identity twice in one batch, then again in a later batch
        let first = store
            .insert_batch(vec![event("t", "1"), event("t", "1"), event("t", "2")])
            .await
            .unwrap();
        let second = store.insert_batch(vec![event("t", "2")]).await.unwrap();

        // ASSERT
        assert_eq!(
            first,
            IngestSummary {
                received: 3,
                inserted: 2,
                duplicates: 1
            }
        );
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.len(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.counters.received, 4);
        assert_eq!(stats.counters.unique_processed, 2);
        assert_eq!(stats.counters.duplicate_dropped, 2);
    }

    #[tokio::test]
    async fn test_same_event_id_on_different_topics_is_distinct() {
        let store = MemoryBacklog::new();

        let summary = store
            .insert_batch(vec![event("a", "1"), event("b", "1")])
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.duplicates, 0);
    }

    #[tokio::test]
    async fn test_duplicate_does_not_overwrite_first_payload() {
        // ARRANGE
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();

        // ACT
        let mut later = event("t", "1");
        later.payload = serde_json::json!({ "changed": true });
        later.source = "other".to_string();
        store.insert_batch(vec![later]).await.unwrap();

        // ASSERT
        let row = store.get(&IdentityKey::new("t", "1")).await.unwrap().unwrap();
        assert_eq!(row.source, "test");
        assert_eq!(row.payload, serde_json::json!({ "id": "1" }));
        assert_eq!(row.processing_state, ProcessingState::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_of_one_identity_record_once() {
        // ARRANGE
        let store = Arc::new(MemoryBacklog::new());

        // ACT: 50 racing writers
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_batch(vec![event("race", "same")]).await.unwrap()
            }));
        }

        let mut inserted = 0;
        let mut duplicates = 0;
        for handle in handles {
            let summary = handle.await.unwrap();
            inserted += summary.inserted;
            duplicates += summary.duplicates;
        }

        // ASSERT
        assert_eq!(inserted, 1);
        assert_eq!(duplicates, 49);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.counters.received, 50);
        assert_eq!(
            stats.counters.received,
            stats.counters.unique_processed + stats.counters.duplicate_dropped
        );
    }

    // ============================================================
    // TEST 2: Claim and Complete
    // ============================================================

    #[tokio::test]
    async fn test_claim_returns_oldest_first_and_respects_batch_size() {
        // ARRANGE
        let store = MemoryBacklog::new();
        for id in 0..5 {
            store
                .insert_batch(vec![event("t", &id.to_string())])
                .await
                .unwrap();
        }

        // ACT
        let worker = owner(0);
        let claimed = store.claim(&worker, 3, LEASE).await.unwrap();

        // ASSERT
        let ids: Vec<&str> = claimed.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
        for row in &claimed {
            assert_eq!(row.processing_state, ProcessingState::Processing);
            assert_eq!(row.lease_owner.as_ref(), Some(&worker));
            assert!(row.lease_expiry.unwrap() > Utc::now());
            assert_eq!(row.attempts, 1);
        }
    }

    #[tokio::test]
    async fn test_claim_on_empty_store_or_zero_batch_returns_nothing() {
        let store = MemoryBacklog::new();
        assert!(store.claim(&owner(0), 10, LEASE).await.unwrap().is_empty());

        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        assert!(store.claim(&owner(0), 0, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_disjoint() {
        // ARRANGE
        let store = Arc::new(MemoryBacklog::new());
        let batch: Vec<NewEvent> = (0..200).map(|i| event("t", &i.to_string())).collect();
        store.insert_batch(batch).await.unwrap();

        // ACT: 8 claimers drain the backlog in small batches
        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let rows = store.claim(&owner(worker), 7, LEASE).await.unwrap();
                    if rows.is_empty() {
                        break;
                    }
                    mine.extend(rows.into_iter().map(|r| r.key()));
                }
                mine
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for key in handle.await.unwrap() {
                total += 1;
                seen.insert(key);
            }
        }

        // ASSERT: Every row claimed exactly once
        assert_eq!(total, 200);
        assert_eq!(seen.len(), 200);
    }

    #[tokio::test]
    async fn test_complete_records_outcome_and_topic_counts() {
        // ARRANGE
        let store = MemoryBacklog::new();
        store
            .insert_batch(vec![event("t", "ok"), event("t", "bad")])
            .await
            .unwrap();
        let worker = owner(0);
        store.claim(&worker, 10, LEASE).await.unwrap();

        // ACT
        let ok = store
            .complete(&IdentityKey::new("t", "ok"), &worker, &Outcome::Done)
            .await
            .unwrap();
        let bad = store
            .complete(
                &IdentityKey::new("t", "bad"),
                &worker,
                &Outcome::Failed {
                    reason: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        // ASSERT
        assert!(ok && bad);

        let done = store.get(&IdentityKey::new("t", "ok")).await.unwrap().unwrap();
        assert_eq!(done.processing_state, ProcessingState::Done);
        assert!(done.lease_owner.is_none());
        assert!(done.lease_expiry.is_none());

        let failed = store.get(&IdentityKey::new("t", "bad")).await.unwrap().unwrap();
        assert_eq!(failed.processing_state, ProcessingState::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.topics["t"], TopicCounts { done: 1, failed: 1 });
        assert_eq!(stats.queue.done, 1);
        assert_eq!(stats.queue.failed, 1);
    }

    #[tokio::test]
    async fn test_second_report_is_a_no_op() {
        // ARRANGE
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        let worker = owner(0);
        store.claim(&worker, 1, LEASE).await.unwrap();
        let key = IdentityKey::new("t", "1");

        // ACT
        assert!(store.complete(&key, &worker, &Outcome::Done).await.unwrap());
        let again = store
            .complete(
                &key,
                &worker,
                &Outcome::Failed {
                    reason: "late".to_string(),
                },
            )
            .await
            .unwrap();

        // ASSERT: Terminal state and counts untouched
        assert!(!again);
        let row = store.get(&key).await.unwrap().unwrap();
        assert_eq!(row.processing_state, ProcessingState::Done);
        assert_eq!(store.stats().await.unwrap().topics["t"].done, 1);
        assert_eq!(store.stats().await.unwrap().topics["t"].failed, 0);
    }

    #[tokio::test]
    async fn test_report_from_wrong_owner_is_rejected() {
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        store.claim(&owner(0), 1, LEASE).await.unwrap();

        let stranger = owner(1);
        let accepted = store
            .complete(&IdentityKey::new("t", "1"), &stranger, &Outcome::Done)
            .await
            .unwrap();

        assert!(!accepted);
        let row = store.get(&IdentityKey::new("t", "1")).await.unwrap().unwrap();
        assert_eq!(row.processing_state, ProcessingState::Processing);
    }

    #[tokio::test]
    async fn test_complete_unknown_key_returns_false() {
        let store = MemoryBacklog::new();
        let accepted = store
            .complete(&IdentityKey::new("t", "ghost"), &owner(0), &Outcome::Done)
            .await
            .unwrap();
        assert!(!accepted);
    }

    // ============================================================
    // TEST 3: Lease expiry and reclaim
    // ============================================================

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed_and_stale_report_ignored() {
        // ARRANGE: Claim with a lease that expires almost immediately
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        let first = owner(0);
        store
            .claim(&first, 1, Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // ACT
        let reclaimed = store.reclaim_expired().await.unwrap();

        // ASSERT: Back to pending, then claimable by someone else
        assert_eq!(reclaimed, 1);
        let key = IdentityKey::new("t", "1");
        let row = store.get(&key).await.unwrap().unwrap();
        assert_eq!(row.processing_state, ProcessingState::Pending);
        assert!(row.lease_owner.is_none());

        let second = owner(1);
        let claimed = store.claim(&second, 1, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);

        // The first owner's late report must not land
        assert!(!store.complete(&key, &first, &Outcome::Done).await.unwrap());
        assert!(store.complete(&key, &second, &Outcome::Done).await.unwrap());
        assert_eq!(store.stats().await.unwrap().topics["t"].done, 1);
    }

    #[tokio::test]
    async fn test_live_lease_is_not_reclaimed() {
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        store.claim(&owner(0), 1, LEASE).await.unwrap();

        assert_eq!(store.reclaim_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extend_lease_keeps_row_from_reclaim() {
        // ARRANGE
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        let worker = owner(0);
        store
            .claim(&worker, 1, Duration::from_millis(20))
            .await
            .unwrap();

        // ACT: Extend before expiry, then wait past the original expiry
        let extended = store.extend_lease(&worker, LEASE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // ASSERT
        assert_eq!(extended, 1);
        assert_eq!(store.reclaim_expired().await.unwrap(), 0);
        assert_eq!(store.extend_lease(&owner(9), LEASE).await.unwrap(), 0);
    }

    // ============================================================
    // TEST 4: Retry of failed rows
    // ============================================================

    #[tokio::test]
    async fn test_retry_failed_moves_row_back_to_pending() {
        // ARRANGE
        let store = MemoryBacklog::new();
        store.insert_batch(vec![event("t", "1")]).await.unwrap();
        let worker = owner(0);
        store.claim(&worker, 1, LEASE).await.unwrap();
        let key = IdentityKey::new("t", "1");
        store
            .complete(
                &key,
                &worker,
                &Outcome::Failed {
                    reason: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        // ACT
        let retried = store.retry_failed(&key).await.unwrap();

        // ASSERT
        assert!(retried);
        let row = store.get(&key).await.unwrap().unwrap();
        assert_eq!(row.processing_state, ProcessingState::Pending);
        assert!(row.failure_reason.is_none());

        // Retrying a non-failed row does nothing
        assert!(!store.retry_failed(&key).await.unwrap());
        assert!(!store
            .retry_failed(&IdentityKey::new("t", "ghost"))
            .await
            .unwrap());
    }

    // ============================================================
    // TEST 5: Reads
    // ============================================================

    #[tokio::test]
    async fn test_list_events_newest_first_with_topic_filter() {
        // ARRANGE
        let store = MemoryBacklog::new();
        store
            .insert_batch(vec![event("a", "1"), event("b", "1"), event("a", "2")])
            .await
            .unwrap();

        // ACT
        let all = store.list_events(None, 10).await.unwrap();
        let only_a = store.list_events(Some("a"), 10).await.unwrap();
        let limited = store.list_events(None, 1).await.unwrap();

        // ASSERT
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].key(), IdentityKey::new("a", "2"));
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.topic == "a"));
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_queue_counts_follow_state() {
        let store = MemoryBacklog::new();
        store
            .insert_batch(vec![event("t", "1"), event("t", "2"), event("t", "3")])
            .await
            .unwrap();
        let worker = owner(0);
        store.claim(&worker, 1, LEASE).await.unwrap();

        let stats = store.stats().await.unwrap();

        assert_eq!(
            stats.queue,
            QueueCounts {
                pending: 2,
                processing: 1,
                done: 0,
                failed: 0
            }
        );
        assert!(stats.topics.is_empty());
    }
}
