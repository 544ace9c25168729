#[cfg(test)]
mod tests {
    use crate::backlog::memory::MemoryBacklog;
    use crate::backlog::types::*;
    use crate::backlog::BacklogStore;
    use crate::stats::{StatsAggregator, TopicStats};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn event(topic: &str, event_id: &str) -> NewEvent {
        NewEvent {
            key: IdentityKey::new(topic, event_id),
            timestamp: Utc::now(),
            source: "test".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_snapshot_on_empty_store() {
        let stats = StatsAggregator::new(Arc::new(MemoryBacklog::new()));

        let snapshot = stats.snapshot().await.unwrap();

        assert_eq!(snapshot.received, 0);
        assert!(snapshot.topics.is_empty());
        assert_eq!(snapshot.queue, QueueCounts::default());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_counters_and_topics() {
        // ARRANGE
        let store = Arc::new(MemoryBacklog::new());
        store
            .insert_batch(vec![
                event("payment", "1"),
                event("auth", "1"),
                event("auth", "1"),
                event("auth", "2"),
            ])
            .await
            .unwrap();
        let owner = LeaseOwner::mint("test", 0);
        let claimed = store.claim(&owner, 2, Duration::from_secs(30)).await.unwrap();
        for row in &claimed {
            store.complete(&row.key(), &owner, &Outcome::Done).await.unwrap();
        }

        // ACT
        let snapshot = StatsAggregator::new(store.clone()).snapshot().await.unwrap();

        // ASSERT
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.unique_processed, 3);
        assert_eq!(snapshot.duplicate_dropped, 1);
        assert_eq!(snapshot.queue.pending, 1);
        assert_eq!(snapshot.queue.done, 2);

        let done: u64 = snapshot.topics.iter().map(|t| t.done).sum();
        assert_eq!(done, 2);
        let names: Vec<&str> = snapshot.topics.iter().map(|t| t.topic.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_topic_stats_wire_shape() {
        let value = serde_json::to_value(TopicStats {
            topic: "auth".to_string(),
            done: 3,
            failed: 1,
        })
        .unwrap();

        assert_eq!(value, serde_json::json!({ "topic": "auth", "done": 3, "failed": 1 }));
    }
}
