//! Derived metrics over the request store.

use std::collections::BTreeMap;
use std::sync::Arc;

use helpdesk_core::{HelpRequest, Priority, RequestStatus, SupervisorId};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::state_machine::{RequestStore, StoreError};

/// Summary statistics over every stored request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total: usize,
    /// Every status is present, with zero counts included.
    pub by_status: BTreeMap<RequestStatus, usize>,
    /// Every priority is present, with zero counts included.
    pub by_priority: BTreeMap<Priority, usize>,
    /// Mean of `resolved_at - created_at` over resolved requests.
    pub avg_resolution_secs: Option<f64>,
    /// Open (in progress or escalated) requests per assignee.
    pub supervisor_load: BTreeMap<SupervisorId, usize>,
    pub tag_counts: BTreeMap<String, usize>,
    /// Store generation these numbers were computed at.
    pub generation: u64,
}

impl Statistics {
    pub fn from_requests(requests: &[HelpRequest], generation: u64) -> Self {
        let mut by_status: BTreeMap<_, _> = RequestStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_priority: BTreeMap<_, _> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
        let mut supervisor_load = BTreeMap::new();
        let mut tag_counts = BTreeMap::new();
        let mut latency_total = 0.0;
        let mut resolved = 0usize;

        for request in requests {
            *by_status.entry(request.status).or_insert(0) += 1;
            *by_priority.entry(request.priority).or_insert(0) += 1;

            for tag in &request.tags {
                *tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }

            match request.status {
                RequestStatus::InProgress | RequestStatus::Escalated => {
                    if let Some(assignee) = &request.assigned_to {
                        *supervisor_load.entry(assignee.clone()).or_insert(0) += 1;
                    }
                }
                RequestStatus::Resolved => {
                    if let Some(latency) = request.resolution_latency_secs() {
                        latency_total += latency;
                        resolved += 1;
                    }
                }
                RequestStatus::Pending => {}
            }
        }

        Self {
            total: requests.len(),
            by_status,
            by_priority,
            avg_resolution_secs: (resolved > 0).then(|| latency_total / resolved as f64),
            supervisor_load,
            tag_counts,
            generation,
        }
    }
}

/// Computes `Statistics` on demand, reusing the last result until the store
/// records another mutation.
pub struct StatisticsAggregator {
    store: Arc<RequestStore>,
    cache: Mutex<Option<Statistics>>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<RequestStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<Statistics, StoreError> {
        let mut cache = self.cache.lock().await;
        // Read the generation before loading so a concurrent write leaves the
        // cached copy stale rather than mislabelled.
        let generation = self.store.generation();

        if let Some(cached) = cache.as_ref() {
            if cached.generation == generation {
                return Ok(cached.clone());
            }
        }

        let requests = self.store.all().await?;
        let stats = Statistics::from_requests(&requests, generation);
        debug!(generation, total = stats.total, "Recomputed statistics");
        *cache = Some(stats.clone());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state_machine::{InMemoryRepository, NewRequest};
    use chrono::{Duration, TimeZone, Utc};
    use helpdesk_core::RequestId;

    fn setup() -> (Arc<RequestStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(RequestStore::new(
            Arc::new(InMemoryRepository::new()),
            clock.clone(),
        ));
        (store, clock)
    }

    async fn submit(store: &RequestStore, tags: &[&str]) -> RequestId {
        store
            .create(NewRequest {
                customer_id: "c1".to_string(),
                customer_name: "Alice".to_string(),
                question: "q".to_string(),
                priority: Priority::Medium,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_empty_store() {
        let (store, _) = setup();
        let stats = StatisticsAggregator::new(store).get().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.avg_resolution_secs, None);
        assert_eq!(stats.by_status[&RequestStatus::Pending], 0);
        assert_eq!(stats.by_priority.len(), 4);
    }

    #[tokio::test]
    async fn test_average_excludes_unresolved() {
        let (store, clock) = setup();
        let fast = submit(&store, &[]).await;
        let slow = submit(&store, &[]).await;
        let open = submit(&store, &[]).await;
        let jen = SupervisorId::from("jennifer_smith");

        for id in [fast, slow, open] {
            store.assign(id, jen.clone()).await.unwrap();
        }

        clock.advance(Duration::seconds(60));
        store
            .update_status(fast, RequestStatus::Resolved, Some("a".to_string()))
            .await
            .unwrap();
        clock.advance(Duration::seconds(120));
        store
            .update_status(slow, RequestStatus::Resolved, Some("b".to_string()))
            .await
            .unwrap();

        let stats = StatisticsAggregator::new(store).get().await.unwrap();
        // (60 + 180) / 2, the open request is ignored.
        assert_eq!(stats.avg_resolution_secs, Some(120.0));
        assert_eq!(stats.by_status[&RequestStatus::Resolved], 2);
        assert_eq!(stats.by_status[&RequestStatus::InProgress], 1);
        assert_eq!(stats.supervisor_load.get(&jen), Some(&1));
    }

    #[tokio::test]
    async fn test_load_counts_escalated_but_not_pending() {
        let (store, _) = setup();
        let escalated = submit(&store, &[]).await;
        submit(&store, &[]).await;
        let owner = SupervisorId::from("maria_rodriguez");

        store.assign(escalated, owner.clone()).await.unwrap();
        store
            .update_status(escalated, RequestStatus::Escalated, None)
            .await
            .unwrap();

        let stats = StatisticsAggregator::new(store).get().await.unwrap();
        assert_eq!(stats.supervisor_load.len(), 1);
        assert_eq!(stats.supervisor_load[&owner], 1);
    }

    #[tokio::test]
    async fn test_tag_histogram() {
        let (store, _) = setup();
        submit(&store, &["hair", "color"]).await;
        submit(&store, &["hair"]).await;

        let stats = StatisticsAggregator::new(store).get().await.unwrap();
        assert_eq!(stats.tag_counts["hair"], 2);
        assert_eq!(stats.tag_counts["color"], 1);
    }

    #[tokio::test]
    async fn test_cache_invalidated_by_mutation() {
        let (store, _) = setup();
        let aggregator = StatisticsAggregator::new(store.clone());

        submit(&store, &[]).await;
        let first = aggregator.get().await.unwrap();
        let again = aggregator.get().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.total, 1);

        submit(&store, &[]).await;
        let after = aggregator.get().await.unwrap();
        assert_eq!(after.total, 2);
        assert!(after.generation > first.generation);
    }

    #[test]
    fn test_serializes_with_string_keys() {
        let stats = Statistics::from_requests(&[], 0);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["by_status"]["in_progress"], 0);
        assert_eq!(json["by_priority"]["urgent"], 0);
        assert!(json["avg_resolution_secs"].is_null());
    }
}
