//! The help request store.
//!
//! `RequestStore` is the single writer for help requests. It enforces the
//! transition table, stamps timestamps from its clock, and serializes
//! mutations per request id.
//!
//! # Concurrency
//!
//! Every mutation runs read, check, write under a per-id lock, so two
//! concurrent transitions on the same request cannot both read the old status
//! and both succeed. Mutations on different ids do not contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use helpdesk_core::{HelpRequest, Metadata, Priority, RequestId, RequestStatus, SupervisorId};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::repository::{
    NewHelpRequest, Page, RepositoryError, RequestFilter, RequestRepository, MAX_OFFSET,
};
use super::transition::{transition, IllegalTransition};
use crate::clock::Clock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("help request {0} not found")]
    NotFound(RequestId),
    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] IllegalTransition),
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
}

/// Caller-supplied fields for a new request.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub customer_id: String,
    pub customer_name: String,
    pub question: String,
    pub priority: Priority,
    pub tags: std::collections::BTreeSet<String>,
    pub metadata: Metadata,
}

pub struct RequestStore {
    repo: Arc<dyn RequestRepository>,
    clock: Arc<dyn Clock>,
    /// Per-request locks serializing read-check-write sequences.
    request_locks: RwLock<HashMap<RequestId, Arc<Mutex<()>>>>,
    /// Bumped after every successful mutation.
    generation: AtomicU64,
}

impl RequestStore {
    pub fn new(repo: Arc<dyn RequestRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            request_locks: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Mutation counter. Equal values mean no write happened in between.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn create(&self, new: NewRequest) -> Result<HelpRequest, StoreError> {
        if new.customer_id.trim().is_empty() {
            return Err(StoreError::Validation("customer_id is required".to_string()));
        }
        let question = new.question.trim();
        if question.is_empty() {
            return Err(StoreError::Validation("question must not be empty".to_string()));
        }

        let created = self
            .repo
            .insert(NewHelpRequest {
                customer_id: new.customer_id,
                customer_name: new.customer_name,
                question: question.to_string(),
                priority: new.priority,
                tags: new.tags,
                metadata: new.metadata,
                created_at: self.clock.now(),
            })
            .await?;

        self.bump_generation();
        info!(
            request_id = %created.id,
            priority = %created.priority,
            "Created help request"
        );
        Ok(created)
    }

    /// Assign a pending request to a supervisor, moving it to in progress.
    pub async fn assign(
        &self,
        id: RequestId,
        supervisor: SupervisorId,
    ) -> Result<HelpRequest, StoreError> {
        require_supervisor(&supervisor)?;
        self.mutate(id, |request, _now| {
            enter(request, RequestStatus::Pending, RequestStatus::InProgress)?;
            request.assigned_to = Some(supervisor);
            Ok(())
        })
        .await
    }

    /// Hand an escalated request to a (possibly different) supervisor.
    pub async fn reassign(
        &self,
        id: RequestId,
        supervisor: SupervisorId,
    ) -> Result<HelpRequest, StoreError> {
        require_supervisor(&supervisor)?;
        self.mutate(id, |request, _now| {
            enter(request, RequestStatus::Escalated, RequestStatus::InProgress)?;
            request.assigned_to = Some(supervisor);
            Ok(())
        })
        .await
    }

    /// Move a request along the transition table.
    ///
    /// Resolving requires non-blank resolution text; other targets must not
    /// carry one.
    pub async fn update_status(
        &self,
        id: RequestId,
        new_status: RequestStatus,
        resolution: Option<String>,
    ) -> Result<HelpRequest, StoreError> {
        let resolution = resolution
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        self.mutate(id, |request, now| {
            transition(request.status, new_status)?;
            match (new_status, resolution) {
                (RequestStatus::Resolved, Some(text)) => {
                    request.resolution = Some(text);
                    request.resolved_at = Some(now);
                }
                (RequestStatus::Resolved, None) => {
                    return Err(StoreError::Validation(
                        "resolution text is required to resolve a request".to_string(),
                    ));
                }
                (_, Some(_)) => {
                    return Err(StoreError::Validation(format!(
                        "resolution text is only accepted when resolving, not for {}",
                        new_status
                    )));
                }
                (_, None) => {}
            }
            request.status = new_status;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, id: RequestId) -> Result<HelpRequest, StoreError> {
        self.repo.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    pub async fn list(
        &self,
        filter: &RequestFilter,
        page: Page,
    ) -> Result<Vec<HelpRequest>, StoreError> {
        if page.offset > MAX_OFFSET {
            return Err(StoreError::Validation(format!(
                "offset {} exceeds the maximum of {}",
                page.offset, MAX_OFFSET
            )));
        }
        Ok(self.repo.list(filter, page).await?)
    }

    /// Every stored request. Used by the statistics aggregator.
    pub async fn all(&self) -> Result<Vec<HelpRequest>, StoreError> {
        Ok(self.repo.get_all().await?)
    }

    /// Run `apply` against the current record under the per-id lock and
    /// persist the result. `apply` receives the timestamp that will become
    /// `updated_at`, which never moves backwards.
    async fn mutate<F>(&self, id: RequestId, apply: F) -> Result<HelpRequest, StoreError>
    where
        F: FnOnce(&mut HelpRequest, DateTime<Utc>) -> Result<(), StoreError>,
    {
        let request_lock = self.get_or_create_request_lock(id).await;
        let result = {
            let _guard = request_lock.lock().await;
            self.mutate_locked(id, apply).await
        };
        self.release_request_lock(id, request_lock).await;
        result
    }

    async fn mutate_locked<F>(&self, id: RequestId, apply: F) -> Result<HelpRequest, StoreError>
    where
        F: FnOnce(&mut HelpRequest, DateTime<Utc>) -> Result<(), StoreError>,
    {
        let mut request = self.get(id).await?;
        let from = request.status;
        let now = self.clock.now().max(request.updated_at);

        apply(&mut request, now)?;
        request.updated_at = now;

        if !self.repo.update(&request).await? {
            return Err(StoreError::NotFound(id));
        }
        self.bump_generation();

        if from != request.status {
            info!(
                request_id = %id,
                from = %from,
                to = %request.status,
                assigned_to = ?request.assigned_to.as_ref().map(SupervisorId::as_str),
                "Help request transitioned"
            );
        } else {
            debug!(request_id = %id, "Help request updated");
        }
        Ok(request)
    }

    async fn get_or_create_request_lock(&self, id: RequestId) -> Arc<Mutex<()>> {
        // Fast path: check if lock already exists
        {
            let locks = self.request_locks.read().await;
            if let Some(lock) = locks.get(&id) {
                return lock.clone();
            }
        }

        // Slow path: create lock (double-check after acquiring write lock)
        let mut locks = self.request_locks.write().await;
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry for `id` unless another task is holding or waiting
    /// on the same lock.
    async fn release_request_lock(&self, id: RequestId, request_lock: Arc<Mutex<()>>) {
        let mut locks = self.request_locks.write().await;
        // One reference in the map plus ours.
        if Arc::strong_count(&request_lock) == 2 {
            locks.remove(&id);
        }
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn require_supervisor(supervisor: &SupervisorId) -> Result<(), StoreError> {
    if supervisor.as_str().trim().is_empty() {
        return Err(StoreError::Validation(
            "supervisor id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Move `request` from `expected` to `to`, failing unless it is currently in
/// `expected` and the edge is in the table.
fn enter(
    request: &mut HelpRequest,
    expected: RequestStatus,
    to: RequestStatus,
) -> Result<(), StoreError> {
    if request.status != expected {
        return Err(IllegalTransition {
            from: request.status,
            to,
        }
        .into());
    }
    transition(expected, to)?;
    request.status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state_machine::repository::{InMemoryRepository, SqliteRepository};
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn store_with_clock() -> (RequestStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = RequestStore::new(Arc::new(InMemoryRepository::new()), clock.clone());
        (store, clock)
    }

    fn question(text: &str) -> NewRequest {
        NewRequest {
            customer_id: "cust-1".to_string(),
            customer_name: "Alice".to_string(),
            question: text.to_string(),
            ..Default::default()
        }
    }

    fn supervisor() -> SupervisorId {
        SupervisorId::from("jennifer_smith")
    }

    #[tokio::test]
    async fn test_create_then_get_is_pending() {
        let (store, _) = store_with_clock();
        let created = store.create(question("Do you do perms?")).await.unwrap();

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.status, RequestStatus::Pending);
        assert_eq!(fetched.created_at, fetched.updated_at);
        assert_eq!(fetched.created_at, start());
        assert!(fetched.assigned_to.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_question_and_customer() {
        let (store, _) = store_with_clock();
        assert!(matches!(
            store.create(question("   ")).await,
            Err(StoreError::Validation(_))
        ));

        let mut no_customer = question("hello?");
        no_customer.customer_id = " ".to_string();
        assert!(matches!(
            store.create(no_customer).await,
            Err(StoreError::Validation(_))
        ));
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn test_assign_moves_to_in_progress() {
        let (store, clock) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();
        clock.advance(Duration::seconds(5));

        let assigned = store.assign(created.id, supervisor()).await.unwrap();
        assert_eq!(assigned.status, RequestStatus::InProgress);
        assert_eq!(assigned.assigned_to, Some(supervisor()));
        assert_eq!(assigned.updated_at, start() + Duration::seconds(5));

        let again = store.assign(created.id, supervisor()).await;
        assert!(matches!(again, Err(StoreError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_assign_missing_request_is_not_found() {
        let (store, _) = store_with_clock();
        let result = store.assign(RequestId(9), supervisor()).await;
        assert!(matches!(result, Err(StoreError::NotFound(RequestId(9)))));
    }

    #[tokio::test]
    async fn test_resolve_requires_resolution_text() {
        let (store, clock) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();
        store.assign(created.id, supervisor()).await.unwrap();

        let missing = store
            .update_status(created.id, RequestStatus::Resolved, Some("  ".to_string()))
            .await;
        assert!(matches!(missing, Err(StoreError::Validation(_))));

        clock.advance(Duration::minutes(10));
        let resolved = store
            .update_status(
                created.id,
                RequestStatus::Resolved,
                Some("We open at 9".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, RequestStatus::Resolved);
        assert_eq!(resolved.resolution.as_deref(), Some("We open at 9"));
        assert_eq!(resolved.resolved_at, Some(start() + Duration::minutes(10)));
    }

    #[tokio::test]
    async fn test_resolved_to_pending_is_invalid() {
        let (store, _) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();
        store.assign(created.id, supervisor()).await.unwrap();
        store
            .update_status(created.id, RequestStatus::Resolved, Some("done".to_string()))
            .await
            .unwrap();

        let result = store
            .update_status(created.id, RequestStatus::Pending, None)
            .await;
        match result {
            Err(StoreError::InvalidTransition(t)) => {
                assert_eq!(t.from, RequestStatus::Resolved);
                assert_eq!(t.to, RequestStatus::Pending);
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolution_rejected_for_non_resolved_target() {
        let (store, _) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();
        store.assign(created.id, supervisor()).await.unwrap();

        let result = store
            .update_status(created.id, RequestStatus::Escalated, Some("x".to_string()))
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(
            store.get(created.id).await.unwrap().status,
            RequestStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_escalate_then_reassign() {
        let (store, _) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();

        let early = store.reassign(created.id, supervisor()).await;
        assert!(matches!(early, Err(StoreError::InvalidTransition(_))));

        store.assign(created.id, supervisor()).await.unwrap();
        store
            .update_status(created.id, RequestStatus::Escalated, None)
            .await
            .unwrap();

        let owner = SupervisorId::from("maria_rodriguez");
        let reassigned = store.reassign(created.id, owner.clone()).await.unwrap();
        assert_eq!(reassigned.status, RequestStatus::InProgress);
        assert_eq!(reassigned.assigned_to, Some(owner));
    }

    #[tokio::test]
    async fn test_updated_at_never_moves_backwards() {
        let (store, clock) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();

        clock.set(start() - Duration::hours(2));
        let assigned = store.assign(created.id, supervisor()).await.unwrap();
        assert_eq!(assigned.updated_at, created.updated_at);
        assert!(assigned.updated_at >= assigned.created_at);
    }

    #[tokio::test]
    async fn test_generation_bumps_only_on_success() {
        let (store, _) = store_with_clock();
        let created = store.create(question("q")).await.unwrap();
        assert_eq!(store.generation(), 1);

        let _ = store
            .update_status(created.id, RequestStatus::Resolved, Some("x".to_string()))
            .await;
        assert_eq!(store.generation(), 1);

        store.assign(created.id, supervisor()).await.unwrap();
        assert_eq!(store.generation(), 2);
    }

    fn sqlite_store() -> RequestStore {
        let repo = SqliteRepository::new_in_memory().unwrap();
        RequestStore::new(Arc::new(repo), Arc::new(ManualClock::new(start())))
    }

    /// Race 16 resolutions of one in-progress request and check exactly one
    /// lands.
    async fn assert_single_resolution_wins(store: Arc<RequestStore>) {
        let created = store.create(question("q")).await.unwrap();
        store.assign(created.id, supervisor()).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .update_status(
                            created.id,
                            RequestStatus::Resolved,
                            Some(format!("answer {}", i)),
                        )
                        .await
                })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(request) => winners.push(request),
                Err(StoreError::InvalidTransition(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(winners.len(), 1);
        let final_state = store.get(created.id).await.unwrap();
        assert_eq!(final_state.status, RequestStatus::Resolved);
        assert_eq!(final_state.resolution, winners[0].resolution);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_have_one_winner() {
        let (store, _) = store_with_clock();
        assert_single_resolution_wins(Arc::new(store)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_have_one_winner_on_sqlite() {
        assert_single_resolution_wins(Arc::new(sqlite_store())).await;
    }

    #[tokio::test]
    async fn test_assign_persists_in_progress_on_sqlite() {
        let store = sqlite_store();
        let created = store.create(question("q")).await.unwrap();

        store.assign(created.id, supervisor()).await.unwrap();
        let stored = store.get(created.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::InProgress);
        assert_eq!(stored.assigned_to, Some(supervisor()));

        store
            .update_status(created.id, RequestStatus::Escalated, None)
            .await
            .unwrap();
        store
            .reassign(created.id, SupervisorId::from("maria_rodriguez"))
            .await
            .unwrap();
        let resolved = store
            .update_status(created.id, RequestStatus::Resolved, Some("done".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved.status, RequestStatus::Resolved);
        assert_eq!(
            store.get(created.id).await.unwrap().status,
            RequestStatus::Resolved
        );
    }

    #[tokio::test]
    async fn test_request_locks_do_not_accumulate() {
        let (store, _) = store_with_clock();
        for _ in 0..5 {
            let created = store.create(question("q")).await.unwrap();
            store.assign(created.id, supervisor()).await.unwrap();
            store
                .update_status(created.id, RequestStatus::Resolved, Some("ok".to_string()))
                .await
                .unwrap();
        }
        let _ = store.assign(RequestId(404), supervisor()).await;

        assert!(store.request_locks.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_rejects_unrepresentable_offset() {
        let store = sqlite_store();
        store.create(question("q")).await.unwrap();

        let result = store
            .list(&RequestFilter::default(), Page::new(usize::MAX, 10))
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        let largest = store
            .list(&RequestFilter::default(), Page::new(MAX_OFFSET, 10))
            .await
            .unwrap();
        assert!(largest.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_and_assigns_lose_nothing() {
        let (store, _) = store_with_clock();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let created = store
                        .create(question(&format!("question {}", i)))
                        .await
                        .unwrap();
                    store.assign(created.id, supervisor()).await.unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 20);
        assert!(all.iter().all(|r| r.status == RequestStatus::InProgress));
        assert_eq!(store.generation(), 40);
    }
}
