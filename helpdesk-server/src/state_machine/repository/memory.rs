//! In-memory implementation of the repository traits.
//!
//! All state is held in memory and lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use helpdesk_core::{HelpRequest, RequestId};
use tokio::sync::RwLock;

use super::{
    newest_first, NewHelpRequest, NotificationLog, Page, RepositoryError, RequestFilter,
    RequestRepository,
};
use crate::notify::NotificationRecord;

#[derive(Default)]
struct Requests {
    next_id: i64,
    by_id: HashMap<RequestId, HelpRequest>,
}

/// In-memory repository.
///
/// Stores requests in a `HashMap` and notification records in a `Vec`, each
/// protected by a `RwLock`. Ids start at 1, as they do in SQLite.
#[derive(Default)]
pub struct InMemoryRepository {
    requests: RwLock<Requests>,
    notifications: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestRepository for InMemoryRepository {
    async fn insert(&self, request: NewHelpRequest) -> Result<HelpRequest, RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.next_id += 1;
        let id = RequestId(requests.next_id);
        let stored = request.into_request(id);
        requests.by_id.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: RequestId) -> Result<Option<HelpRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.by_id.get(&id).cloned())
    }

    async fn update(&self, request: &HelpRequest) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        match requests.by_id.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(
        &self,
        filter: &RequestFilter,
        page: Page,
    ) -> Result<Vec<HelpRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<HelpRequest> = requests
            .by_id
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(newest_first);
        Ok(matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<HelpRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.by_id.values().cloned().collect())
    }
}

#[async_trait]
impl NotificationLog for InMemoryRepository {
    async fn append(&self, record: &NotificationRecord) -> Result<i64, RepositoryError> {
        let mut notifications = self.notifications.write().await;
        let id = i64::try_from(notifications.len())
            .map_err(|e| RepositoryError::storage("append notification", e.to_string()))?
            + 1;
        let mut stored = record.clone();
        stored.id = id;
        notifications.push(stored);
        Ok(id)
    }

    async fn records_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn recent_records(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().rev().take(limit).cloned().collect())
    }
}
