//! Repository abstraction for help request persistence.
//!
//! `RequestRepository` stores the requests themselves; `NotificationLog` is
//! the append-only audit trail of notification attempts. Both are implemented
//! by an in-memory backend (tests, ephemeral runs) and a SQLite backend.
//!
//! Repositories do not enforce the status state machine. That is the job of
//! `RequestStore`, which is the only writer in production code.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helpdesk_core::{HelpRequest, Metadata, Priority, RequestId, RequestStatus};
use thiserror::Error;

use crate::notify::NotificationRecord;

/// Default number of requests per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Upper bound on the page size a caller may ask for.
pub const MAX_PAGE_SIZE: usize = 500;

/// Largest offset every backend can represent.
pub const MAX_OFFSET: usize = i64::MAX as usize;

/// Errors from the storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("stored {what} is corrupt")]
    Corruption { what: &'static str },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        Self::Corruption { what }
    }
}

/// Fields supplied when a request is first stored.
///
/// The repository allocates the id; status starts at `Pending` and
/// `updated_at` equals `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHelpRequest {
    pub customer_id: String,
    pub customer_name: String,
    pub question: String,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl NewHelpRequest {
    pub(crate) fn into_request(self, id: RequestId) -> HelpRequest {
        HelpRequest {
            id,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            question: self.question,
            status: RequestStatus::Pending,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.created_at,
            resolved_at: None,
            assigned_to: None,
            resolution: None,
            tags: self.tags,
            metadata: self.metadata,
        }
    }
}

/// Filter for listing requests. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    pub customer_id: Option<String>,
    pub tag: Option<String>,
}

impl RequestFilter {
    pub fn with_status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, request: &HelpRequest) -> bool {
        self.status.map_or(true, |s| request.status == s)
            && self.priority.map_or(true, |p| request.priority == p)
            && self
                .created_after
                .map_or(true, |after| request.created_at >= after)
            && self
                .created_before
                .map_or(true, |before| request.created_at < before)
            && self
                .customer_id
                .as_ref()
                .map_or(true, |c| &request.customer_id == c)
            && self.tag.as_ref().map_or(true, |t| request.has_tag(t))
    }
}

/// Offset/limit pagination. The limit is clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn first(limit: usize) -> Self {
        Self::new(0, limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE)
    }
}

/// Newest first, ties broken by the larger id.
pub(crate) fn newest_first(a: &HelpRequest, b: &HelpRequest) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Storage for help requests.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Store a new request and return it with its allocated id.
    async fn insert(&self, request: NewHelpRequest) -> Result<HelpRequest, RepositoryError>;

    /// Get a request by id, returning None if not found.
    async fn get(&self, id: RequestId) -> Result<Option<HelpRequest>, RepositoryError>;

    /// Overwrite the mutable fields of an existing request.
    ///
    /// Returns false if no request with that id exists.
    async fn update(&self, request: &HelpRequest) -> Result<bool, RepositoryError>;

    /// Requests matching `filter`, newest first.
    async fn list(
        &self,
        filter: &RequestFilter,
        page: Page,
    ) -> Result<Vec<HelpRequest>, RepositoryError>;

    /// Every stored request, in no particular order.
    async fn get_all(&self) -> Result<Vec<HelpRequest>, RepositoryError>;
}

/// Append-only audit log of notification attempts.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Append a record, returning its assigned id. The record's own `id` is
    /// ignored.
    async fn append(&self, record: &NotificationRecord) -> Result<i64, RepositoryError>;

    /// All attempts for a request, oldest first.
    async fn records_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRecord>, RepositoryError>;

    /// The most recent attempts across all requests, newest first.
    async fn recent_records(&self, limit: usize)
        -> Result<Vec<NotificationRecord>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request_at(id: i64, hour: u32) -> HelpRequest {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
        NewHelpRequest {
            customer_id: format!("cust-{}", id % 2),
            customer_name: "Test".to_string(),
            question: "q".to_string(),
            priority: Priority::Low,
            tags: ["hair".to_string()].into_iter().collect(),
            metadata: Metadata::new(),
            created_at: at,
        }
        .into_request(RequestId(id))
    }

    #[test]
    fn test_page_clamps_limit() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(0, 10_000).limit, MAX_PAGE_SIZE);
        assert_eq!(Page::default().limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_filter_date_range_is_half_open() {
        let filter = RequestFilter {
            created_after: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
            created_before: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(!filter.matches(&request_at(1, 9)));
        assert!(filter.matches(&request_at(2, 10)));
        assert!(filter.matches(&request_at(3, 11)));
        assert!(!filter.matches(&request_at(4, 12)));
    }

    #[test]
    fn test_filter_by_customer_and_tag() {
        let filter = RequestFilter {
            customer_id: Some("cust-1".to_string()),
            tag: Some("hair".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&request_at(1, 9)));
        assert!(!filter.matches(&request_at(2, 9)));

        let filter = RequestFilter {
            tag: Some("nails".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&request_at(1, 9)));
    }

    #[test]
    fn test_newest_first_breaks_ties_by_id() {
        let mut requests = vec![request_at(1, 9), request_at(3, 9), request_at(2, 10)];
        requests.sort_by(newest_first);
        let ids: Vec<_> = requests.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
