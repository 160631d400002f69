//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use helpdesk_core::{HelpRequest, Metadata, Priority, RequestStatus, SupervisorId};
use serde::{Deserialize, Serialize};

use crate::service::Submission;
use crate::state_machine::repository::DEFAULT_PAGE_SIZE;
use crate::state_machine::{Page, RequestFilter};

/// Body of `POST /requests`.
#[derive(Debug, Deserialize)]
pub struct SubmitQuestionBody {
    pub customer_id: String,
    #[serde(default)]
    pub customer_name: String,
    pub question: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<SubmitQuestionBody> for Submission {
    fn from(body: SubmitQuestionBody) -> Self {
        Submission {
            customer_id: body.customer_id,
            customer_name: body.customer_name,
            question: body.question,
            priority: body.priority,
            metadata: body.metadata,
        }
    }
}

/// Body of `POST /requests/:id/status`.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateBody {
    pub status: RequestStatus,
    #[serde(default)]
    pub resolution: Option<String>,
}

/// Body of `POST /requests/:id/reassign`.
#[derive(Debug, Deserialize)]
pub struct ReassignBody {
    pub supervisor_id: SupervisorId,
}

/// Query string of `GET /requests`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    /// Inclusive, RFC 3339.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive, RFC 3339.
    pub until: Option<DateTime<Utc>>,
    pub customer_id: Option<String>,
    pub tag: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn filter(&self) -> RequestFilter {
        RequestFilter {
            status: self.status,
            priority: self.priority,
            created_after: self.since,
            created_before: self.until,
            customer_id: self.customer_id.clone(),
            tag: self.tag.clone(),
        }
    }

    pub fn page(&self) -> Page {
        Page::new(
            self.offset.unwrap_or(0),
            self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }
}

/// Query string of `GET /notifications`.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    pub requests: Vec<HelpRequest>,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::repository::MAX_PAGE_SIZE;

    #[test]
    fn test_list_query_defaults() {
        let query = ListQuery::default();
        assert_eq!(query.filter(), RequestFilter::default());
        assert_eq!(query.page(), Page::new(0, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn test_list_query_clamps_limit() {
        let query = ListQuery {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(query.page().limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_submit_body_accepts_minimal_json() {
        let body: SubmitQuestionBody =
            serde_json::from_str(r#"{"customer_id":"c1","question":"hi"}"#).unwrap();
        let submission = Submission::from(body);
        assert_eq!(submission.customer_name, "");
        assert_eq!(submission.priority, None);
        assert!(submission.metadata.is_empty());
    }

    #[test]
    fn test_status_body_uses_snake_case() {
        let body: StatusUpdateBody =
            serde_json::from_str(r#"{"status":"in_progress"}"#).unwrap();
        assert_eq!(body.status, RequestStatus::InProgress);
        assert_eq!(body.resolution, None);
    }
}
