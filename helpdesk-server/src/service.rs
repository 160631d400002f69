//! The help desk facade.
//!
//! `HelpDesk` wires the classifier, resolver, store, dispatcher and
//! statistics together and exposes the operations the HTTP layer calls.

use std::sync::Arc;

use helpdesk_core::{
    classify, has_urgent_signal, AssignmentResolver, HelpRequest, Metadata, Priority, RequestId,
    RequestStatus, Supervisor, SupervisorId,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::notify::{DispatchReport, NotificationDispatcher, NotificationRecord};
use crate::state_machine::repository::MAX_PAGE_SIZE;
use crate::state_machine::{
    NewRequest, NotificationLog, Page, RequestFilter, RequestStore, StoreError,
};
use crate::statistics::{Statistics, StatisticsAggregator};

/// An inbound question from a customer.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub customer_id: String,
    pub customer_name: String,
    pub question: String,
    /// Replaces the classified priority. The only way to get `Urgent`.
    pub priority: Option<Priority>,
    pub metadata: Metadata,
}

/// A request after a hand-off to a supervisor, plus how notifying went.
#[derive(Debug, Clone, Serialize)]
pub struct Handoff {
    pub request: HelpRequest,
    /// None if the request could not be assigned.
    pub notification: Option<DispatchReport>,
}

pub struct HelpDesk {
    store: Arc<RequestStore>,
    resolver: AssignmentResolver,
    dispatcher: NotificationDispatcher,
    log: Arc<dyn NotificationLog>,
    statistics: StatisticsAggregator,
    clock: Arc<dyn Clock>,
}

impl HelpDesk {
    pub fn new(
        store: Arc<RequestStore>,
        resolver: AssignmentResolver,
        dispatcher: NotificationDispatcher,
        log: Arc<dyn NotificationLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            statistics: StatisticsAggregator::new(store.clone()),
            store,
            resolver,
            dispatcher,
            log,
            clock,
        }
    }

    pub fn supervisors(&self) -> Vec<&Supervisor> {
        self.resolver.supervisors()
    }

    /// Record a question, assign it and notify the supervisor.
    ///
    /// Only a failure to store the request is an error. Assignment and
    /// notification problems are logged and reflected in the returned
    /// `Handoff`; the request id is valid either way.
    pub async fn submit_question(&self, submission: Submission) -> Result<Handoff, StoreError> {
        let classification = classify(&submission.question);
        let priority = submission.priority.unwrap_or(classification.priority);

        let mut metadata = submission.metadata;
        metadata.insert(
            "urgent_signal".to_string(),
            serde_json::Value::Bool(has_urgent_signal(&submission.question)),
        );
        metadata.insert(
            "priority_source".to_string(),
            serde_json::Value::from(if submission.priority.is_some() {
                "override"
            } else {
                "classifier"
            }),
        );

        let created = self
            .store
            .create(NewRequest {
                customer_id: submission.customer_id,
                customer_name: submission.customer_name,
                question: submission.question,
                priority,
                tags: classification.tags,
                metadata,
            })
            .await?;

        let supervisor_id = self
            .resolver
            .resolve(created.priority, &created.question, self.clock.now());

        let assigned = match self.store.assign(created.id, supervisor_id.clone()).await {
            Ok(assigned) => assigned,
            Err(e) => {
                error!(
                    request_id = %created.id,
                    supervisor = %supervisor_id,
                    "Failed to assign new request: {}",
                    e
                );
                return Ok(Handoff {
                    request: created,
                    notification: None,
                });
            }
        };

        info!(
            request_id = %assigned.id,
            priority = %assigned.priority,
            supervisor = %supervisor_id,
            "Assigned new request"
        );
        let notification = self.notify(&assigned, &supervisor_id).await;
        Ok(Handoff {
            request: assigned,
            notification,
        })
    }

    pub async fn get_request(&self, id: RequestId) -> Result<HelpRequest, StoreError> {
        self.store.get(id).await
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
        page: Page,
    ) -> Result<Vec<HelpRequest>, StoreError> {
        self.store.list(filter, page).await
    }

    pub async fn set_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        resolution: Option<String>,
    ) -> Result<HelpRequest, StoreError> {
        self.store.update_status(id, status, resolution).await
    }

    /// Give an escalated request to `supervisor_id` and notify them.
    pub async fn reassign_request(
        &self,
        id: RequestId,
        supervisor_id: SupervisorId,
    ) -> Result<Handoff, StoreError> {
        if self.resolver.supervisor(&supervisor_id).is_none() {
            return Err(StoreError::Validation(format!(
                "unknown supervisor '{}'",
                supervisor_id
            )));
        }

        let request = self.store.reassign(id, supervisor_id.clone()).await?;
        let notification = self.notify(&request, &supervisor_id).await;
        Ok(Handoff {
            request,
            notification,
        })
    }

    pub async fn get_statistics(&self) -> Result<Statistics, StoreError> {
        self.statistics.get().await
    }

    /// Every notification attempt for a request, oldest first.
    pub async fn notifications_for(
        &self,
        id: RequestId,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        // Distinguish "no attempts yet" from "no such request".
        self.store.get(id).await?;
        Ok(self.log.records_for_request(id).await?)
    }

    /// The most recent notification attempts, newest first.
    pub async fn recent_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(self
            .log
            .recent_records(limit.clamp(1, MAX_PAGE_SIZE))
            .await?)
    }

    async fn notify(
        &self,
        request: &HelpRequest,
        supervisor_id: &SupervisorId,
    ) -> Option<DispatchReport> {
        match self.resolver.supervisor(supervisor_id) {
            Some(supervisor) => Some(self.dispatcher.dispatch(request, supervisor).await),
            None => {
                warn!(
                    request_id = %request.id,
                    supervisor = %supervisor_id,
                    "Assigned supervisor is not in the roster, skipping notification"
                );
                None
            }
        }
    }
}
