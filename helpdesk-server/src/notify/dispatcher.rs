//! Fan-out with retry and audit.
//!
//! Every channel is driven concurrently. Each attempt is bounded by the
//! policy's attempt timeout and written to the audit log before the next
//! attempt starts. Transient failures back off exponentially; permanent
//! failures stop that channel immediately. A channel's failure never affects
//! the others, and audit write failures are logged, not propagated.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use helpdesk_core::{HelpRequest, RequestId, Supervisor};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    DeliveryError, DeliveryOutcome, Notification, NotificationChannel, NotificationRecord,
};
use crate::clock::Clock;
use crate::state_machine::NotificationLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 0 means a single attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single `send` call.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry + 1`: `initial * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Final outcome for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: String,
    pub target: String,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dispatch_id: Uuid,
    pub request_id: RequestId,
    pub channels: Vec<ChannelReport>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.channels.len() - self.succeeded()
    }
}

pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    log: Arc<dyn NotificationLog>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        log: Arc<dyn NotificationLog>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channels,
            log,
            clock,
            policy,
        }
    }

    pub fn channel_kinds(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.kind()).collect()
    }

    /// Notify `supervisor` about `request` on every configured channel.
    ///
    /// `request` must be a snapshot taken after the store commit. Returns once
    /// every channel has a final outcome.
    pub async fn dispatch(&self, request: &HelpRequest, supervisor: &Supervisor) -> DispatchReport {
        let dispatch_id = Uuid::new_v4();
        let notification = Notification::new(request, supervisor, self.clock.now());
        let payload = notification.payload();

        let channels = join_all(self.channels.iter().map(|channel| {
            self.deliver(channel.as_ref(), &notification, &payload, dispatch_id)
        }))
        .await;

        let report = DispatchReport {
            dispatch_id,
            request_id: request.id,
            channels,
        };
        info!(
            request_id = %request.id,
            %dispatch_id,
            supervisor = %supervisor.id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Notification dispatch finished"
        );
        report
    }

    async fn deliver(
        &self,
        channel: &dyn NotificationChannel,
        notification: &Notification,
        payload: &serde_json::Value,
        dispatch_id: Uuid,
    ) -> ChannelReport {
        let kind = channel.kind();
        let target = channel.target();
        let mut retry_count = 0;

        loop {
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                channel.send(notification),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::transient(format!(
                    "attempt exceeded {:?}",
                    self.policy.attempt_timeout
                ))),
            };
            let outcome = DeliveryOutcome::from(&result);

            self.record(NotificationRecord {
                id: 0,
                request_id: notification.request_id,
                dispatch_id,
                channel: kind.to_string(),
                target: target.clone(),
                payload: payload.clone(),
                timestamp: self.clock.now(),
                outcome: outcome.clone(),
                retry_count,
            })
            .await;

            match result {
                Err(e) if e.is_transient() && retry_count < self.policy.max_retries => {
                    let delay = self.policy.backoff(retry_count);
                    warn!(
                        request_id = %notification.request_id,
                        channel = kind,
                        retry_count,
                        "Transient delivery failure, retrying in {:?}: {}",
                        delay,
                        e.message
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => {
                    error!(
                        request_id = %notification.request_id,
                        channel = kind,
                        retry_count,
                        "Delivery failed: {}",
                        e
                    );
                    return ChannelReport {
                        channel: kind.to_string(),
                        target,
                        attempts: retry_count + 1,
                        outcome,
                    };
                }
                Ok(_) => {
                    return ChannelReport {
                        channel: kind.to_string(),
                        target,
                        attempts: retry_count + 1,
                        outcome,
                    };
                }
            }
        }
    }

    async fn record(&self, record: NotificationRecord) {
        if let Err(e) = self.log.append(&record).await {
            error!(
                request_id = %record.request_id,
                channel = %record.channel,
                "Failed to write notification record: {}",
                e
            );
        }
    }
}
