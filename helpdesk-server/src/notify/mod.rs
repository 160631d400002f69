//! Supervisor notifications.
//!
//! A `Notification` is built from a committed request snapshot and the
//! assigned supervisor. The `NotificationDispatcher` fans it out across every
//! configured `NotificationChannel`, retrying transient failures, and appends
//! one `NotificationRecord` per attempt to the audit log.

mod console;
mod dispatcher;
mod webhook;

pub use console::ConsoleChannel;
pub use dispatcher::{ChannelReport, DispatchReport, NotificationDispatcher, RetryPolicy};
pub use webhook::WebhookChannel;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use helpdesk_core::{HelpRequest, Priority, RequestId, Supervisor, SupervisorId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What a supervisor is told about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub request_id: RequestId,
    pub customer_id: String,
    pub customer_name: String,
    pub question: String,
    pub priority: Priority,
    pub supervisor_id: SupervisorId,
    pub supervisor_name: String,
    pub supervisor_phone: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(request: &HelpRequest, supervisor: &Supervisor, timestamp: DateTime<Utc>) -> Self {
        Self {
            request_id: request.id,
            customer_id: request.customer_id.clone(),
            customer_name: request.customer_name.clone(),
            question: request.question.clone(),
            priority: request.priority,
            supervisor_id: supervisor.id.clone(),
            supervisor_name: supervisor.name.clone(),
            supervisor_phone: supervisor.phone.clone(),
            timestamp,
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Hey {}, I need help answering: '{}'",
            self.supervisor_name, self.question
        )
    }

    /// JSON body sent to webhooks and snapshotted into the audit log.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "event_type": "help_request_created",
            "request_id": self.request_id,
            "customer": self.customer_name,
            "question": self.question,
            "priority": self.priority,
            "supervisor": self.supervisor_name,
            "message": self.message(),
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

/// Successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub detail: String,
}

impl Ack {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Worth retrying: timeouts, connection failures, 5xx, 408, 429.
    Transient,
    /// Retrying cannot help: other 4xx, malformed targets.
    Permanent,
}

impl std::fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} delivery failure: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DeliveryErrorKind::Transient
    }
}

/// Result of one delivery attempt, as stored in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    TransientFailure { error: String },
    PermanentFailure { error: String },
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientFailure { .. } => "transient_failure",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::TransientFailure { error } | Self::PermanentFailure { error } => Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Rebuild an outcome from its stored `(kind, error)` columns.
    pub fn from_parts(kind: &str, error: Option<String>) -> Option<Self> {
        match kind {
            "success" => Some(Self::Success),
            "transient_failure" => Some(Self::TransientFailure {
                error: error.unwrap_or_default(),
            }),
            "permanent_failure" => Some(Self::PermanentFailure {
                error: error.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

impl From<&Result<Ack, DeliveryError>> for DeliveryOutcome {
    fn from(result: &Result<Ack, DeliveryError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) if e.is_transient() => Self::TransientFailure {
                error: e.message.clone(),
            },
            Err(e) => Self::PermanentFailure {
                error: e.message.clone(),
            },
        }
    }
}

/// One delivery attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Assigned by the log on append; 0 before that.
    pub id: i64,
    pub request_id: RequestId,
    /// Shared by every attempt of one dispatch call.
    pub dispatch_id: Uuid,
    pub channel: String,
    pub target: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
    /// 0 for the first attempt.
    pub retry_count: u32,
}

/// A way of reaching a supervisor.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel kind, e.g. `console` or `webhook`.
    fn kind(&self) -> &'static str;

    /// Where this channel delivers to, for the audit log.
    fn target(&self) -> String;

    async fn send(&self, notification: &Notification) -> Result<Ack, DeliveryError>;
}
