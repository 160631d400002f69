//! Webhook channel: POSTs the notification payload as JSON.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{Ack, DeliveryError, Notification, NotificationChannel};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    /// The URL is not validated here; a malformed URL fails every send with
    /// a permanent error so the failure shows up in the audit log.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("helpdesk-server/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Whether an HTTP status is worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_send_error(error: reqwest::Error) -> DeliveryError {
    if error.is_builder() {
        DeliveryError::permanent(format!("invalid webhook request: {}", error))
    } else if error.is_timeout() {
        DeliveryError::transient(format!("webhook timed out: {}", error))
    } else if error.is_connect() {
        DeliveryError::transient(format!("webhook connection failed: {}", error))
    } else {
        DeliveryError::transient(format!("webhook request failed: {}", error))
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    fn target(&self) -> String {
        self.url.clone()
    }

    async fn send(&self, notification: &Notification) -> Result<Ack, DeliveryError> {
        let url = Url::parse(&self.url).map_err(|e| {
            DeliveryError::permanent(format!("malformed webhook URL '{}': {}", self.url, e))
        })?;

        let response = self
            .client
            .post(url)
            .json(&notification.payload())
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(
                request_id = %notification.request_id,
                status = %status,
                "Webhook delivered"
            );
            return Ok(Ack::new(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            request_id = %notification.request_id,
            status = %status,
            "Webhook rejected notification: {}",
            body
        );
        let message = format!("webhook returned HTTP {}", status.as_u16());
        if is_transient_status(status) {
            Err(DeliveryError::transient(message))
        } else {
            Err(DeliveryError::permanent(message))
        }
    }
}
