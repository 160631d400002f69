//! Console channel: prints a simulated text message for the supervisor.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use super::{Ack, DeliveryError, Notification, NotificationChannel};

const RULE_WIDTH: usize = 60;

pub struct ConsoleChannel {
    label: String,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ConsoleChannel {
    /// Write to standard output.
    pub fn stdout() -> Self {
        Self::with_writer("stdout", std::io::stdout())
    }

    pub fn with_writer(label: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            label: label.into(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn format(notification: &Notification) -> String {
        let heavy = "=".repeat(RULE_WIDTH);
        let light = "-".repeat(RULE_WIDTH);
        let phone = notification
            .supervisor_phone
            .as_deref()
            .unwrap_or("no phone on file");

        format!(
            "\n{heavy}\nSUPERVISOR TEXT MESSAGE\n{heavy}\n\
             To: {name} ({phone})\n\
             From: Help desk agent\n\
             Time: {time}\n\
             {light}\n\
             Message: {message}\n\
             Customer: {customer}\n\
             Priority: {priority}\n\
             Request ID: #{id}\n\
             {heavy}\n",
            name = notification.supervisor_name,
            time = notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            message = notification.message(),
            customer = notification.customer_name,
            priority = notification.priority,
            id = notification.request_id,
        )
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn kind(&self) -> &'static str {
        "console"
    }

    fn target(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, notification: &Notification) -> Result<Ack, DeliveryError> {
        let text = Self::format(notification);
        let writer = self.writer.clone();

        tokio::task::spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|_| DeliveryError::permanent("console writer poisoned"))?;
            writer
                .write_all(text.as_bytes())
                .and_then(|()| writer.flush())
                .map_err(|e| DeliveryError::permanent(format!("console write failed: {}", e)))
        })
        .await
        .map_err(|e| DeliveryError::transient(format!("console task failed: {}", e)))??;

        info!(
            request_id = %notification.request_id,
            supervisor = %notification.supervisor_id,
            "Printed supervisor text message"
        );
        Ok(Ack::new(format!("written to {}", self.label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::sample_notification;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_format_contains_message_block() {
        let text = ConsoleChannel::format(&sample_notification());
        assert!(text.contains("SUPERVISOR TEXT MESSAGE"));
        assert!(text.contains("To: David Chen (+1-555-123-4569)"));
        assert!(text.contains("Priority: high"));
        assert!(text.contains("Request ID: #7"));
        assert!(text.contains("Time: 2024-05-01 14:30:00 UTC"));
    }

    #[tokio::test]
    async fn test_send_writes_to_writer() {
        let buffer = SharedBuffer::default();
        let channel = ConsoleChannel::with_writer("test-buffer", buffer.clone());

        let ack = channel.send(&sample_notification()).await.unwrap();
        assert_eq!(ack.detail, "written to test-buffer");
        assert_eq!(channel.kind(), "console");
        assert_eq!(channel.target(), "test-buffer");

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("Customer: Alice"));
    }

    #[tokio::test]
    async fn test_write_failure_is_permanent() {
        let channel = ConsoleChannel::with_writer("broken", BrokenPipe);
        let err = channel.send(&sample_notification()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
