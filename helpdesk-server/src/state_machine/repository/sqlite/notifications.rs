//! Notification audit log operations for the SQLite repository.
//!
//! Every delivery attempt is one row in `notification_records`. Rows are
//! only ever inserted.

use async_trait::async_trait;
use helpdesk_core::RequestId;
use rusqlite::{params, Row};
use tracing::warn;
use uuid::Uuid;

use super::super::{NotificationLog, RepositoryError};
use super::{decode_time, encode_time, lock_conn, usize_to_i64, SqliteRepository};
use crate::notify::{DeliveryOutcome, NotificationRecord};

const RECORD_COLUMNS: &str =
    "id, dispatch_id, request_id, channel, target, payload, outcome, error, retry_count, recorded_at";

struct RawRecordRow {
    id: i64,
    dispatch_id: String,
    request_id: i64,
    channel: String,
    target: String,
    payload: String,
    outcome: String,
    error: Option<String>,
    retry_count: i64,
    recorded_at: String,
}

impl RawRecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            dispatch_id: row.get(1)?,
            request_id: row.get(2)?,
            channel: row.get(3)?,
            target: row.get(4)?,
            payload: row.get(5)?,
            outcome: row.get(6)?,
            error: row.get(7)?,
            retry_count: row.get(8)?,
            recorded_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<NotificationRecord, RepositoryError> {
        Ok(NotificationRecord {
            id: self.id,
            dispatch_id: Uuid::parse_str(&self.dispatch_id)
                .map_err(|_| RepositoryError::corruption("notification dispatch id"))?,
            request_id: RequestId(self.request_id),
            channel: self.channel,
            target: self.target,
            payload: serde_json::from_str(&self.payload)
                .map_err(|_| RepositoryError::corruption("notification payload JSON"))?,
            timestamp: decode_time(&self.recorded_at, "notification timestamp")?,
            outcome: DeliveryOutcome::from_parts(&self.outcome, self.error)
                .ok_or_else(|| RepositoryError::corruption("notification outcome"))?,
            retry_count: u32::try_from(self.retry_count)
                .map_err(|_| RepositoryError::corruption("notification retry count"))?,
        })
    }
}

fn query_records(
    conn: &rusqlite::Connection,
    sql: &str,
    params: impl rusqlite::Params,
    operation: &'static str,
) -> Result<Vec<NotificationRecord>, RepositoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(params, RawRecordRow::from_row)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    let mut records = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
        let id = raw.id;
        match raw.decode() {
            Ok(record) => records.push(record),
            Err(e) => warn!(record_id = id, "Skipping corrupt notification record: {}", e),
        }
    }
    Ok(records)
}

#[async_trait]
impl NotificationLog for SqliteRepository {
    async fn append(&self, record: &NotificationRecord) -> Result<i64, RepositoryError> {
        let conn = self.conn.clone();
        let dispatch_id = record.dispatch_id.to_string();
        let request_id = record.request_id.0;
        let channel = record.channel.clone();
        let target = record.target.clone();
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| RepositoryError::storage("append_notification serialize", e.to_string()))?;
        let outcome = record.outcome.as_str();
        let error = record.outcome.error_message().map(str::to_string);
        let retry_count = i64::from(record.retry_count);
        let recorded_at = encode_time(record.timestamp);

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "append_notification")?;

            conn.execute(
                "INSERT INTO notification_records (dispatch_id, request_id, channel, target,
                                                   payload, outcome, error, retry_count, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    dispatch_id,
                    request_id,
                    channel,
                    target,
                    payload,
                    outcome,
                    error,
                    retry_count,
                    recorded_at
                ],
            )
            .map_err(|e| RepositoryError::storage("append_notification", e.to_string()))?;

            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| RepositoryError::storage("append_notification", e.to_string()))?
    }

    async fn records_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "records_for_request")?;
            query_records(
                &conn,
                &format!(
                    "SELECT {} FROM notification_records WHERE request_id = ?1 ORDER BY id ASC",
                    RECORD_COLUMNS
                ),
                params![request_id.0],
                "records_for_request",
            )
        })
        .await
        .map_err(|e| RepositoryError::storage("records_for_request", e.to_string()))?
    }

    async fn recent_records(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let conn = self.conn.clone();
        let limit_i64 = usize_to_i64(limit, "limit", "recent_records")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "recent_records")?;
            query_records(
                &conn,
                &format!(
                    "SELECT {} FROM notification_records ORDER BY id DESC LIMIT ?1",
                    RECORD_COLUMNS
                ),
                params![limit_i64],
                "recent_records",
            )
        })
        .await
        .map_err(|e| RepositoryError::storage("recent_records", e.to_string()))?
    }
}
