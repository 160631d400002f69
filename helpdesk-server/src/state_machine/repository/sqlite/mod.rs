//! SQLite implementation of the repository traits.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Column encoding
//!
//! Timestamps are RFC 3339 text with microsecond precision and a `Z` suffix,
//! so lexical order equals chronological order and range filters can compare
//! strings. Tags are a JSON array, metadata a JSON object.

mod notifications;


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use helpdesk_core::{HelpRequest, Metadata, RequestId, SupervisorId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{error, warn};

use super::{NewHelpRequest, Page, RepositoryError, RequestFilter, RequestRepository};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

const REQUEST_COLUMNS: &str = "id, customer_id, customer_name, question, status, priority, \
     created_at, updated_at, resolved_at, assigned_to, resolution, tags, metadata";

/// SQLite-backed repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    /// Database connection. Exposed as `pub(crate)` so tests can plant
    /// corrupt rows.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    /// Runs any pending migrations if the database exists but has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` so committed writes survive power loss
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // The database holds customer names and questions.
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently keep DELETE mode on filesystems without shared
        // memory support, so check what we actually got. In-memory databases
        // report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        // 0 if the table is empty (fresh database)
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Migration from version 0 (fresh database) to version 1
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS help_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    customer_id TEXT NOT NULL,
                    customer_name TEXT NOT NULL,
                    question TEXT NOT NULL,
                    status TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    resolved_at TEXT,
                    assigned_to TEXT,
                    resolution TEXT,
                    tags TEXT NOT NULL DEFAULT '[]',
                    metadata TEXT NOT NULL DEFAULT '{}'
                );

                CREATE INDEX IF NOT EXISTS idx_help_requests_status
                    ON help_requests(status);
                CREATE INDEX IF NOT EXISTS idx_help_requests_priority
                    ON help_requests(priority);
                CREATE INDEX IF NOT EXISTS idx_help_requests_created_at
                    ON help_requests(created_at DESC, id DESC);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Migration from version 1 to version 2: notification audit log
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS notification_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    dispatch_id TEXT NOT NULL,
                    request_id INTEGER NOT NULL,
                    channel TEXT NOT NULL,
                    target TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    outcome TEXT NOT NULL,
                    error TEXT,
                    retry_count INTEGER NOT NULL,
                    recorded_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_notification_records_request
                    ON notification_records(request_id, id);
                CREATE INDEX IF NOT EXISTS idx_notification_records_recent
                    ON notification_records(recorded_at DESC);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

// =============================================================================
// Encoding helpers
// =============================================================================

pub(super) fn lock_conn<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

pub(super) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn decode_time(
    value: &str,
    what: &'static str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| RepositoryError::corruption(what))
}

/// Convert a usize limit or offset to i64 for SQLite.
///
/// Very large usize values would wrap to negative with `as i64`, which
/// changes what SQLite's LIMIT means.
pub(super) fn usize_to_i64(
    value: usize,
    field: &'static str,
    operation: &'static str,
) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!(
                "{} {} exceeds maximum storable value ({})",
                field,
                value,
                i64::MAX
            ),
        )
    })
}

/// A `help_requests` row before decoding. Kept separate so a corrupt row can
/// be reported without failing the whole query.
struct RawRequestRow {
    id: i64,
    customer_id: String,
    customer_name: String,
    question: String,
    status: String,
    priority: String,
    created_at: String,
    updated_at: String,
    resolved_at: Option<String>,
    assigned_to: Option<String>,
    resolution: Option<String>,
    tags: String,
    metadata: String,
}

impl RawRequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            customer_name: row.get(2)?,
            question: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            resolved_at: row.get(8)?,
            assigned_to: row.get(9)?,
            resolution: row.get(10)?,
            tags: row.get(11)?,
            metadata: row.get(12)?,
        })
    }

    fn decode(self) -> Result<HelpRequest, RepositoryError> {
        Ok(HelpRequest {
            id: RequestId(self.id),
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            question: self.question,
            status: self
                .status
                .parse()
                .map_err(|_| RepositoryError::corruption("request status"))?,
            priority: self
                .priority
                .parse()
                .map_err(|_| RepositoryError::corruption("request priority"))?,
            created_at: decode_time(&self.created_at, "created_at timestamp")?,
            updated_at: decode_time(&self.updated_at, "updated_at timestamp")?,
            resolved_at: self
                .resolved_at
                .as_deref()
                .map(|t| decode_time(t, "resolved_at timestamp"))
                .transpose()?,
            assigned_to: self.assigned_to.map(SupervisorId),
            resolution: self.resolution,
            tags: serde_json::from_str(&self.tags)
                .map_err(|_| RepositoryError::corruption("tags JSON"))?,
            metadata: serde_json::from_str::<Metadata>(&self.metadata)
                .map_err(|_| RepositoryError::corruption("metadata JSON"))?,
        })
    }
}

/// Decode rows for a multi-row query, skipping rows that fail to decode so
/// one bad record does not hide the rest.
fn decode_rows(
    rows: impl Iterator<Item = rusqlite::Result<RawRequestRow>>,
    operation: &'static str,
) -> Vec<HelpRequest> {
    let mut requests = Vec::new();
    for row in rows {
        let raw = match row {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to read help_requests row during {}: {}", operation, e);
                continue;
            }
        };
        let id = raw.id;
        match raw.decode() {
            Ok(request) => requests.push(request),
            Err(e) => {
                warn!(request_id = id, "Skipping corrupt help request: {}", e);
            }
        }
    }
    requests
}

/// Build the WHERE clause and its bound values for a filter.
fn filter_clause(filter: &RequestFilter) -> (String, Vec<Value>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filter.status {
        conditions.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(priority) = filter.priority {
        conditions.push("priority = ?");
        values.push(Value::Text(priority.as_str().to_string()));
    }
    if let Some(after) = filter.created_after {
        conditions.push("created_at >= ?");
        values.push(Value::Text(encode_time(after)));
    }
    if let Some(before) = filter.created_before {
        conditions.push("created_at < ?");
        values.push(Value::Text(encode_time(before)));
    }
    if let Some(customer_id) = &filter.customer_id {
        conditions.push("customer_id = ?");
        values.push(Value::Text(customer_id.clone()));
    }
    if let Some(tag) = &filter.tag {
        conditions.push(
            "EXISTS (SELECT 1 FROM json_each(help_requests.tags) WHERE json_each.value = ?)",
        );
        values.push(Value::Text(tag.clone()));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), values)
    }
}

// =============================================================================
// RequestRepository trait implementation
// =============================================================================

#[async_trait]
impl RequestRepository for SqliteRepository {
    async fn insert(&self, request: NewHelpRequest) -> Result<HelpRequest, RepositoryError> {
        let conn = self.conn.clone();
        let tags_json = serde_json::to_string(&request.tags)
            .map_err(|e| RepositoryError::storage("serialize tags", e.to_string()))?;
        let metadata_json = serde_json::to_string(&request.metadata)
            .map_err(|e| RepositoryError::storage("serialize metadata", e.to_string()))?;
        let created_at = encode_time(request.created_at);

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "insert")?;

            conn.execute(
                "INSERT INTO help_requests (customer_id, customer_name, question, status,
                                            priority, created_at, updated_at, tags, metadata)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5, ?6, ?7)",
                params![
                    request.customer_id,
                    request.customer_name,
                    request.question,
                    request.priority.as_str(),
                    created_at,
                    tags_json,
                    metadata_json
                ],
            )
            .map_err(|e| RepositoryError::storage("insert", e.to_string()))?;

            let id = RequestId(conn.last_insert_rowid());
            Ok(request.into_request(id))
        })
        .await
        .map_err(|e| RepositoryError::storage("insert", e.to_string()))?
    }

    async fn get(&self, id: RequestId) -> Result<Option<HelpRequest>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "get")?;

            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM help_requests WHERE id = ?1", REQUEST_COLUMNS),
                    params![id.0],
                    RawRequestRow::from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get", e.to_string()))?;

            raw.map(RawRequestRow::decode).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get", e.to_string()))?
    }

    async fn update(&self, request: &HelpRequest) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let id = request.id.0;
        let status = request.status.as_str();
        let updated_at = encode_time(request.updated_at);
        let resolved_at = request.resolved_at.map(encode_time);
        let assigned_to = request.assigned_to.as_ref().map(|s| s.0.clone());
        let resolution = request.resolution.clone();
        let metadata_json = serde_json::to_string(&request.metadata)
            .map_err(|e| RepositoryError::storage("serialize metadata", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "update")?;

            let changed = conn
                .execute(
                    "UPDATE help_requests
                     SET status = ?1, updated_at = ?2, resolved_at = ?3,
                         assigned_to = ?4, resolution = ?5, metadata = ?6
                     WHERE id = ?7",
                    params![
                        status,
                        updated_at,
                        resolved_at,
                        assigned_to,
                        resolution,
                        metadata_json,
                        id
                    ],
                )
                .map_err(|e| RepositoryError::storage("update", e.to_string()))?;

            Ok(changed > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("update", e.to_string()))?
    }

    async fn list(
        &self,
        filter: &RequestFilter,
        page: Page,
    ) -> Result<Vec<HelpRequest>, RepositoryError> {
        let conn = self.conn.clone();
        let (where_clause, mut values) = filter_clause(filter);
        values.push(Value::Integer(usize_to_i64(page.limit, "limit", "list")?));
        values.push(Value::Integer(usize_to_i64(page.offset, "offset", "list")?));

        let sql = format!(
            "SELECT {} FROM help_requests {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            REQUEST_COLUMNS, where_clause
        );

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "list")?;

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RepositoryError::storage("list", e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(values), RawRequestRow::from_row)
                .map_err(|e| RepositoryError::storage("list", e.to_string()))?;

            Ok(decode_rows(rows, "list"))
        })
        .await
        .map_err(|e| RepositoryError::storage("list", e.to_string()))?
    }

    async fn get_all(&self) -> Result<Vec<HelpRequest>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "get_all")?;

            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM help_requests", REQUEST_COLUMNS))
                .map_err(|e| RepositoryError::storage("get_all", e.to_string()))?;
            let rows = stmt
                .query_map([], RawRequestRow::from_row)
                .map_err(|e| RepositoryError::storage("get_all", e.to_string()))?;

            Ok(decode_rows(rows, "get_all"))
        })
        .await
        .map_err(|e| RepositoryError::storage("get_all", e.to_string()))?
    }
}
