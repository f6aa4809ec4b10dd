//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::chat::model::{ApprovalStatus, ChatScope, Message, NewMessage};
use crate::error::DatabaseError;
use crate::policy::Verbosity;
use crate::profile::{ClientContext, ClientProfile};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width, so string order is time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn verbosity_to_str(v: Verbosity) -> &'static str {
    match v {
        Verbosity::Brief => "brief",
        Verbosity::Medium => "medium",
        Verbosity::Verbose => "verbose",
    }
}

fn str_to_verbosity(s: &str) -> Option<Verbosity> {
    match s {
        "brief" => Some(Verbosity::Brief),
        "medium" => Some(Verbosity::Medium),
        "verbose" => Some(Verbosity::Verbose),
        _ => None,
    }
}

const MESSAGE_COLUMNS: &str =
    "id, chat_type, target_user_id, sender_id, body, automated, approval_status, metadata, created_at";

/// Map a libsql Row to a Message.
///
/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("message row parse: {e}"));

    let id: i64 = row.get(0).map_err(parse)?;
    let chat_type: String = row.get(1).map_err(parse)?;
    let target_user_id: Option<String> = row.get(2).ok();
    let sender_id: String = row.get(3).map_err(parse)?;
    let body: String = row.get(4).map_err(parse)?;
    let automated = row.get::<i64>(5).unwrap_or(0) != 0;
    let status_str: String = row.get(6).map_err(parse)?;
    let metadata_str: String = row.get::<String>(7).unwrap_or_else(|_| "{}".into());
    let created_str: String = row.get(8).map_err(parse)?;

    let scope = ChatScope::from_parts(&chat_type, target_user_id)
        .map_err(|e| DatabaseError::Serialization(format!("message {id}: {e}")))?;
    let approval_status = status_str
        .parse::<ApprovalStatus>()
        .map_err(|e| DatabaseError::Serialization(format!("message {id}: {e}")))?;
    let metadata = serde_json::from_str(&metadata_str).unwrap_or_else(|_| serde_json::json!({}));

    Ok(Message {
        id,
        scope,
        sender_id,
        body,
        created_at: parse_datetime(&created_str),
        automated,
        approval_status,
        metadata,
    })
}

async fn collect_messages(mut rows: libsql::Rows, op: &str) -> Result<Vec<Message>, DatabaseError> {
    let mut out = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => out.push(row_to_message(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
    Ok(out)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, DatabaseError> {
        let conn = self.conn();
        let created_at = Utc::now();
        let metadata = serde_json::to_string(&message.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let mut rows = conn
            .query(
                "INSERT INTO chat_messages (scope_key, chat_type, target_user_id, sender_id, body,
                    automated, approval_status, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 RETURNING id",
                params![
                    message.scope.key(),
                    message.scope.chat_type(),
                    opt_text(message.scope.target_user_id()),
                    message.sender_id.as_str(),
                    message.body.as_str(),
                    message.automated as i64,
                    message.approval_status.to_string(),
                    metadata,
                    format_datetime(created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        let id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("insert_message id: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "insert_message: no id returned".into(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("insert_message: {e}"))),
        };

        debug!(message_id = id, scope = %message.scope, automated = message.automated, "Message inserted into DB");

        Ok(Message {
            id,
            scope: message.scope.clone(),
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            // Round-trip through the stored precision so reads compare equal.
            created_at: parse_datetime(&format_datetime(created_at)),
            automated: message.automated,
            approval_status: message.approval_status,
            metadata: message.metadata.clone(),
        })
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn recent_messages(
        &self,
        scope: &ChatScope,
        before_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        let conn = self.conn();
        let rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                     WHERE scope_key = ?1 AND id < ?2
                     ORDER BY id DESC LIMIT ?3"
                ),
                params![scope.key(), before_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;

        let mut messages = collect_messages(rows, "recent_messages").await?;
        messages.reverse();
        Ok(messages)
    }

    async fn human_messages_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Message>, DatabaseError> {
        let conn = self.conn();
        let rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                     WHERE automated = 0 AND created_at >= ?1 AND created_at < ?2
                     ORDER BY id ASC"
                ),
                params![format_datetime(since), format_datetime(until)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("human_messages_between: {e}")))?;

        collect_messages(rows, "human_messages_between").await
    }

    async fn has_automated_after(
        &self,
        scope: &ChatScope,
        after: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM chat_messages
                 WHERE scope_key = ?1 AND automated = 1 AND created_at > ?2",
                params![scope.key(), format_datetime(after)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_automated_after: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("has_automated_after: {e}"))),
        }
    }

    async fn count_automated(&self, scope: &ChatScope) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM chat_messages WHERE scope_key = ?1 AND automated = 1",
                params![scope.key()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_automated: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_automated: {e}"))),
        }
    }

    async fn update_approval_status(
        &self,
        id: i64,
        status: ApprovalStatus,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE chat_messages SET approval_status = ?1 WHERE id = ?2",
                params![status.to_string(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_approval_status: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "chat_message".into(),
                id: id.to_string(),
            });
        }
        debug!(message_id = id, status = %status, "Approval status updated in DB");
        Ok(())
    }

    async fn merge_message_metadata(
        &self,
        id: i64,
        patch: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let patch_str =
            serde_json::to_string(patch).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let count = self
            .conn()
            .execute(
                "UPDATE chat_messages SET metadata = json_patch(metadata, ?1) WHERE id = ?2",
                params![patch_str, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_message_metadata: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "chat_message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Cursors ─────────────────────────────────────────────────────

    async fn get_cursor(&self, scope_key: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT last_message_id FROM cursors WHERE scope_key = ?1",
                params![scope_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_cursor: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_cursor: {e}"))),
        }
    }

    async fn advance_cursor(
        &self,
        scope_key: &str,
        message_id: i64,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "INSERT INTO cursors (scope_key, last_message_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (scope_key) DO UPDATE
                 SET last_message_id = excluded.last_message_id, updated_at = excluded.updated_at
                 WHERE excluded.last_message_id > cursors.last_message_id",
                params![scope_key, message_id, format_datetime(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_cursor: {e}")))?;

        Ok(count > 0)
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT value FROM settings WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value_str: String = row.get(0).unwrap_or_else(|_| "null".to_string());
                let value: serde_json::Value = serde_json::from_str(&value_str)
                    .map_err(|e| DatabaseError::Serialization(format!("setting {key}: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(
        &self,
        user_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = format_datetime(Utc::now());
        let value_str = serde_json::to_string(value)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO settings (user_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, key) DO UPDATE SET value = ?3, updated_at = ?4",
            params![user_id, key, value_str, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;

        debug!(user_id, key, "Setting saved");
        Ok(())
    }

    // ── Client profiles ─────────────────────────────────────────────

    async fn get_client_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<ClientProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, display_name, timezone, verbosity, context
                 FROM client_profiles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_client_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let parse =
                    |e: libsql::Error| DatabaseError::Query(format!("client profile parse: {e}"));
                let user_id: String = row.get(0).map_err(parse)?;
                let display_name: String = row.get(1).map_err(parse)?;
                let timezone: Option<String> = row.get(2).ok();
                let verbosity: Option<String> = row.get(3).ok();
                let context_str: String = row.get::<String>(4).unwrap_or_else(|_| "{}".into());
                let context: ClientContext = serde_json::from_str(&context_str)
                    .map_err(|e| DatabaseError::Serialization(format!("client context: {e}")))?;

                Ok(Some(ClientProfile {
                    user_id,
                    display_name,
                    timezone,
                    verbosity: verbosity.as_deref().and_then(str_to_verbosity),
                    context,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_client_profile: {e}"))),
        }
    }

    async fn upsert_client_profile(&self, profile: &ClientProfile) -> Result<(), DatabaseError> {
        let context = serde_json::to_string(&profile.context)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO client_profiles (user_id, display_name, timezone, verbosity, context, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id) DO UPDATE SET display_name = ?2, timezone = ?3,
                    verbosity = ?4, context = ?5, updated_at = ?6",
                params![
                    profile.user_id.as_str(),
                    profile.display_name.as_str(),
                    opt_text(profile.timezone.as_deref()),
                    opt_text(profile.verbosity.map(verbosity_to_str)),
                    context,
                    format_datetime(Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_client_profile: {e}")))?;

        debug!(user_id = %profile.user_id, "Client profile saved");
        Ok(())
    }
}
