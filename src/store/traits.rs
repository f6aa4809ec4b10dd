//! `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::chat::model::{ApprovalStatus, ChatScope, Message, NewMessage};
use crate::error::DatabaseError;
use crate::profile::ClientProfile;

/// Backend-agnostic database trait covering chat messages, cursors,
/// settings and client profiles.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create tables / apply pending migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Persist a message and return it with its assigned id and timestamp.
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, DatabaseError>;

    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError>;

    /// Up to `limit` messages in `scope` with id below `before_id`, oldest first.
    async fn recent_messages(
        &self,
        scope: &ChatScope,
        before_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Human-authored messages created in `[since, until)`, ordered by id.
    async fn human_messages_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Whether an automated message in `scope` was persisted after `after`.
    async fn has_automated_after(
        &self,
        scope: &ChatScope,
        after: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Count of automated messages in `scope`.
    async fn count_automated(&self, scope: &ChatScope) -> Result<usize, DatabaseError>;

    async fn update_approval_status(
        &self,
        id: i64,
        status: ApprovalStatus,
    ) -> Result<(), DatabaseError>;

    /// Shallow-merge `patch` into the message's metadata object.
    async fn merge_message_metadata(
        &self,
        id: i64,
        patch: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    // ── Cursors ─────────────────────────────────────────────────────

    async fn get_cursor(&self, scope_key: &str) -> Result<Option<i64>, DatabaseError>;

    /// Raise the stored cursor to `message_id` if it is currently lower (or
    /// absent). Returns whether this call moved it.
    async fn advance_cursor(&self, scope_key: &str, message_id: i64)
    -> Result<bool, DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError>;

    async fn set_setting(
        &self,
        user_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    // ── Client profiles ─────────────────────────────────────────────

    async fn get_client_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<ClientProfile>, DatabaseError>;

    async fn upsert_client_profile(&self, profile: &ClientProfile) -> Result<(), DatabaseError>;
}
