//! Per-scope processing cursor.
//!
//! The cursor for a scope is the highest message id the automated pipeline
//! has claimed there. It only moves forward. Claims are serialized by an
//! in-process mutex and written through to the store with a conditional
//! upsert, so a second process sharing the database also loses the race.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chat::model::ChatScope;
use crate::store::Database;

pub struct ProcessingCursor {
    db: Arc<dyn Database>,
    /// Last known position per scope key.
    marks: Mutex<HashMap<String, i64>>,
}

impl ProcessingCursor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Current position for `scope` (0 if nothing was ever claimed).
    pub async fn position(&self, scope: &ChatScope) -> i64 {
        let key = scope.key();
        let mut marks = self.marks.lock().await;
        self.load(&mut marks, &key).await
    }

    /// Claim `message_id` in `scope`.
    ///
    /// Returns `true` only for the caller that moved the cursor from below
    /// `message_id` to `message_id`. Everyone else must skip the message.
    pub async fn try_advance(&self, scope: &ChatScope, message_id: i64) -> bool {
        let key = scope.key();
        let mut marks = self.marks.lock().await;

        let current = self.load(&mut marks, &key).await;
        if current >= message_id {
            debug!(scope = %key, message_id, cursor = current, "Cursor already past message");
            return false;
        }

        match self.db.advance_cursor(&key, message_id).await {
            Ok(true) => {
                marks.insert(key, message_id);
                true
            }
            Ok(false) => {
                // Another process got there first; resync.
                let stored = self.db.get_cursor(&key).await.ok().flatten().unwrap_or(current);
                marks.insert(key.clone(), stored.max(current));
                debug!(scope = %key, message_id, cursor = stored, "Lost cursor race");
                false
            }
            Err(e) => {
                warn!(scope = %key, message_id, error = %e, "Cursor write failed, keeping in-memory claim");
                marks.insert(key, message_id);
                true
            }
        }
    }

    async fn load(&self, marks: &mut HashMap<String, i64>, key: &str) -> i64 {
        if let Some(&mark) = marks.get(key) {
            return mark;
        }
        let stored = match self.db.get_cursor(key).await {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                warn!(scope = %key, error = %e, "Cursor read failed, assuming start");
                0
            }
        };
        marks.insert(key.to_string(), stored);
        stored
    }
}
