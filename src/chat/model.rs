//! Chat data model — scopes, persisted messages, delivery kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatScope {
    /// The shared group channel.
    Group,
    /// One coach↔client channel.
    Individual { user_id: String },
}

impl ChatScope {
    pub fn individual(user_id: impl Into<String>) -> Self {
        Self::Individual {
            user_id: user_id.into(),
        }
    }

    /// Stable key used for cursors and task bookkeeping.
    pub fn key(&self) -> String {
        match self {
            Self::Group => "group".to_string(),
            Self::Individual { user_id } => format!("individual:{user_id}"),
        }
    }

    /// `"group"` or `"individual"`, as stored in the `chat_type` column.
    pub fn chat_type(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Individual { .. } => "individual",
        }
    }

    pub fn target_user_id(&self) -> Option<&str> {
        match self {
            Self::Group => None,
            Self::Individual { user_id } => Some(user_id),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group)
    }

    /// Rebuild a scope from its stored columns.
    pub fn from_parts(chat_type: &str, target_user_id: Option<String>) -> Result<Self, String> {
        match (chat_type, target_user_id) {
            ("group", _) => Ok(Self::Group),
            ("individual", Some(user_id)) => Ok(Self::Individual { user_id }),
            ("individual", None) => Err("individual scope without target user".into()),
            (other, _) => Err(format!("Unknown chat type: {other}")),
        }
    }
}

impl std::fmt::Display for ChatScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Moderation/approval state of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown approval status: {s}")),
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic store-assigned id.
    pub id: i64,
    pub scope: ChatScope,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// True for anything produced by the automated persona.
    pub automated: bool,
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Message {
    /// Whether the sender allowed automated handling at ingress. Recorded in
    /// metadata so the sweep honours it too; absent means allowed.
    pub fn automation_allowed(&self) -> bool {
        self.metadata
            .get(AUTOMATION_ALLOWED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}

const AUTOMATION_ALLOWED_KEY: &str = "automation_allowed";

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub scope: ChatScope,
    pub sender_id: String,
    pub body: String,
    pub automated: bool,
    pub approval_status: ApprovalStatus,
    pub metadata: serde_json::Value,
}

impl NewMessage {
    /// A human-authored message, approved on arrival.
    pub fn inbound(scope: ChatScope, sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            scope,
            sender_id: sender_id.into(),
            body: body.into(),
            automated: false,
            approval_status: ApprovalStatus::Approved,
            metadata: serde_json::json!({}),
        }
    }

    /// Record the ingress automation flag.
    pub fn with_automation_allowed(mut self, allowed: bool) -> Self {
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(AUTOMATION_ALLOWED_KEY.into(), allowed.into());
        }
        self
    }
}

/// What an automated delivery is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// Ordinary coaching reply.
    Reply,
    /// Private note to a rule-breaking sender.
    PrivateWarning,
    /// Non-attributed reminder to the whole group.
    GroupReminder,
}

impl std::fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reply => write!(f, "reply"),
            Self::PrivateWarning => write!(f, "private_warning"),
            Self::GroupReminder => write!(f, "group_reminder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(metadata: serde_json::Value) -> Message {
        Message {
            id: 1,
            scope: ChatScope::Group,
            sender_id: "u1".into(),
            body: "hi".into(),
            created_at: Utc::now(),
            automated: false,
            approval_status: ApprovalStatus::Approved,
            metadata,
        }
    }

    #[test]
    fn automation_flag_defaults_to_allowed() {
        assert!(persisted(serde_json::json!({})).automation_allowed());
        assert!(persisted(serde_json::Value::Null).automation_allowed());

        let new = NewMessage::inbound(ChatScope::Group, "u1", "hi").with_automation_allowed(false);
        assert!(!persisted(new.metadata).automation_allowed());
    }

    #[test]
    fn scope_keys_are_distinct() {
        assert_eq!(ChatScope::Group.key(), "group");
        assert_eq!(ChatScope::individual("u1").key(), "individual:u1");
        assert_ne!(
            ChatScope::individual("u1").key(),
            ChatScope::individual("u2").key()
        );
    }

    #[test]
    fn scope_from_parts() {
        assert_eq!(
            ChatScope::from_parts("group", None).unwrap(),
            ChatScope::Group
        );
        assert_eq!(
            ChatScope::from_parts("individual", Some("u7".into())).unwrap(),
            ChatScope::individual("u7")
        );
        assert!(ChatScope::from_parts("individual", None).is_err());
        assert!(ChatScope::from_parts("broadcast", None).is_err());
    }

    #[test]
    fn scope_serde_shape() {
        let json = serde_json::to_value(ChatScope::individual("u1")).unwrap();
        assert_eq!(json["kind"], "individual");
        assert_eq!(json["user_id"], "u1");

        let group: ChatScope = serde_json::from_str(r#"{"kind":"group"}"#).unwrap();
        assert_eq!(group, ChatScope::Group);
    }

    #[test]
    fn approval_status_parses() {
        assert_eq!("rejected".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::Rejected);
        assert!("maybe".parse::<ApprovalStatus>().is_err());
    }
}
