//! Shared pipeline types.

use serde::{Deserialize, Serialize};

/// Kind of content-policy violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationType {
    OffTopic,
    Profanity,
    Rude,
    Offensive,
    Inappropriate,
}

impl ViolationType {
    /// Parse the classifier's label; `"none"` and unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace('_', "-").as_str() {
            "off-topic" | "offtopic" => Some(Self::OffTopic),
            "profanity" => Some(Self::Profanity),
            "rude" => Some(Self::Rude),
            "offensive" => Some(Self::Offensive),
            "inappropriate" => Some(Self::Inappropriate),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OffTopic => "off-topic",
            Self::Profanity => "profanity",
            Self::Rude => "rude",
            Self::Offensive => "offensive",
            Self::Inappropriate => "inappropriate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// The classifier's judgment about one message.
///
/// `should_respond` and the moderation fields are independent axes: a
/// message can need moderation without warranting a reply, and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub should_respond: bool,
    pub is_off_topic: bool,
    /// 1 (unrelated) ..= 10 (squarely on topic).
    pub topic_relevance: u8,
    pub needs_moderation: bool,
    pub violation_type: Option<ViolationType>,
    pub severity: Option<Severity>,
    /// Where the verdict came from, for logs and message metadata.
    pub source: VerdictSource,
}

impl ModerationVerdict {
    /// No reply and nothing to moderate.
    pub fn quiet(source: VerdictSource) -> Self {
        Self {
            should_respond: false,
            is_off_topic: false,
            topic_relevance: 5,
            needs_moderation: false,
            violation_type: None,
            severity: None,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Pre-LLM rule match.
    Rules,
    /// Generative classifier.
    Model,
    /// Name-mention fallback after a classifier failure.
    Heuristic,
}

/// A drafted reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub text: String,
    /// 0.0 ..= 10.0
    pub confidence: f32,
}

/// Messages to send after a violation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationPlan {
    /// Addressed to the sender, in their individual channel.
    pub private_warning: Option<String>,
    /// Non-attributed note to the group channel.
    pub group_reminder: Option<String>,
}
