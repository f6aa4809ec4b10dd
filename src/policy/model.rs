//! Typed per-coach policy.
//!
//! Stored as camelCase JSON in the settings table. Any field the stored
//! document omits resolves to the default below, and out-of-range values
//! are pulled back into range by [`Policy::sanitized`].

use serde::{Deserialize, Serialize};

use crate::chat::model::ChatScope;

/// Fallback delay range for group replies, in seconds.
pub const DEFAULT_GROUP_DELAY_SECS: (f64, f64) = (15.0, 30.0);

/// Fallback delay range for individual replies, in seconds.
pub const DEFAULT_INDIVIDUAL_DELAY_SECS: (f64, f64) = (30.0, 120.0);

pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 7;

pub const DEFAULT_URGENT_KEYWORDS: [&str; 4] = ["emergency", "urgent", "help", "crisis"];

/// How much the drafter should say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Brief,
    #[default]
    Medium,
    Verbose,
}

impl Verbosity {
    /// Prompt instruction for this level.
    pub fn guidance(self) -> &'static str {
        match self {
            Self::Brief => "Keep it to one or two short sentences.",
            Self::Medium => "Keep it conversational, at most a short paragraph.",
            Self::Verbose => {
                "Be thorough: explain your reasoning and give concrete next steps, \
                 using short paragraphs."
            }
        }
    }
}

/// What happens on Saturdays and Sundays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekendBehavior {
    #[default]
    Normal,
    /// Classifier is told to hold back to direct questions only.
    Reduced,
    /// Weekend delays are stretched by the weekend multiplier.
    ExtendedDelay,
    /// Group replies happen on weekends only.
    WeekendOnly,
}

/// Automated reply delay for one scope.
///
/// Bounds are optional so that a partially configured document still
/// falls back to the scope's default range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelayConfig {
    pub enabled: bool,
    pub min_seconds: Option<f64>,
    pub max_seconds: Option<f64>,
    /// Draw uniformly from the range instead of using the midpoint.
    pub human_like: bool,
    pub quiet_hours_multiplier: Option<f64>,
    pub weekend_multiplier: Option<f64>,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_seconds: None,
            max_seconds: None,
            human_like: true,
            quiet_hours_multiplier: None,
            weekend_multiplier: None,
        }
    }
}

impl DelayConfig {
    /// Usable `(min_ms, max_ms)`, substituting `fallback_secs` for a missing
    /// or malformed range.
    pub fn range_ms(&self, fallback_secs: (f64, f64)) -> (u64, u64) {
        let (fallback_min, fallback_max) = fallback_secs;
        let min = self.min_seconds.unwrap_or(fallback_min);
        let max = self.max_seconds.unwrap_or(fallback_max);

        let valid = min.is_finite() && max.is_finite() && min >= 0.0 && max > 0.0 && min <= max;
        let (min, max) = if valid {
            (min, max)
        } else {
            (fallback_min, fallback_max)
        };
        ((min * 1000.0).round() as u64, (max * 1000.0).round() as u64)
    }

    pub fn quiet_multiplier(&self) -> f64 {
        usable_multiplier(self.quiet_hours_multiplier)
    }

    pub fn weekend_multiplier(&self) -> f64 {
        usable_multiplier(self.weekend_multiplier)
    }
}

fn usable_multiplier(value: Option<f64>) -> f64 {
    match value {
        Some(m) if m.is_finite() && m > 0.0 => m,
        _ => 1.0,
    }
}

/// Quiet-hours window as `HH:MM` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            start: "22:00".to_string(),
            end: "06:00".to_string(),
        }
    }
}

impl QuietHours {
    /// Window as minutes since midnight, or `None` if either end is unparseable.
    pub fn minutes(&self) -> Option<(u32, u32)> {
        Some((parse_hhmm(&self.start)?, parse_hhmm(&self.end)?))
    }
}

/// Parse `HH:MM` into minutes since midnight.
pub fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingRules {
    pub quiet_hours: QuietHours,
    pub weekend_behavior: WeekendBehavior,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationSettings {
    pub enabled: bool,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Deterministic post-processing of drafted replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseFilter {
    pub enabled: bool,
    pub excluded_words: Vec<String>,
    pub excluded_characters: Vec<String>,
    /// Hard cap in characters.
    pub max_length: Option<usize>,
}

impl Default for ResponseFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_words: Vec::new(),
            excluded_characters: Vec::new(),
            max_length: Some(300),
        }
    }
}

/// Settings for one scope's automated replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeSettings {
    pub enabled: bool,
    pub delay: DelayConfig,
    /// Replaces the policy-wide filter for this scope when set.
    #[serde(alias = "responseFiltering", skip_serializing_if = "Option::is_none")]
    pub response_filter: Option<ResponseFilter>,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: DelayConfig::default(),
            response_filter: None,
        }
    }
}

/// The full per-coach policy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    /// Name the persona answers to, e.g. `"Coach Dana"`.
    pub coach_name: String,
    /// Role words that count as addressing the persona.
    pub coach_aliases: Vec<String>,
    pub group: ScopeSettings,
    pub individual: ScopeSettings,
    /// 1 (rarely chimes in) .. 10 (chimes in often).
    pub response_frequency: u8,
    /// 1 (anything goes) .. 10 (fitness topics only).
    pub fitness_strictness: u8,
    /// Minimum drafter confidence (1..10) for a reply to be delivered.
    pub confidence_threshold: u8,
    pub urgent_keywords: Vec<String>,
    pub verbosity: Verbosity,
    pub timing: TimingRules,
    pub moderation: ModerationSettings,
    pub response_filter: ResponseFilter,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            coach_name: "Coach".to_string(),
            coach_aliases: vec!["coach".to_string()],
            group: ScopeSettings::default(),
            individual: ScopeSettings::default(),
            response_frequency: 5,
            fitness_strictness: 5,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            urgent_keywords: DEFAULT_URGENT_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            verbosity: Verbosity::Medium,
            timing: TimingRules::default(),
            moderation: ModerationSettings::default(),
            response_filter: ResponseFilter::default(),
        }
    }
}

impl Policy {
    /// Clamp dials into range and drop empty keywords.
    pub fn sanitized(mut self) -> Self {
        self.response_frequency = self.response_frequency.clamp(1, 10);
        self.fitness_strictness = self.fitness_strictness.clamp(1, 10);
        self.confidence_threshold = self.confidence_threshold.clamp(1, 10);
        self.urgent_keywords = self
            .urgent_keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if self.coach_name.trim().is_empty() {
            self.coach_name = Self::default().coach_name;
        }
        if self.timing.quiet_hours.minutes().is_none() {
            self.timing.quiet_hours = QuietHours::default();
        }
        self
    }

    pub fn scope_settings(&self, scope: &ChatScope) -> &ScopeSettings {
        match scope {
            ChatScope::Group => &self.group,
            ChatScope::Individual { .. } => &self.individual,
        }
    }

    /// Filter applied to replies in `scope`.
    pub fn response_filter_for(&self, scope: &ChatScope) -> &ResponseFilter {
        self.scope_settings(scope)
            .response_filter
            .as_ref()
            .unwrap_or(&self.response_filter)
    }

    /// Fallback delay range for a scope.
    pub fn default_delay_secs(scope: &ChatScope) -> (f64, f64) {
        match scope {
            ChatScope::Group => DEFAULT_GROUP_DELAY_SECS,
            ChatScope::Individual { .. } => DEFAULT_INDIVIDUAL_DELAY_SECS,
        }
    }

    /// First urgent keyword found in `body` (case-insensitive substring).
    pub fn urgent_keyword_in(&self, body: &str) -> Option<&str> {
        let lowered = body.to_lowercase();
        self.urgent_keywords
            .iter()
            .find(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
            .map(String::as_str)
    }

    /// Whether `body` addresses the persona by name or role.
    pub fn mentions_coach(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        let name = self.coach_name.to_lowercase();
        let mut names: Vec<&str> = vec![name.as_str()];
        // "Coach Dana" is also reachable as "Dana".
        names.extend(name.split_whitespace());
        names
            .iter()
            .copied()
            .chain(self.coach_aliases.iter().map(String::as_str))
            .filter(|n| n.len() >= 2)
            .any(|n| contains_word(&lowered, &n.to_lowercase()))
    }
}

/// Whole-word containment over lowercase text.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
