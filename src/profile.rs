//! Client profiles — display name, timezone, and the coaching context
//! handed to the drafter.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::policy::Verbosity;

/// Daily nutrition targets set by the coach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionTargets {
    pub calories: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
}

/// One logged day of intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEntry {
    pub date: String,
    pub calories: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSummary {
    pub name: String,
    pub completed_at: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeighIn {
    pub date: String,
    pub weight: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "lb".to_string()
}

/// Everything the drafter may reference about a client.
///
/// Missing pieces stay empty; prompts only mention what is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientContext {
    #[serde(default)]
    pub nutrition_targets: Option<NutritionTargets>,
    #[serde(default)]
    pub recent_intake: Vec<IntakeEntry>,
    #[serde(default)]
    pub latest_workout: Option<WorkoutSummary>,
    #[serde(default)]
    pub recent_weigh_ins: Vec<WeighIn>,
}

impl ClientContext {
    pub fn is_empty(&self) -> bool {
        self.nutrition_targets.is_none()
            && self.recent_intake.is_empty()
            && self.latest_workout.is_none()
            && self.recent_weigh_ins.is_empty()
    }
}

/// A stored client profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub user_id: String,
    pub display_name: String,
    /// IANA zone name, e.g. `"Europe/Berlin"`.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Per-client override of the policy's default verbosity.
    #[serde(default)]
    pub verbosity: Option<Verbosity>,
    #[serde(default)]
    pub context: ClientContext,
}

impl ClientProfile {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            timezone: None,
            verbosity: None,
            context: ClientContext::default(),
        }
    }

    /// Placeholder used when no profile row exists.
    pub fn anonymous(user_id: &str) -> Self {
        Self::new(user_id, user_id)
    }

    pub fn first_name(&self) -> &str {
        self.display_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.display_name)
    }

    /// Parsed timezone, if set and valid.
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.as_deref().and_then(|name| name.parse().ok())
    }
}
