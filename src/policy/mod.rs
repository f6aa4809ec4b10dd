//! Per-coach automation policy.

pub mod model;
pub mod store;

pub use model::{
    DelayConfig, ModerationSettings, Policy, QuietHours, ResponseFilter, ScopeSettings,
    TimingRules, Verbosity, WeekendBehavior,
};
pub use store::{POLICY_SETTINGS_KEY, PolicyStore, SettingsPolicyStore, StaticPolicyStore};
