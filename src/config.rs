//! Configuration types.
//!
//! Everything here is process-level plumbing read from the environment.
//! Coaching behaviour (delays, thresholds, moderation) lives in the
//! per-coach [`Policy`](crate::policy::Policy) stored in the database.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::ConfigError;

/// Default interval between background sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default lookback window for the sweep.
const DEFAULT_SWEEP_LOOKBACK_SECS: u64 = 60 * 60;

/// Messages younger than this are left to the synchronous path.
const DEFAULT_SWEEP_GRACE_SECS: u64 = 30;

/// Fallback zone when a client has no (or an unparseable) timezone.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Coach whose policy governs the automated persona.
    pub coach_id: String,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Port for the HTTP / WebSocket server.
    pub port: u16,
    pub sweep_interval: Duration,
    pub sweep_lookback: Duration,
    pub sweep_grace: Duration,
    /// Upper bound on a single classification call.
    pub classify_timeout: Duration,
    /// Upper bound on a single drafting call.
    pub draft_timeout: Duration,
    /// Number of prior messages handed to the classifier.
    pub history_window: usize,
    pub fallback_timezone: Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coach_id: "coach".to_string(),
            db_path: PathBuf::from("./data/coach-relay.db"),
            port: 8080,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sweep_lookback: Duration::from_secs(DEFAULT_SWEEP_LOOKBACK_SECS),
            sweep_grace: Duration::from_secs(DEFAULT_SWEEP_GRACE_SECS),
            classify_timeout: Duration::from_secs(15),
            draft_timeout: Duration::from_secs(30),
            history_window: 10,
            fallback_timezone: DEFAULT_TIMEZONE,
        }
    }
}

impl EngineConfig {
    /// Load from `COACH_RELAY_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let fallback_timezone = match std::env::var("COACH_RELAY_TIMEZONE") {
            Ok(name) => name.parse::<Tz>().map_err(|e| ConfigError::InvalidValue {
                key: "COACH_RELAY_TIMEZONE".into(),
                message: e.to_string(),
            })?,
            Err(_) => defaults.fallback_timezone,
        };

        Ok(Self {
            coach_id: std::env::var("COACH_RELAY_COACH_ID").unwrap_or(defaults.coach_id),
            db_path: std::env::var("COACH_RELAY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            port: env_parse("COACH_RELAY_PORT", defaults.port)?,
            sweep_interval: env_nonzero_secs(
                "COACH_RELAY_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval,
            )?,
            sweep_lookback: env_secs("COACH_RELAY_SWEEP_LOOKBACK_SECS", defaults.sweep_lookback)?,
            sweep_grace: env_secs("COACH_RELAY_SWEEP_GRACE_SECS", defaults.sweep_grace)?,
            classify_timeout: env_secs(
                "COACH_RELAY_CLASSIFY_TIMEOUT_SECS",
                defaults.classify_timeout,
            )?,
            draft_timeout: env_secs("COACH_RELAY_DRAFT_TIMEOUT_SECS", defaults.draft_timeout)?,
            history_window: env_parse("COACH_RELAY_HISTORY_WINDOW", defaults.history_window)?,
            fallback_timezone,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

/// Like [`env_secs`], but zero is rejected. Used for timer periods.
fn env_nonzero_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let value = env_secs(key, default)?;
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(value)
}
