//! Human-paced delay computation.
//!
//! Pure function of policy, wall-clock time, the subject's timezone and a
//! random source. Group replies use a flat range; individual replies are
//! stretched during the client's quiet hours and (optionally) weekends.
//! An urgent keyword collapses everything to zero.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use rand::Rng;

use crate::chat::model::ChatScope;
use crate::policy::{Policy, QuietHours, WeekendBehavior};

/// Outcome of a delay computation, with the reasons that shaped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayDecision {
    pub delay: Duration,
    pub urgent: bool,
    pub quiet_hours: bool,
    pub weekend: bool,
}

impl DelayDecision {
    fn immediate(urgent: bool) -> Self {
        Self {
            delay: Duration::ZERO,
            urgent,
            quiet_hours: false,
            weekend: false,
        }
    }
}

/// Computes reply delays.
#[derive(Debug, Clone)]
pub struct DelayCalculator {
    fallback_tz: Tz,
}

impl DelayCalculator {
    pub fn new(fallback_tz: Tz) -> Self {
        Self { fallback_tz }
    }

    /// Delay for a reply to `body` in `scope`, using the thread RNG.
    pub fn compute(
        &self,
        policy: &Policy,
        scope: &ChatScope,
        body: &str,
        now: DateTime<Utc>,
        user_tz: Option<Tz>,
    ) -> DelayDecision {
        self.compute_with_rng(policy, scope, body, now, user_tz, &mut rand::thread_rng())
    }

    /// Whether `now` falls on a weekend in the subject's timezone.
    pub fn is_local_weekend(&self, now: DateTime<Utc>, user_tz: Option<Tz>) -> bool {
        is_weekend(now.with_timezone(&user_tz.unwrap_or(self.fallback_tz)).weekday())
    }

    pub fn compute_with_rng<R: Rng>(
        &self,
        policy: &Policy,
        scope: &ChatScope,
        body: &str,
        now: DateTime<Utc>,
        user_tz: Option<Tz>,
        rng: &mut R,
    ) -> DelayDecision {
        if policy.urgent_keyword_in(body).is_some() {
            return DelayDecision::immediate(true);
        }

        let config = &policy.scope_settings(scope).delay;
        if !config.enabled {
            return DelayDecision::immediate(false);
        }

        let (min_ms, max_ms) = config.range_ms(Policy::default_delay_secs(scope));
        let base = if config.human_like {
            rng.gen_range(min_ms..=max_ms)
        } else {
            min_ms + (max_ms - min_ms) / 2
        };

        if scope.is_group() {
            return DelayDecision {
                delay: Duration::from_millis(base),
                urgent: false,
                quiet_hours: false,
                weekend: false,
            };
        }

        let local = now.with_timezone(&user_tz.unwrap_or(self.fallback_tz));
        let minute_of_day = local.hour() * 60 + local.minute();
        let quiet = in_quiet_hours(&policy.timing.quiet_hours, minute_of_day);
        let weekend = is_weekend(local.weekday());

        let mut factor = 1.0;
        if quiet {
            factor *= config.quiet_multiplier();
        }
        if weekend && policy.timing.weekend_behavior == WeekendBehavior::ExtendedDelay {
            factor *= config.weekend_multiplier();
        }

        DelayDecision {
            delay: Duration::from_millis((base as f64 * factor).round() as u64),
            urgent: false,
            quiet_hours: quiet,
            weekend,
        }
    }
}

/// Whether `minute_of_day` falls inside the quiet window.
///
/// Start is inclusive, end exclusive. A window whose start is after its end
/// wraps past midnight; equal ends mean no quiet window.
pub fn in_quiet_hours(quiet: &QuietHours, minute_of_day: u32) -> bool {
    let Some((start, end)) = quiet.minutes() else {
        return false;
    };
    if start == end {
        false
    } else if start < end {
        minute_of_day >= start && minute_of_day < end
    } else {
        minute_of_day >= start || minute_of_day < end
    }
}

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}
