//! Background sweep — picks up human messages the synchronous path missed.
//!
//! Every tick it scans human messages created within the lookback window
//! (but older than the settle grace, so in-flight requests finish first)
//! and hands any unclaimed ones to the same claim-and-schedule path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::ingress::{Claim, IngressCoordinator, Trigger};

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub claimed: usize,
    /// Already answered by an automated message.
    pub answered: usize,
}

/// Spawn the periodic sweep.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop sweeping.
pub fn spawn_sweep(
    coordinator: Arc<IngressCoordinator>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Sweep started (interval: {}s)", interval.as_secs());

        // `interval` panics on a zero period.
        let mut tick = tokio::time::interval(interval.max(Duration::from_millis(1)));
        // First tick fires immediately; let startup settle.
        tick.tick().await;

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Sweep shutting down");
                return;
            }

            let stats = sweep_once(&coordinator).await;
            if stats.claimed > 0 {
                info!(
                    examined = stats.examined,
                    claimed = stats.claimed,
                    "Sweep picked up missed messages"
                );
            }
        }
    });

    (handle, shutdown_flag)
}

/// Run a single sweep pass.
pub async fn sweep_once(coordinator: &IngressCoordinator) -> SweepStats {
    let config = coordinator.config();
    let now = Utc::now();
    let to_chrono = |d: Duration| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero());
    let since = now - to_chrono(config.sweep_lookback);
    let until = now - to_chrono(config.sweep_grace);

    let messages = match coordinator.db().human_messages_between(since, until).await {
        Ok(messages) => messages,
        Err(e) => {
            error!("Sweep query failed: {e}");
            return SweepStats::default();
        }
    };

    let mut stats = SweepStats::default();
    for message in &messages {
        // Coach messages are handled on the synchronous path only.
        if message.sender_id == config.coach_id {
            continue;
        }
        stats.examined += 1;

        if coordinator.cursor().position(&message.scope).await >= message.id {
            continue;
        }

        match coordinator
            .db()
            .has_automated_after(&message.scope, message.created_at)
            .await
        {
            Ok(true) => {
                debug!(message_id = message.id, "Already answered, marking handled");
                coordinator
                    .cursor()
                    .try_advance(&message.scope, message.id)
                    .await;
                stats.answered += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                debug!(message_id = message.id, error = %e, "Answered check failed, continuing");
            }
        }

        if let Claim::Claimed { .. } = coordinator
            .claim_and_schedule(message, Trigger::Sweep, message.automation_allowed())
            .await
        {
            stats.claimed += 1;
        }
    }

    stats
}
