//! Delayed-response engine: cursor, scheduler, ingress and sweep.

pub mod cursor;
pub mod ingress;
pub mod scheduler;
pub mod sweep;

pub use cursor::ProcessingCursor;
pub use ingress::{Claim, IngressCoordinator, IngressDeps, IngressOutcome, Trigger};
pub use scheduler::{OutboundMessage, ScheduleRequest, Scheduled, ScheduledResponse, Scheduler};
pub use sweep::{SweepStats, spawn_sweep, sweep_once};
