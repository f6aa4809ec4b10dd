//! Per-message decision pipeline.
//!
//! Every inbound message that reaches automation flows through:
//! 1. `RulesEngine::evaluate()` — fast pattern matching (no LLM)
//! 2. `Classifier::classify()` — respond / moderate verdict
//! 3. `Remediator::plan()` — warning and reminder text, on a violation
//! 4. `DelayCalculator::compute()` — human-paced delay
//! 5. `ResponseDrafter::draft()` + `ContentFilter::apply()` — at fire time
//!
//! Each stage degrades to a fallback instead of failing; the ingress
//! coordinator in `crate::engine` wires them together.

pub mod classifier;
pub mod delay;
pub mod drafter;
pub mod filter;
pub mod remediation;
pub mod rules;
pub mod types;

pub use classifier::{ClassifyRequest, Classifier};
pub use delay::{DelayCalculator, DelayDecision};
pub use drafter::{DraftRequest, ResponseDrafter};
pub use filter::ContentFilter;
pub use remediation::{RemediationRequest, Remediator};
pub use rules::RulesEngine;
pub use types::{Draft, ModerationVerdict, RemediationPlan, Severity, VerdictSource, ViolationType};
