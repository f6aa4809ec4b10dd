//! Ingress coordinator — the single entry point for inbound chat messages.
//!
//! Both the synchronous request path and the background sweep funnel into
//! [`IngressCoordinator::claim_and_schedule`], which claims the message on
//! the processing cursor before doing anything slow. Whoever loses the
//! claim does nothing, so each message gets at most one automated reply.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::chat::fanout::Publisher;
use crate::chat::model::{ChatScope, DeliveryKind, Message, NewMessage};
use crate::config::EngineConfig;
use crate::engine::cursor::ProcessingCursor;
use crate::engine::scheduler::{OutboundMessage, ScheduleRequest, Scheduled, Scheduler};
use crate::error::Error;
use crate::llm::LlmProvider;
use crate::pipeline::{
    Classifier, ClassifyRequest, ContentFilter, DelayCalculator, DraftRequest, ModerationVerdict,
    RemediationRequest, Remediator, ResponseDrafter, RulesEngine,
};
use crate::policy::{Policy, PolicyStore, WeekendBehavior};
use crate::profile::ClientProfile;
use crate::store::Database;

/// Which path observed the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Sync,
    Sweep,
}

impl Trigger {
    pub fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Sweep => "sweep",
        }
    }
}

/// Result of [`IngressCoordinator::submit_message`].
#[derive(Debug, Clone)]
pub struct IngressOutcome {
    pub message: Message,
    /// Set when the reply was scheduled with zero delay and already delivered.
    pub immediate_reply: Option<Message>,
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum Claim {
    /// Another path already handled the message.
    Skipped,
    Claimed {
        /// The scheduled reply, if one was armed.
        reply: Option<Scheduled>,
    },
}

/// Collaborators the coordinator is built from.
pub struct IngressDeps {
    pub db: Arc<dyn Database>,
    pub policies: Arc<dyn PolicyStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub publisher: Arc<dyn Publisher>,
    pub config: EngineConfig,
}

pub struct IngressCoordinator {
    db: Arc<dyn Database>,
    policies: Arc<dyn PolicyStore>,
    classifier: Classifier,
    drafter: Arc<ResponseDrafter>,
    remediator: Remediator,
    delays: DelayCalculator,
    cursor: ProcessingCursor,
    scheduler: Scheduler,
    config: EngineConfig,
}

impl IngressCoordinator {
    pub fn new(deps: IngressDeps) -> Self {
        let IngressDeps {
            db,
            policies,
            llm,
            publisher,
            config,
        } = deps;

        Self {
            classifier: Classifier::new(
                llm.clone(),
                RulesEngine::default_rules(),
                config.classify_timeout,
            ),
            drafter: Arc::new(ResponseDrafter::new(llm.clone(), config.draft_timeout)),
            remediator: Remediator::new(llm, config.classify_timeout),
            delays: DelayCalculator::new(config.fallback_timezone),
            cursor: ProcessingCursor::new(db.clone()),
            scheduler: Scheduler::new(db.clone(), publisher, config.coach_id.clone()),
            db,
            policies,
            config,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cursor(&self) -> &ProcessingCursor {
        &self.cursor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Persist an inbound message and run it through automation.
    ///
    /// Only a failure to persist the message itself is returned; everything
    /// after that degrades and logs.
    pub async fn submit_message(
        &self,
        scope: ChatScope,
        sender_id: &str,
        body: &str,
        automation_allowed: bool,
    ) -> Result<IngressOutcome, Error> {
        let message = self
            .db
            .insert_message(
                &NewMessage::inbound(scope, sender_id, body)
                    .with_automation_allowed(automation_allowed),
            )
            .await?;
        debug!(message_id = message.id, scope = %message.scope, "Inbound message persisted");

        let immediate_reply = self.handle_persisted(&message, automation_allowed).await;
        Ok(IngressOutcome {
            message,
            immediate_reply,
        })
    }

    /// Run automation for a message the caller already persisted.
    ///
    /// Returns the automated reply when it was delivered without delay.
    pub async fn handle_persisted(
        &self,
        message: &Message,
        automation_allowed: bool,
    ) -> Option<Message> {
        if message.automated {
            return None;
        }
        match self
            .claim_and_schedule(message, Trigger::Sync, automation_allowed)
            .await
        {
            Claim::Claimed {
                reply: Some(scheduled),
            } if scheduled.delay.is_zero() => scheduled.outcome.await.ok().flatten(),
            _ => None,
        }
    }

    /// Claim `message` on the cursor and, if this path won, classify it and
    /// schedule remediation and reply.
    pub async fn claim_and_schedule(
        &self,
        message: &Message,
        trigger: Trigger,
        automation_allowed: bool,
    ) -> Claim {
        if !self.cursor.try_advance(&message.scope, message.id).await {
            debug!(
                message_id = message.id,
                trigger = trigger.label(),
                "Message already claimed, skipping"
            );
            return Claim::Skipped;
        }

        if message.sender_id == self.config.coach_id {
            let cancelled = self
                .scheduler
                .cancel_scope(&message.scope, Some(DeliveryKind::Reply))
                .await;
            if cancelled > 0 {
                info!(
                    message_id = message.id,
                    scope = %message.scope,
                    cancelled,
                    "Coach replied in person, pending automated replies cancelled"
                );
            }
            return Claim::Claimed { reply: None };
        }

        if !automation_allowed {
            debug!(message_id = message.id, "Automation not allowed for message");
            return Claim::Claimed { reply: None };
        }

        let policy = self.policies.get_policy(&self.config.coach_id).await;
        let profile = self.load_profile(&message.sender_id).await;
        let history = match self
            .db
            .recent_messages(&message.scope, message.id, self.config.history_window)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "History unavailable");
                Vec::new()
            }
        };

        let now = Utc::now();
        let user_tz = profile.tz();
        let weekend = self.delays.is_local_weekend(now, user_tz);

        let verdict = self
            .classifier
            .classify(ClassifyRequest {
                message,
                history: &history,
                policy: &policy,
                sender_name: &profile.display_name,
                weekend,
            })
            .await;
        self.record_verdict(message, &verdict, trigger).await;

        if verdict.needs_moderation && policy.moderation.enabled {
            self.schedule_remediation(message, &verdict, &profile, &policy)
                .await;
        }

        if !reply_allowed(&policy, &message.scope, &verdict, weekend) {
            debug!(
                message_id = message.id,
                should_respond = verdict.should_respond,
                "No automated reply"
            );
            return Claim::Claimed { reply: None };
        }

        let decision = self
            .delays
            .compute(&policy, &message.scope, &message.body, now, user_tz);
        let verbosity = profile.verbosity.unwrap_or(policy.verbosity);

        let drafter = self.drafter.clone();
        let policies = self.policies.clone();
        let coach_id = self.config.coach_id.clone();
        let inbound = message.clone();

        let scheduled = self
            .scheduler
            .schedule(
                ScheduleRequest {
                    message_id: message.id,
                    scope: message.scope.clone(),
                    kind: DeliveryKind::Reply,
                    delay: decision.delay,
                },
                move || async move {
                    // Policy may have changed while the timer ran.
                    let policy = policies.get_policy(&coach_id).await;
                    let draft = drafter
                        .draft(DraftRequest {
                            message: &inbound,
                            history: &history,
                            profile: &profile,
                            policy: &policy,
                            verbosity,
                        })
                        .await?;

                    let threshold = f32::from(policy.confidence_threshold);
                    if draft.confidence < threshold {
                        info!(
                            message_id = inbound.id,
                            confidence = draft.confidence,
                            threshold,
                            "Draft below confidence threshold, suppressed"
                        );
                        return None;
                    }

                    let body = ContentFilter::new(policy.response_filter_for(&inbound.scope))
                        .apply(&draft.text);
                    if body.is_empty() {
                        info!(message_id = inbound.id, "Draft empty after filtering, suppressed");
                        return None;
                    }

                    Some(OutboundMessage {
                        body,
                        metadata: json!({
                            "kind": DeliveryKind::Reply,
                            "in_reply_to": inbound.id,
                            "confidence": draft.confidence,
                            "urgent": decision.urgent,
                            "quiet_hours": decision.quiet_hours,
                            "trigger": trigger.label(),
                        }),
                    })
                },
            )
            .await;

        Claim::Claimed {
            reply: Some(scheduled),
        }
    }

    async fn schedule_remediation(
        &self,
        message: &Message,
        verdict: &ModerationVerdict,
        sender: &ClientProfile,
        policy: &Policy,
    ) {
        let plan = self
            .remediator
            .plan(RemediationRequest {
                message,
                verdict,
                sender,
                policy,
            })
            .await;

        let now = Utc::now();
        let violation = verdict.violation_type.map(|v| v.label());

        let deliveries = [
            (
                plan.private_warning,
                ChatScope::individual(message.sender_id.clone()),
                DeliveryKind::PrivateWarning,
            ),
            (plan.group_reminder, ChatScope::Group, DeliveryKind::GroupReminder),
        ];

        for (text, scope, kind) in deliveries {
            let Some(text) = text else { continue };
            // Remediation keeps its pacing even when the message was urgent.
            let decision = self.delays.compute(policy, &scope, "", now, sender.tz());
            let metadata = json!({
                "kind": kind,
                "in_reply_to": message.id,
                "violation_type": violation,
            });
            self.scheduler
                .schedule(
                    ScheduleRequest {
                        message_id: message.id,
                        scope,
                        kind,
                        delay: decision.delay,
                    },
                    move || async move {
                        Some(OutboundMessage {
                            body: text,
                            metadata,
                        })
                    },
                )
                .await;
        }
    }

    async fn record_verdict(&self, message: &Message, verdict: &ModerationVerdict, trigger: Trigger) {
        let patch = json!({
            "moderation": verdict,
            "processed_by": trigger.label(),
        });
        if let Err(e) = self.db.merge_message_metadata(message.id, &patch).await {
            warn!(message_id = message.id, error = %e, "Failed to record verdict");
        }
    }

    async fn load_profile(&self, user_id: &str) -> ClientProfile {
        match self.db.get_client_profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => ClientProfile::anonymous(user_id),
            Err(e) => {
                warn!(user_id, error = %e, "Profile unavailable");
                ClientProfile::anonymous(user_id)
            }
        }
    }
}

/// Whether a reply should be scheduled at all. Urgency only shortens the
/// delay; the confidence threshold is checked later, at fire time.
fn reply_allowed(
    policy: &Policy,
    scope: &ChatScope,
    verdict: &ModerationVerdict,
    weekend: bool,
) -> bool {
    if !policy.scope_settings(scope).enabled {
        return false;
    }
    if scope.is_group()
        && policy.timing.weekend_behavior == WeekendBehavior::WeekendOnly
        && !weekend
    {
        return false;
    }
    verdict.should_respond
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::VerdictSource;

    fn responding() -> ModerationVerdict {
        ModerationVerdict {
            should_respond: true,
            ..ModerationVerdict::quiet(VerdictSource::Model)
        }
    }

    #[test]
    fn disabled_scope_blocks_reply() {
        let mut policy = Policy::default();
        policy.group.enabled = false;
        assert!(!reply_allowed(&policy, &ChatScope::Group, &responding(), false));
        assert!(reply_allowed(
            &policy,
            &ChatScope::individual("u1"),
            &responding(),
            false
        ));
    }

    #[test]
    fn quiet_verdict_blocks_reply() {
        let policy = Policy::default();
        let quiet = ModerationVerdict::quiet(VerdictSource::Model);
        assert!(!reply_allowed(&policy, &ChatScope::Group, &quiet, false));
        assert!(!reply_allowed(&policy, &ChatScope::individual("u1"), &quiet, true));
        assert!(reply_allowed(&policy, &ChatScope::Group, &responding(), false));
    }

    #[test]
    fn weekend_only_limits_group_replies() {
        let mut policy = Policy::default();
        policy.timing.weekend_behavior = WeekendBehavior::WeekendOnly;
        assert!(!reply_allowed(&policy, &ChatScope::Group, &responding(), false));
        assert!(reply_allowed(&policy, &ChatScope::Group, &responding(), true));
        assert!(reply_allowed(
            &policy,
            &ChatScope::individual("u1"),
            &responding(),
            false
        ));
    }
}
