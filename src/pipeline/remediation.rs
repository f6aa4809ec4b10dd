//! Remediation drafting for messages that break content policy.
//!
//! Produces a private warning for the sender and, for group messages, a
//! short reminder to the whole group that names nobody. When the model is
//! unavailable only a templated private warning goes out.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::chat::model::Message;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::types::{ModerationVerdict, RemediationPlan, Severity, ViolationType};
use crate::policy::Policy;
use crate::profile::ClientProfile;

const REMEDIATION_MAX_TOKENS: u32 = 400;
const REMEDIATION_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy)]
pub struct RemediationRequest<'a> {
    pub message: &'a Message,
    pub verdict: &'a ModerationVerdict,
    pub sender: &'a ClientProfile,
    pub policy: &'a Policy,
}

pub struct Remediator {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl Remediator {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Build the remediation messages for a flagged message. Never fails.
    pub async fn plan(&self, request: RemediationRequest<'_>) -> RemediationPlan {
        let outcome =
            match tokio::time::timeout(self.timeout, self.plan_with_model(request)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout(self.timeout)),
            };

        let plan = match outcome {
            Ok(plan) => plan,
            Err(e) => {
                warn!(message_id = request.message.id, error = %e, "Remediation drafting failed, using templates");
                template_plan(&request)
            }
        };

        let plan = finalize(plan, &request);
        info!(
            message_id = request.message.id,
            warning = plan.private_warning.is_some(),
            reminder = plan.group_reminder.is_some(),
            "Remediation planned"
        );
        plan
    }

    async fn plan_with_model(
        &self,
        request: RemediationRequest<'_>,
    ) -> Result<RemediationPlan, PipelineError> {
        let completion = CompletionRequest::new(vec![
            ChatMessage::system(build_remediation_system_prompt(&request)),
            ChatMessage::user(format!(
                "Message from {} in the {} chat:\n\"{}\"",
                request.sender.display_name,
                request.message.scope.chat_type(),
                request.message.body
            )),
        ])
        .with_temperature(REMEDIATION_TEMPERATURE)
        .with_max_tokens(REMEDIATION_MAX_TOKENS);

        let response = self.llm.complete(completion).await?;
        parse_plan(&response.content).map_err(|e| {
            debug!(raw_response = %response.content, "Unparseable remediation output");
            PipelineError::Remediation(e)
        })
    }
}

fn violation_of(verdict: &ModerationVerdict) -> ViolationType {
    verdict.violation_type.unwrap_or(if verdict.is_off_topic {
        ViolationType::OffTopic
    } else {
        ViolationType::Inappropriate
    })
}

fn build_remediation_system_prompt(request: &RemediationRequest<'_>) -> String {
    let violation = violation_of(request.verdict);
    let severity = match request.verdict.severity {
        Some(Severity::High) => "high",
        Some(Severity::Medium) => "medium",
        _ => "low",
    };
    let reminder_rule = if request.message.scope.is_group() {
        "groupReminder: one friendly sentence for the whole group about keeping the chat on fitness and respectful. Never name or hint at who broke the rule."
    } else {
        "groupReminder: always null (this was a private chat)."
    };

    format!(
        r#"You are {coach}, a fitness coach moderating a client chat. A message was flagged as {violation} (severity {severity}).

Write:
- privateWarning: a short, kind, private note to the sender. Start with "Hi {first}," and explain what to avoid without lecturing.
- {reminder_rule}

Return ONLY a JSON object:
{{"privateWarning": "...", "groupReminder": "..." or null}}"#,
        coach = request.policy.coach_name,
        violation = violation.label(),
        first = greeting_name(request.sender),
    )
}

fn greeting_name(sender: &ClientProfile) -> &str {
    match sender.first_name() {
        "" => "there",
        name => name,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    #[serde(default)]
    private_warning: Option<String>,
    #[serde(default)]
    group_reminder: Option<String>,
}

fn parse_plan(raw: &str) -> Result<RemediationPlan, String> {
    let json_str = extract_json_object(raw);
    let parsed: RawPlan =
        serde_json::from_str(&json_str).map_err(|e| format!("invalid JSON: {e}"))?;
    if parsed.private_warning.as_deref().is_none_or(|w| w.trim().is_empty()) {
        return Err("missing privateWarning".into());
    }
    Ok(RemediationPlan {
        private_warning: parsed.private_warning,
        group_reminder: parsed.group_reminder,
    })
}

fn template_plan(request: &RemediationRequest<'_>) -> RemediationPlan {
    let first = greeting_name(request.sender);
    let warning = match violation_of(request.verdict) {
        ViolationType::OffTopic => format!(
            "Hi {first}, just a friendly reminder to keep the chat focused on training, nutrition and wellness. Thanks!"
        ),
        ViolationType::Profanity => format!(
            "Hi {first}, please keep the language clean in the chat so it stays welcoming for everyone. Thanks!"
        ),
        ViolationType::Rude | ViolationType::Offensive | ViolationType::Inappropriate => format!(
            "Hi {first}, please keep messages in the chat respectful and supportive. Reach out to me directly if something is bothering you."
        ),
    };
    RemediationPlan {
        private_warning: Some(warning),
        group_reminder: None,
    }
}

/// Enforce the shape rules regardless of where the text came from.
fn finalize(plan: RemediationPlan, request: &RemediationRequest<'_>) -> RemediationPlan {
    let first = greeting_name(request.sender);
    let private_warning = plan
        .private_warning
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .map(|w| {
            if w.starts_with("Hi ") {
                w
            } else {
                format!("Hi {first}, {w}")
            }
        });

    let group_reminder = if request.message.scope.is_group() {
        plan.group_reminder
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
    } else {
        None
    };

    RemediationPlan {
        private_warning,
        group_reminder,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::chat::model::{ApprovalStatus, ChatScope};
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::pipeline::types::VerdictSource;

    struct ScriptedLlm(Option<&'static str>);

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "mock-remediator"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            match self.0 {
                Some(content) => Ok(CompletionResponse {
                    content: content.to_string(),
                    input_tokens: 80,
                    output_tokens: 30,
                    finish_reason: FinishReason::Stop,
                }),
                None => Err(LlmError::InvalidResponse {
                    provider: "mock".into(),
                    reason: "empty".into(),
                }),
            }
        }
    }

    fn message(scope: ChatScope) -> Message {
        Message {
            id: 21,
            scope,
            sender_id: "u1".into(),
            body: "who's watching the football tonight".into(),
            created_at: Utc::now(),
            automated: false,
            approval_status: ApprovalStatus::Approved,
            metadata: serde_json::json!({}),
        }
    }

    fn verdict() -> ModerationVerdict {
        ModerationVerdict {
            needs_moderation: true,
            is_off_topic: true,
            violation_type: Some(ViolationType::OffTopic),
            severity: Some(Severity::Low),
            ..ModerationVerdict::quiet(VerdictSource::Model)
        }
    }

    async fn plan_for(llm: ScriptedLlm, scope: ChatScope) -> RemediationPlan {
        let remediator = Remediator::new(Arc::new(llm), Duration::from_secs(1));
        let msg = message(scope);
        let v = verdict();
        let sender = ClientProfile::new("u1", "Sam Rivera");
        let policy = Policy::default();
        remediator
            .plan(RemediationRequest {
                message: &msg,
                verdict: &v,
                sender: &sender,
                policy: &policy,
            })
            .await
    }

    #[tokio::test]
    async fn model_plan_for_group_message() {
        let plan = plan_for(
            ScriptedLlm(Some(
                r#"{"privateWarning": "Hi Sam, let's keep sports chat for elsewhere.", "groupReminder": "Reminder: this space is for training talk."}"#,
            )),
            ChatScope::Group,
        )
        .await;
        assert_eq!(
            plan.private_warning.as_deref(),
            Some("Hi Sam, let's keep sports chat for elsewhere.")
        );
        assert_eq!(
            plan.group_reminder.as_deref(),
            Some("Reminder: this space is for training talk.")
        );
    }

    #[tokio::test]
    async fn individual_scope_drops_group_reminder() {
        let plan = plan_for(
            ScriptedLlm(Some(
                r#"{"privateWarning": "Hi Sam, please keep it on topic.", "groupReminder": "Everyone stay on topic"}"#,
            )),
            ChatScope::individual("u1"),
        )
        .await;
        assert!(plan.private_warning.is_some());
        assert!(plan.group_reminder.is_none());
    }

    #[tokio::test]
    async fn warning_gets_greeting_prefix() {
        let plan = plan_for(
            ScriptedLlm(Some(r#"{"privateWarning": "please stay on topic.", "groupReminder": null}"#)),
            ChatScope::Group,
        )
        .await;
        assert_eq!(
            plan.private_warning.as_deref(),
            Some("Hi Sam, please stay on topic.")
        );
        assert!(plan.group_reminder.is_none());
    }

    #[tokio::test]
    async fn failure_uses_templates() {
        let plan = plan_for(ScriptedLlm(None), ChatScope::Group).await;
        let warning = plan.private_warning.unwrap();
        assert!(warning.starts_with("Hi Sam,"));
        assert!(plan.group_reminder.is_none());
    }

    #[test]
    fn parse_requires_warning() {
        assert!(parse_plan(r#"{"groupReminder": "x"}"#).is_err());
        assert!(parse_plan(r#"{"privateWarning": "  "}"#).is_err());
        assert!(parse_plan(r#"{"privateWarning": "Hi Sam, ok"}"#).is_ok());
    }
}
