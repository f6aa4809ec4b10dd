//! Moderation classifier — decides whether the persona should reply and
//! whether the message breaks content policy.
//!
//! Flow:
//! 1. Rules engine (fast, no LLM) → may short-circuit to a quiet verdict
//! 2. LLM classification → structured JSON verdict, bounded by a timeout
//! 3. On any failure → name-mention heuristic, never a violation

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::chat::model::Message;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{ModerationVerdict, Severity, VerdictSource, ViolationType};
use crate::policy::{Policy, WeekendBehavior};

/// Most recent messages shown to the classifier.
pub const MAX_HISTORY: usize = 10;

const CLASSIFY_MAX_TOKENS: u32 = 400;

/// Low temperature: this is a judgment call, not prose.
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Inputs for one classification.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub message: &'a Message,
    /// Prior messages in the same scope, oldest first.
    pub history: &'a [Message],
    pub policy: &'a Policy,
    pub sender_name: &'a str,
    /// Whether it is currently the weekend for the sender.
    pub weekend: bool,
}

pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    rules: RulesEngine,
    timeout: Duration,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, rules: RulesEngine, timeout: Duration) -> Self {
        Self {
            llm,
            rules,
            timeout,
        }
    }

    /// Classify one message. Never fails.
    pub async fn classify(&self, request: ClassifyRequest<'_>) -> ModerationVerdict {
        let message = request.message;

        if let Some(matched) = self.rules.evaluate(&message.body, request.policy) {
            debug!(
                message_id = message.id,
                reason = matched.reason,
                "Rules engine matched — skipping LLM classification"
            );
            return ModerationVerdict::quiet(VerdictSource::Rules);
        }

        let outcome = match tokio::time::timeout(self.timeout, self.classify_with_model(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(verdict) => {
                info!(
                    message_id = message.id,
                    should_respond = verdict.should_respond,
                    needs_moderation = verdict.needs_moderation,
                    relevance = verdict.topic_relevance,
                    "Message classified"
                );
                verdict
            }
            Err(e) => {
                warn!(message_id = message.id, error = %e, "Classifier failed, using name-mention heuristic");
                heuristic_verdict(&message.body, request.policy)
            }
        }
    }

    async fn classify_with_model(
        &self,
        request: ClassifyRequest<'_>,
    ) -> Result<ModerationVerdict, PipelineError> {
        let system_prompt = build_classifier_system_prompt(request.policy, request.weekend);
        let user_prompt = build_classifier_user_prompt(&request);

        let completion = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(completion).await?;

        parse_verdict(&response.content).map_err(|e| {
            debug!(raw_response = %response.content, "Unparseable classifier output");
            PipelineError::Classify(format!("parse failed: {e}"))
        })
    }
}

/// Fallback when the model is unavailable: reply only when the persona is
/// addressed by name or role, and never flag a violation.
pub fn heuristic_verdict(body: &str, policy: &Policy) -> ModerationVerdict {
    ModerationVerdict {
        should_respond: policy.mentions_coach(body),
        ..ModerationVerdict::quiet(VerdictSource::Heuristic)
    }
}

fn build_classifier_system_prompt(policy: &Policy, weekend: bool) -> String {
    let weekend_note = match (weekend, policy.timing.weekend_behavior) {
        (true, WeekendBehavior::Reduced) => {
            "\nIt is the weekend and the coach wants reduced activity: only respond to direct questions or requests for help.\n"
        }
        _ => "",
    };

    format!(
        r#"You decide whether {coach} — a fitness and nutrition coach in a client chat — should reply to the latest message, and whether it breaks the chat's content rules.

Response frequency: {frequency}/10 (1 = only when clearly needed, 10 = join in often).
Topic strictness: {strictness}/10 (1 = casual chat is fine, 10 = fitness, nutrition and wellness only).
{weekend_note}
RESPOND when the message:
- mentions {coach} by name or role
- asks a direct question about training, nutrition, recovery or wellness
- asks for help or reports a problem
- shares a milestone or win worth acknowledging
- breaks a long silence with something substantive

DO NOT RESPOND to:
- greetings or sign-offs addressed to everyone
- acknowledgements ("ok", "thanks", emoji)
- clients chatting with each other

MODERATION (independent of whether to respond):
- off-topic: unrelated to fitness, nutrition, health, wellness or coaching (weigh against the strictness dial)
- profanity: explicit language
- rude: hostile, aggressive, or bullying
- offensive: discriminatory, hateful, sexual
- inappropriate: spam, promotion, personal attacks

Return ONLY a JSON object:
{{
  "shouldRespond": true|false,
  "isOffTopic": true|false,
  "topicRelevance": 1-10,
  "needsModeration": true|false,
  "violationType": "none|off-topic|profanity|rude|offensive|inappropriate",
  "severity": "low|medium|high"
}}"#,
        coach = policy.coach_name,
        frequency = policy.response_frequency,
        strictness = policy.fitness_strictness,
    )
}

fn build_classifier_user_prompt(request: &ClassifyRequest<'_>) -> String {
    let mut prompt = String::new();

    let start = request.history.len().saturating_sub(MAX_HISTORY);
    let recent = &request.history[start..];
    if !recent.is_empty() {
        prompt.push_str("Recent conversation (oldest first):\n");
        for m in recent {
            let who = if m.automated {
                request.policy.coach_name.as_str()
            } else {
                m.sender_id.as_str()
            };
            prompt.push_str(&format!("- {who}: {}\n", m.body));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "Channel: {}\nLatest message from {}:\n\"{}\"",
        request.message.scope.chat_type(),
        request.sender_name,
        request.message.body
    ));
    prompt
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    should_respond: bool,
    #[serde(default)]
    is_off_topic: bool,
    #[serde(default)]
    topic_relevance: Option<f64>,
    #[serde(default)]
    needs_moderation: bool,
    #[serde(default)]
    violation_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

fn parse_verdict(raw: &str) -> Result<ModerationVerdict, String> {
    let json_str = extract_json_object(raw);
    let parsed: RawVerdict =
        serde_json::from_str(&json_str).map_err(|e| format!("invalid JSON: {e}"))?;

    let mut violation_type = parsed.violation_type.as_deref().and_then(ViolationType::from_label);
    if parsed.needs_moderation && violation_type.is_none() && parsed.is_off_topic {
        violation_type = Some(ViolationType::OffTopic);
    }

    let topic_relevance = parsed
        .topic_relevance
        .filter(|r| r.is_finite())
        .map(|r| r.round().clamp(1.0, 10.0) as u8)
        .unwrap_or(if parsed.is_off_topic { 2 } else { 5 });

    Ok(ModerationVerdict {
        should_respond: parsed.should_respond,
        is_off_topic: parsed.is_off_topic,
        topic_relevance,
        needs_moderation: parsed.needs_moderation,
        violation_type,
        severity: parsed.severity.as_deref().and_then(Severity::from_label),
        source: VerdictSource::Model,
    })
}
