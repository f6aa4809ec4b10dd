//! Reply drafting — writes the persona's reply and a self-rated confidence.
//!
//! Fails silent: any LLM error, timeout or unusable output means no reply.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::chat::model::Message;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::classifier::MAX_HISTORY;
use crate::pipeline::types::Draft;
use crate::policy::{Policy, Verbosity};
use crate::profile::{ClientContext, ClientProfile};

const DRAFT_MAX_TOKENS: u32 = 800;
const DRAFT_TEMPERATURE: f32 = 0.7;

/// Intake days shown to the model.
const MAX_INTAKE_DAYS: usize = 7;
const MAX_WEIGH_INS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub message: &'a Message,
    /// Prior messages in the same scope, oldest first.
    pub history: &'a [Message],
    /// The sender of `message`.
    pub profile: &'a ClientProfile,
    pub policy: &'a Policy,
    pub verbosity: Verbosity,
}

pub struct ResponseDrafter {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl ResponseDrafter {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Draft a reply, or `None` if drafting failed.
    pub async fn draft(&self, request: DraftRequest<'_>) -> Option<Draft> {
        let outcome = match tokio::time::timeout(self.timeout, self.draft_with_model(request)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(draft) => {
                info!(
                    message_id = request.message.id,
                    confidence = draft.confidence,
                    chars = draft.text.chars().count(),
                    "Reply drafted"
                );
                Some(draft)
            }
            Err(e) => {
                warn!(message_id = request.message.id, error = %e, "Drafting failed, no reply");
                None
            }
        }
    }

    async fn draft_with_model(&self, request: DraftRequest<'_>) -> Result<Draft, PipelineError> {
        let completion = CompletionRequest::new(vec![
            ChatMessage::system(build_drafter_system_prompt(&request)),
            ChatMessage::user(build_drafter_user_prompt(&request)),
        ])
        .with_temperature(DRAFT_TEMPERATURE)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        let response = self.llm.complete(completion).await?;

        parse_draft(&response.content).map_err(|e| {
            debug!(raw_response = %response.content, "Unparseable drafter output");
            PipelineError::Draft(e)
        })
    }
}

fn build_drafter_system_prompt(request: &DraftRequest<'_>) -> String {
    let policy = request.policy;
    let channel = if request.message.scope.is_group() {
        "the group chat, where every client can read your reply"
    } else {
        "a private one-on-one chat with this client"
    };

    let mut prompt = format!(
        r#"You are {coach}, a fitness and nutrition coach replying in {channel}.

Write like a real coach texting: warm, direct, specific to what the client said. No greetings boilerplate, no sign-offs, no markdown.
{verbosity}
Never invent numbers the client has not shared. If you are unsure, say so briefly and suggest checking in.
"#,
        coach = policy.coach_name,
        verbosity = request.verbosity.guidance(),
    );

    let context = describe_context(&request.profile.context);
    if !context.is_empty() {
        let _ = write!(
            prompt,
            "\nWhat you know about {}:\n{context}",
            request.profile.first_name()
        );
    }

    prompt.push_str(
        r#"
Rate your confidence that this reply is correct and helpful, from 0 (guessing) to 10 (certain).

Return ONLY a JSON object:
{"message": "your reply", "confidence": 0-10}"#,
    );
    prompt
}

fn build_drafter_user_prompt(request: &DraftRequest<'_>) -> String {
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
            let _ = writeln!(prompt, "- {who}: {}", m.body);
        }
        prompt.push('\n');
    }
    let _ = write!(
        prompt,
        "Reply to {}:\n\"{}\"",
        request.profile.display_name, request.message.body
    );
    prompt
}

/// Render the client's context as prompt lines; empty if nothing is known.
fn describe_context(context: &ClientContext) -> String {
    let mut out = String::new();

    if let Some(targets) = &context.nutrition_targets {
        let parts: Vec<String> = [
            targets.calories.map(|v| format!("{v:.0} kcal")),
            targets.protein_g.map(|v| format!("{v:.0}g protein")),
            targets.carbs_g.map(|v| format!("{v:.0}g carbs")),
            targets.fat_g.map(|v| format!("{v:.0}g fat")),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !parts.is_empty() {
            let _ = writeln!(out, "- Daily targets: {}", parts.join(", "));
        }
    }

    for day in context.recent_intake.iter().take(MAX_INTAKE_DAYS) {
        let mut parts = Vec::new();
        if let Some(v) = day.calories {
            parts.push(format!("{v:.0} kcal"));
        }
        if let Some(v) = day.protein_g {
            parts.push(format!("{v:.0}g protein"));
        }
        if let Some(v) = day.carbs_g {
            parts.push(format!("{v:.0}g carbs"));
        }
        if let Some(v) = day.fat_g {
            parts.push(format!("{v:.0}g fat"));
        }
        if !parts.is_empty() {
            let _ = writeln!(out, "- Logged {}: {}", day.date, parts.join(", "));
        }
    }

    if let Some(workout) = &context.latest_workout {
        let _ = write!(out, "- Last workout: {} ({})", workout.name, workout.completed_at);
        if let Some(notes) = workout.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            let _ = write!(out, ", notes: {notes}");
        }
        out.push('\n');
    }

    if !context.recent_weigh_ins.is_empty() {
        let weights: Vec<String> = context
            .recent_weigh_ins
            .iter()
            .take(MAX_WEIGH_INS)
            .map(|w| format!("{} {}{}", w.date, w.weight, w.unit))
            .collect();
        let _ = writeln!(out, "- Weigh-ins: {}", weights.join("; "));
    }

    out
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    message: String,
    #[serde(default)]
    confidence: Option<f64>,
}

fn parse_draft(raw: &str) -> Result<Draft, String> {
    let json_str = extract_json_object(raw);
    let parsed: RawDraft =
        serde_json::from_str(&json_str).map_err(|e| format!("invalid JSON: {e}"))?;

    let text = parsed.message.trim().to_string();
    if text.is_empty() {
        return Err("empty message".into());
    }

    // Missing confidence means the model did not vouch for the reply.
    let confidence = parsed
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 10.0) as f32)
        .unwrap_or(0.0);

    Ok(Draft { text, confidence })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::chat::model::{ApprovalStatus, ChatScope};
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::profile::{NutritionTargets, WorkoutSummary};

    /// Records the prompt it was given and replies with a fixed string.
    struct RecordingLlm {
        response: Result<String, ()>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl RecordingLlm {
        fn new(response: Result<&str, ()>) -> Arc<Self> {
            Arc::new(Self {
                response: response.map(str::to_string),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn system_prompt(&self) -> String {
            let seen = self.seen.lock().unwrap();
            seen[0].system_prompt().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "mock-drafter"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 200,
                    output_tokens: 40,
                    finish_reason: FinishReason::Stop,
                }),
                Err(()) => Err(LlmError::RateLimited {
                    provider: "mock".into(),
                }),
            }
        }
    }

    fn message(scope: ChatScope, body: &str) -> Message {
        Message {
            id: 3,
            scope,
            sender_id: "u1".into(),
            body: body.into(),
            created_at: Utc::now(),
            automated: false,
            approval_status: ApprovalStatus::Approved,
            metadata: serde_json::json!({}),
        }
    }

    fn profile() -> ClientProfile {
        let mut p = ClientProfile::new("u1", "Sam Rivera");
        p.context.nutrition_targets = Some(NutritionTargets {
            calories: Some(2200.0),
            protein_g: Some(160.0),
            ..NutritionTargets::default()
        });
        p.context.latest_workout = Some(WorkoutSummary {
            name: "Lower body A".into(),
            completed_at: "2026-10-17".into(),
            notes: Some("knee felt tight".into()),
        });
        p
    }

    #[test]
    fn parse_clamps_confidence() {
        let draft = parse_draft(r#"{"message": " Great job! ", "confidence": 14}"#).unwrap();
        assert_eq!(draft.text, "Great job!");
        assert_eq!(draft.confidence, 10.0);

        let draft = parse_draft(r#"{"message": "Hmm", "confidence": -3}"#).unwrap();
        assert_eq!(draft.confidence, 0.0);
    }

    #[test]
    fn parse_missing_confidence_is_zero() {
        let draft = parse_draft(r#"{"message": "Try adding oats."}"#).unwrap();
        assert_eq!(draft.confidence, 0.0);
    }

    #[test]
    fn parse_rejects_empty_or_garbage() {
        assert!(parse_draft(r#"{"message": "   ", "confidence": 9}"#).is_err());
        assert!(parse_draft("Sure! Eat more protein.").is_err());
    }

    #[test]
    fn context_lines_only_for_known_data() {
        assert!(describe_context(&ClientContext::default()).is_empty());
        let text = describe_context(&profile().context);
        assert!(text.contains("2200 kcal"));
        assert!(text.contains("160g protein"));
        assert!(!text.contains("carbs"));
        assert!(text.contains("knee felt tight"));
    }

    #[tokio::test]
    async fn draft_uses_context_and_verbosity() {
        let llm = RecordingLlm::new(Ok(
            r#"{"message": "Aim for 40g protein at breakfast.", "confidence": 8}"#,
        ));
        let drafter = ResponseDrafter::new(llm.clone(), Duration::from_secs(1));
        let msg = message(ChatScope::individual("u1"), "How much protein at breakfast?");
        let p = profile();
        let policy = Policy::default();

        let draft = drafter
            .draft(DraftRequest {
                message: &msg,
                history: &[],
                profile: &p,
                policy: &policy,
                verbosity: Verbosity::Brief,
            })
            .await
            .unwrap();

        assert_eq!(draft.confidence, 8.0);
        let system = llm.system_prompt();
        assert!(system.contains("one-on-one"));
        assert!(system.contains(Verbosity::Brief.guidance()));
        assert!(system.contains("What you know about Sam"));
    }

    #[tokio::test]
    async fn group_prompt_mentions_audience() {
        let llm = RecordingLlm::new(Ok(r#"{"message": "Nice PR!", "confidence": 9}"#));
        let drafter = ResponseDrafter::new(llm.clone(), Duration::from_secs(1));
        let msg = message(ChatScope::Group, "New deadlift PR!");
        let p = ClientProfile::anonymous("u1");
        let policy = Policy::default();

        drafter
            .draft(DraftRequest {
                message: &msg,
                history: &[],
                profile: &p,
                policy: &policy,
                verbosity: Verbosity::Medium,
            })
            .await
            .unwrap();
        let system = llm.system_prompt();
        assert!(system.contains("group chat"));
        assert!(!system.contains("What you know about"));
    }

    #[tokio::test]
    async fn provider_error_yields_none() {
        let drafter = ResponseDrafter::new(RecordingLlm::new(Err(())), Duration::from_secs(1));
        let msg = message(ChatScope::Group, "Is creatine safe?");
        let p = profile();
        let policy = Policy::default();
        let draft = drafter
            .draft(DraftRequest {
                message: &msg,
                history: &[],
                profile: &p,
                policy: &policy,
                verbosity: Verbosity::Medium,
            })
            .await;
        assert!(draft.is_none());
    }
}
