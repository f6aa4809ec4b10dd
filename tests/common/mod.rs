//! Shared fixtures for integration tests: a scripted LLM and an engine
//! wired to an in-memory database.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use coach_relay::chat::{BroadcastPublisher, ChatEvent};
use coach_relay::config::EngineConfig;
use coach_relay::engine::{IngressCoordinator, IngressDeps};
use coach_relay::error::LlmError;
use coach_relay::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use coach_relay::policy::{Policy, StaticPolicyStore};
use coach_relay::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const COACH_ID: &str = "coach";

/// Which prompt a request belongs to, judged from its system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classify,
    Draft,
    Remediate,
}

/// LLM stub that answers each stage with a fixed JSON document.
pub struct ScriptedLlm {
    classify: Mutex<String>,
    draft: Mutex<String>,
    remediate: Mutex<String>,
    calls: Mutex<Vec<Stage>>,
    total: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            classify: Mutex::new(
                r#"{"shouldRespond": false, "isOffTopic": false, "topicRelevance": 5, "needsModeration": false, "violationType": "none"}"#
                    .into(),
            ),
            draft: Mutex::new(r#"{"message": "Sounds good!", "confidence": 9}"#.into()),
            remediate: Mutex::new(
                r#"{"privateWarning": "Hi there, please keep it on topic.", "groupReminder": null}"#
                    .into(),
            ),
            calls: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
        })
    }

    pub fn classify_with(&self, json: &str) {
        *self.classify.lock().unwrap() = json.to_string();
    }

    pub fn draft_with(&self, json: &str) {
        *self.draft.lock().unwrap() = json.to_string();
    }

    pub fn remediate_with(&self, json: &str) {
        *self.remediate.lock().unwrap() = json.to_string();
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, stage: Stage) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == stage).count()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.system_prompt().unwrap_or_default();
        let stage = if system.contains("Rate your confidence") {
            Stage::Draft
        } else if system.contains("moderating a client chat") {
            Stage::Remediate
        } else {
            Stage::Classify
        };
        self.calls.lock().unwrap().push(stage);
        self.total.fetch_add(1, Ordering::SeqCst);

        let content = match stage {
            Stage::Classify => self.classify.lock().unwrap().clone(),
            Stage::Draft => self.draft.lock().unwrap().clone(),
            Stage::Remediate => self.remediate.lock().unwrap().clone(),
        };
        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

pub struct Harness {
    pub coordinator: Arc<IngressCoordinator>,
    pub publisher: Arc<BroadcastPublisher>,
    pub db: Arc<dyn Database>,
    pub llm: Arc<ScriptedLlm>,
}

impl Harness {
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.publisher.subscribe()
    }
}

/// Policy with fixed, short delays so tests do not wait long.
pub fn fast_policy(group_secs: f64, individual_secs: f64) -> Policy {
    let mut policy = Policy {
        coach_name: "Coach Dana".into(),
        ..Policy::default()
    };
    for (scope, secs) in [
        (&mut policy.group, group_secs),
        (&mut policy.individual, individual_secs),
    ] {
        scope.delay.human_like = false;
        scope.delay.min_seconds = Some(secs);
        scope.delay.max_seconds = Some(secs);
    }
    policy
}

pub async fn harness(policy: Policy, llm: Arc<ScriptedLlm>) -> Harness {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let publisher = BroadcastPublisher::new();
    let config = EngineConfig {
        coach_id: COACH_ID.into(),
        sweep_grace: Duration::ZERO,
        classify_timeout: Duration::from_secs(2),
        draft_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    };
    let coordinator = Arc::new(IngressCoordinator::new(IngressDeps {
        db: db.clone(),
        policies: Arc::new(StaticPolicyStore::new(policy)),
        llm: llm.clone(),
        publisher: publisher.clone(),
        config,
    }));
    Harness {
        coordinator,
        publisher,
        db,
        llm,
    }
}

/// Next event, or panic after three seconds.
pub async fn next_event(rx: &mut broadcast::Receiver<ChatEvent>) -> ChatEvent {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no event within 3s")
        .expect("broadcast closed")
}

/// Assert nothing arrives within `window`.
pub async fn assert_quiet(rx: &mut broadcast::Receiver<ChatEvent>, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
