//! Delayed, cancellable delivery of automated messages.
//!
//! Each scheduled response is a spawned task that sleeps for its delay,
//! claims itself out of the tracking map, runs its producer, persists the
//! result and publishes it. Cancelling before the claim aborts the task;
//! cancelling after the claim finds nothing to cancel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::chat::fanout::{Publisher, delivery_events};
use crate::chat::model::{ApprovalStatus, ChatScope, DeliveryKind, Message, NewMessage};
use crate::error::SchedulerError;
use crate::store::Database;

/// What a producer hands back at fire time.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: String,
    pub metadata: serde_json::Value,
}

/// Where and when to deliver.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Inbound message that caused this delivery.
    pub message_id: i64,
    /// Scope the automated message is delivered to.
    pub scope: ChatScope,
    pub kind: DeliveryKind,
    pub delay: Duration,
}

/// Handle returned by [`Scheduler::schedule`].
#[derive(Debug)]
pub struct Scheduled {
    pub id: Uuid,
    pub delay: Duration,
    /// Resolves with the persisted message, or `None` if the producer
    /// aborted or persistence failed. Dropped without a value on cancel.
    pub outcome: oneshot::Receiver<Option<Message>>,
}

/// A pending scheduled response, as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledResponse {
    pub id: Uuid,
    pub message_id: i64,
    pub scope: ChatScope,
    pub kind: DeliveryKind,
    pub fire_at: DateTime<Utc>,
}

struct Tracked {
    message_id: i64,
    scope: ChatScope,
    kind: DeliveryKind,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    db: Arc<dyn Database>,
    publisher: Arc<dyn Publisher>,
    /// Sender id stamped on automated messages.
    coach_id: String,
    tasks: Arc<Mutex<HashMap<Uuid, Tracked>>>,
}

impl Scheduler {
    pub fn new(
        db: Arc<dyn Database>,
        publisher: Arc<dyn Publisher>,
        coach_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            publisher,
            coach_id: coach_id.into(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arm a timer that runs `producer` after `request.delay`.
    pub async fn schedule<F, Fut>(&self, request: ScheduleRequest, producer: F) -> Scheduled
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<OutboundMessage>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let fire_at = Utc::now()
            + chrono::Duration::from_std(request.delay).unwrap_or(chrono::Duration::zero());

        let tasks = self.tasks.clone();
        let db = self.db.clone();
        let publisher = self.publisher.clone();
        let coach_id = self.coach_id.clone();
        let scope = request.scope.clone();
        let kind = request.kind;
        let message_id = request.message_id;
        let delay = request.delay;

        // Hold the lock across spawn + insert so a zero-delay task cannot
        // try to claim itself before it is tracked.
        let mut guard = self.tasks.lock().await;
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if tasks.lock().await.remove(&id).is_none() {
                return;
            }

            let delivered = match producer().await {
                Some(outbound) => {
                    deliver(&*db, &*publisher, &coach_id, &scope, kind, message_id, outbound)
                        .await
                        .map_err(|e| error!(task_id = %id, error = %e, "Scheduled delivery failed"))
                        .ok()
                }
                None => {
                    debug!(task_id = %id, message_id, kind = %kind, "Producer declined to deliver");
                    None
                }
            };
            let _ = tx.send(delivered);
        });

        guard.insert(
            id,
            Tracked {
                message_id,
                scope: request.scope.clone(),
                kind,
                fire_at,
                handle,
            },
        );
        drop(guard);

        info!(
            task_id = %id,
            message_id,
            scope = %request.scope,
            kind = %kind,
            delay_ms = delay.as_millis() as u64,
            "Response scheduled"
        );

        Scheduled {
            id,
            delay,
            outcome: rx,
        }
    }

    /// Cancel one scheduled response. Fails if it already fired or never existed.
    pub async fn cancel(&self, id: Uuid) -> Result<(), SchedulerError> {
        match self.tasks.lock().await.remove(&id) {
            Some(tracked) => {
                tracked.handle.abort();
                info!(task_id = %id, message_id = tracked.message_id, "Scheduled response cancelled");
                Ok(())
            }
            None => Err(SchedulerError::NotFound { id }),
        }
    }

    /// Cancel everything triggered by `message_id`. Returns how many were cancelled.
    pub async fn cancel_for_message(&self, message_id: i64) -> usize {
        self.cancel_where(|t| t.message_id == message_id).await
    }

    /// Cancel pending deliveries to `scope`, optionally only of one kind.
    pub async fn cancel_scope(&self, scope: &ChatScope, kind: Option<DeliveryKind>) -> usize {
        self.cancel_where(|t| &t.scope == scope && kind.is_none_or(|k| t.kind == k))
            .await
    }

    async fn cancel_where(&self, predicate: impl Fn(&Tracked) -> bool) -> usize {
        let mut tasks = self.tasks.lock().await;
        let ids: Vec<Uuid> = tasks
            .iter()
            .filter(|(_, t)| predicate(t))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(tracked) = tasks.remove(id) {
                tracked.handle.abort();
                debug!(task_id = %id, message_id = tracked.message_id, "Scheduled response cancelled");
            }
        }
        ids.len()
    }

    /// Pending responses, soonest first.
    pub async fn pending(&self) -> Vec<ScheduledResponse> {
        let tasks = self.tasks.lock().await;
        let mut pending: Vec<ScheduledResponse> = tasks
            .iter()
            .map(|(id, t)| ScheduledResponse {
                id: *id,
                message_id: t.message_id,
                scope: t.scope.clone(),
                kind: t.kind,
                fire_at: t.fire_at,
            })
            .collect();
        pending.sort_by_key(|p| p.fire_at);
        pending
    }
}

/// Persist an automated message, then publish content before counter.
async fn deliver(
    db: &dyn Database,
    publisher: &dyn Publisher,
    coach_id: &str,
    scope: &ChatScope,
    kind: DeliveryKind,
    message_id: i64,
    outbound: OutboundMessage,
) -> Result<Message, SchedulerError> {
    let new = NewMessage {
        scope: scope.clone(),
        sender_id: coach_id.to_string(),
        body: outbound.body,
        automated: true,
        approval_status: ApprovalStatus::Approved,
        metadata: outbound.metadata,
    };
    let message = db
        .insert_message(&new)
        .await
        .map_err(|e| SchedulerError::DeliveryFailed {
            message_id,
            reason: e.to_string(),
        })?;

    for event in delivery_events(kind, &message) {
        publisher.publish(event);
    }
    info!(
        message_id,
        delivered_id = message.id,
        scope = %scope,
        kind = %kind,
        "Automated message delivered"
    );
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fanout::{BroadcastPublisher, ChatEvent};
    use crate::store::LibSqlBackend;

    async fn setup() -> (Scheduler, Arc<BroadcastPublisher>, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let publisher = BroadcastPublisher::new();
        let scheduler = Scheduler::new(db.clone(), publisher.clone(), "coach");
        (scheduler, publisher, db)
    }

    fn request(scope: ChatScope, kind: DeliveryKind, delay_ms: u64) -> ScheduleRequest {
        ScheduleRequest {
            message_id: 7,
            scope,
            kind,
            delay: Duration::from_millis(delay_ms),
        }
    }

    fn outbound(body: &str) -> Option<OutboundMessage> {
        Some(OutboundMessage {
            body: body.to_string(),
            metadata: serde_json::json!({"kind": "reply"}),
        })
    }

    #[tokio::test]
    async fn fires_persists_and_publishes_in_order() {
        let (scheduler, publisher, db) = setup().await;
        let mut rx = publisher.subscribe();

        let scheduled = scheduler
            .schedule(
                request(ChatScope::individual("u1"), DeliveryKind::Reply, 0),
                || async { outbound("Drink some water first.") },
            )
            .await;

        let message = scheduled.outcome.await.unwrap().unwrap();
        assert!(message.automated);
        assert_eq!(message.sender_id, "coach");
        assert_eq!(message.approval_status, ApprovalStatus::Approved);
        assert_eq!(db.count_automated(&ChatScope::individual("u1")).await.unwrap(), 1);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.label(), "new_individual_message");
        assert_eq!(
            second,
            ChatEvent::CounterUpdate {
                target_user_id: "u1".into(),
                delta: 1
            }
        );
        assert!(scheduler.pending().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_fire_prevents_delivery() {
        let (scheduler, publisher, db) = setup().await;
        let mut rx = publisher.subscribe();

        let scheduled = scheduler
            .schedule(
                request(ChatScope::Group, DeliveryKind::Reply, 10_000),
                || async { outbound("too late") },
            )
            .await;
        assert_eq!(scheduler.pending().await.len(), 1);

        scheduler.cancel(scheduled.id).await.unwrap();
        assert!(scheduled.outcome.await.is_err());
        assert!(scheduler.pending().await.is_empty());
        assert_eq!(db.count_automated(&ChatScope::Group).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        // Second cancel is a no-op error.
        assert!(matches!(
            scheduler.cancel(scheduled.id).await,
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_after_fire_is_noop() {
        let (scheduler, _publisher, _db) = setup().await;
        let scheduled = scheduler
            .schedule(
                request(ChatScope::Group, DeliveryKind::Reply, 0),
                || async { outbound("done") },
            )
            .await;
        let id = scheduled.id;
        assert!(scheduled.outcome.await.unwrap().is_some());
        assert!(scheduler.cancel(id).await.is_err());
    }

    #[tokio::test]
    async fn producer_can_abort() {
        let (scheduler, publisher, db) = setup().await;
        let mut rx = publisher.subscribe();
        let scheduled = scheduler
            .schedule(
                request(ChatScope::Group, DeliveryKind::Reply, 0),
                || async { None },
            )
            .await;
        assert!(scheduled.outcome.await.unwrap().is_none());
        assert_eq!(db.count_automated(&ChatScope::Group).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_scope_filters_by_kind() {
        let (scheduler, _publisher, _db) = setup().await;
        let scope = ChatScope::individual("u1");
        scheduler
            .schedule(request(scope.clone(), DeliveryKind::Reply, 10_000), || async {
                outbound("a")
            })
            .await;
        scheduler
            .schedule(
                request(scope.clone(), DeliveryKind::PrivateWarning, 10_000),
                || async { outbound("b") },
            )
            .await;
        scheduler
            .schedule(
                request(ChatScope::individual("u2"), DeliveryKind::Reply, 10_000),
                || async { outbound("c") },
            )
            .await;

        assert_eq!(scheduler.cancel_scope(&scope, Some(DeliveryKind::Reply)).await, 1);
        let pending = scheduler.pending().await;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|p| p.kind == DeliveryKind::PrivateWarning));

        assert_eq!(scheduler.cancel_for_message(7).await, 2);
        assert!(scheduler.pending().await.is_empty());
    }

    #[tokio::test]
    async fn pending_sorted_by_fire_time() {
        let (scheduler, _publisher, _db) = setup().await;
        scheduler
            .schedule(request(ChatScope::Group, DeliveryKind::Reply, 60_000), || async {
                outbound("later")
            })
            .await;
        scheduler
            .schedule(
                request(ChatScope::Group, DeliveryKind::GroupReminder, 5_000),
                || async { outbound("sooner") },
            )
            .await;
        let pending = scheduler.pending().await;
        assert_eq!(pending[0].kind, DeliveryKind::GroupReminder);
        assert_eq!(pending[1].kind, DeliveryKind::Reply);
        scheduler.cancel_for_message(7).await;
    }
}
