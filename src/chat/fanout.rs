//! Fan-out of chat events to connected sessions.
//!
//! Delivery is best effort: a session that is not subscribed when an event
//! is published simply never sees it. Durable history comes from the
//! persisted-message read path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::model::{ChatScope, DeliveryKind, Message};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Events pushed to client sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A new automated message in the group channel.
    NewGroupMessage { message: Message },
    /// A new automated message in one client's individual channel.
    NewIndividualMessage {
        target_user_id: String,
        message: Message,
    },
    /// A private moderation note for one client.
    PrivateModerationMessage {
        target_user_id: String,
        message: Message,
    },
    /// Unread counter change for one client.
    CounterUpdate { target_user_id: String, delta: i64 },
    /// Unread counter change for the group channel.
    GroupCounterUpdate { delta: i64 },
}

impl ChatEvent {
    /// User this event is addressed to, or `None` for group-wide events.
    pub fn target_user_id(&self) -> Option<&str> {
        match self {
            Self::NewIndividualMessage { target_user_id, .. }
            | Self::PrivateModerationMessage { target_user_id, .. }
            | Self::CounterUpdate { target_user_id, .. } => Some(target_user_id),
            Self::NewGroupMessage { .. } | Self::GroupCounterUpdate { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NewGroupMessage { .. } => "new_group_message",
            Self::NewIndividualMessage { .. } => "new_individual_message",
            Self::PrivateModerationMessage { .. } => "private_moderation_message",
            Self::CounterUpdate { .. } => "counter_update",
            Self::GroupCounterUpdate { .. } => "group_counter_update",
        }
    }
}

/// The content event and the counter event for one persisted delivery,
/// in publish order.
pub fn delivery_events(kind: DeliveryKind, message: &Message) -> [ChatEvent; 2] {
    match (&message.scope, kind) {
        (ChatScope::Individual { user_id }, DeliveryKind::PrivateWarning) => [
            ChatEvent::PrivateModerationMessage {
                target_user_id: user_id.clone(),
                message: message.clone(),
            },
            ChatEvent::CounterUpdate {
                target_user_id: user_id.clone(),
                delta: 1,
            },
        ],
        (ChatScope::Individual { user_id }, _) => [
            ChatEvent::NewIndividualMessage {
                target_user_id: user_id.clone(),
                message: message.clone(),
            },
            ChatEvent::CounterUpdate {
                target_user_id: user_id.clone(),
                delta: 1,
            },
        ],
        (ChatScope::Group, _) => [
            ChatEvent::NewGroupMessage {
                message: message.clone(),
            },
            ChatEvent::GroupCounterUpdate { delta: 1 },
        ],
    }
}

/// Pub/sub sink for chat events.
pub trait Publisher: Send + Sync {
    /// Publish one event. Never fails; undeliverable events are dropped.
    fn publish(&self, event: ChatEvent);
}

/// In-process publisher backed by a tokio broadcast channel.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ChatEvent>,
}

impl BroadcastPublisher {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Subscribe to live events. Each WS session calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, event: ChatEvent) {
        let label = event.label();
        // Ok if no sessions are listening
        if self.tx.send(event).is_err() {
            debug!(event = label, "No subscribers for chat event");
        }
    }
}

/// Which events a single connected session should see.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub user_id: Option<String>,
    /// Coach sessions see every event.
    pub coach: bool,
}

impl SessionFilter {
    pub fn accepts(&self, event: &ChatEvent) -> bool {
        if self.coach {
            return true;
        }
        match event.target_user_id() {
            None => true,
            Some(target) => self.user_id.as_deref() == Some(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::chat::model::ApprovalStatus;

    fn message(scope: ChatScope) -> Message {
        Message {
            id: 1,
            scope,
            sender_id: "coach".into(),
            body: "hello".into(),
            created_at: Utc::now(),
            automated: true,
            approval_status: ApprovalStatus::Approved,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn individual_reply_events_in_order() {
        let msg = message(ChatScope::individual("u1"));
        let [content, counter] = delivery_events(DeliveryKind::Reply, &msg);
        assert_eq!(content.label(), "new_individual_message");
        assert_eq!(counter.label(), "counter_update");
        assert_eq!(counter.target_user_id(), Some("u1"));
    }

    #[test]
    fn warning_uses_private_moderation_event() {
        let msg = message(ChatScope::individual("u2"));
        let [content, _] = delivery_events(DeliveryKind::PrivateWarning, &msg);
        assert_eq!(content.label(), "private_moderation_message");
    }

    #[test]
    fn group_events_have_no_target() {
        let msg = message(ChatScope::Group);
        let [content, counter] = delivery_events(DeliveryKind::GroupReminder, &msg);
        assert_eq!(content.label(), "new_group_message");
        assert_eq!(counter, ChatEvent::GroupCounterUpdate { delta: 1 });
        assert!(content.target_user_id().is_none());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(ChatEvent::CounterUpdate {
            target_user_id: "u1".into(),
            delta: 1,
        })
        .unwrap();
        assert_eq!(json["type"], "counter_update");
        assert_eq!(json["target_user_id"], "u1");
    }

    #[test]
    fn session_filter_scoping() {
        let client = SessionFilter {
            user_id: Some("u1".into()),
            coach: false,
        };
        let coach = SessionFilter {
            user_id: None,
            coach: true,
        };
        let other = ChatEvent::CounterUpdate {
            target_user_id: "u2".into(),
            delta: 1,
        };
        let mine = ChatEvent::CounterUpdate {
            target_user_id: "u1".into(),
            delta: 1,
        };
        let group = ChatEvent::GroupCounterUpdate { delta: 1 };

        assert!(client.accepts(&mine));
        assert!(!client.accepts(&other));
        assert!(client.accepts(&group));
        assert!(coach.accepts(&other));
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let publisher = BroadcastPublisher::new();
        let mut rx = publisher.subscribe();
        publisher.publish(ChatEvent::GroupCounterUpdate { delta: 1 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, ChatEvent::GroupCounterUpdate { delta: 1 });
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let publisher = BroadcastPublisher::new();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(ChatEvent::GroupCounterUpdate { delta: 1 });
    }
}
