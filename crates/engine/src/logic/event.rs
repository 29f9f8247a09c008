//! Broadcast bus for conversation change notifications
//!
//! Events fan out to live operator sessions over a tokio broadcast channel.
//! Delivery is best effort: a session that lags past the channel capacity
//! drops events and is expected to reconcile through the read API.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use tokio::sync::broadcast;
use tracing::trace;
use utoipa::ToSchema;

use super::channel::ChannelKind;
use super::conversation::Conversation;
use super::message::ChannelMessage;

pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

/// What a subscriber wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Scope {
    /// Every event on the bus.
    All,
    /// Events for one organization.
    Organization { organization_id: WrappedUuidV4 },
    /// Events touching one conversation.
    Conversation { conversation_id: WrappedUuidV4 },
}

/// The change an event describes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationEventKind {
    ConversationCreated { conversation: Conversation },
    ConversationUpdated { conversation: Conversation },
    MessageCreated { message: ChannelMessage },
    MessageUpdated { message: ChannelMessage },
    IntegrationUpdated { integration_id: WrappedUuidV4 },
    IntegrationAuthExpired {
        integration_id: WrappedUuidV4,
        channel: ChannelKind,
    },
}

/// A single notification on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ConversationEvent {
    pub id: WrappedUuidV4,
    pub organization_id: WrappedUuidV4,
    #[serde(flatten)]
    pub kind: ConversationEventKind,
    pub created_at: WrappedChronoDateTime,
}

impl ConversationEvent {
    pub fn new(organization_id: WrappedUuidV4, kind: ConversationEventKind) -> Self {
        Self {
            id: WrappedUuidV4::new(),
            organization_id,
            kind,
            created_at: WrappedChronoDateTime::now(),
        }
    }

    /// The conversation this event touches, when it touches one.
    pub fn conversation_id(&self) -> Option<&WrappedUuidV4> {
        match &self.kind {
            ConversationEventKind::ConversationCreated { conversation }
            | ConversationEventKind::ConversationUpdated { conversation } => {
                Some(&conversation.id)
            }
            ConversationEventKind::MessageCreated { message }
            | ConversationEventKind::MessageUpdated { message } => Some(&message.conversation_id),
            ConversationEventKind::IntegrationUpdated { .. }
            | ConversationEventKind::IntegrationAuthExpired { .. } => None,
        }
    }

    pub fn matches(&self, scope: &Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Organization { organization_id } => &self.organization_id == organization_id,
            Scope::Conversation { conversation_id } => {
                self.conversation_id() == Some(conversation_id)
            }
        }
    }
}

/// Broadcast bus for conversation events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConversationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the receiver count. Publishing with no subscribers is not an
    /// error; the event is simply dropped.
    pub fn publish(&self, event: ConversationEvent) -> usize {
        trace!(event_id = %event.id, "publishing conversation event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, scope: Scope) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            scope,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A scoped subscription to the event bus.
pub struct EventSubscription {
    receiver: broadcast::Receiver<ConversationEvent>,
    scope: Scope,
}

impl EventSubscription {
    /// Receive the next event matching this subscription's scope.
    ///
    /// A lagged receiver skips past the dropped events and keeps going; the
    /// caller reconciles through the read API. Returns `None` once the bus is
    /// closed.
    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if event.matches(&self.scope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "event subscription lagged, continuing");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::super::conversation::{ConversationStatus, Priority};
        use super::super::*;

        fn sample_conversation(organization_id: WrappedUuidV4) -> Conversation {
            let now = WrappedChronoDateTime::now();
            Conversation {
                id: WrappedUuidV4::new(),
                organization_id,
                customer_id: "cust-1".to_string(),
                channel: ChannelKind::WhatsApp,
                status: ConversationStatus::Pending,
                priority: Priority::Normal,
                assigned_agent_id: None,
                tags: vec![],
                created_at: now,
                updated_at: now,
                resolved_at: None,
            }
        }

        #[tokio::test]
        async fn test_publish_without_subscribers_is_fine() {
            let bus = EventBus::default();
            let org = WrappedUuidV4::new();
            let delivered = bus.publish(ConversationEvent::new(
                org.clone(),
                ConversationEventKind::ConversationCreated {
                    conversation: sample_conversation(org),
                },
            ));
            assert_eq!(delivered, 0);
        }

        #[tokio::test]
        async fn test_organization_scope_filters_other_orgs() {
            let bus = EventBus::default();
            let org_a = WrappedUuidV4::new();
            let org_b = WrappedUuidV4::new();
            let mut sub = bus.subscribe(Scope::Organization {
                organization_id: org_a.clone(),
            });

            bus.publish(ConversationEvent::new(
                org_b.clone(),
                ConversationEventKind::ConversationCreated {
                    conversation: sample_conversation(org_b),
                },
            ));
            bus.publish(ConversationEvent::new(
                org_a.clone(),
                ConversationEventKind::ConversationCreated {
                    conversation: sample_conversation(org_a.clone()),
                },
            ));

            let event = sub.recv().await.unwrap();
            assert_eq!(event.organization_id, org_a);
        }

        #[tokio::test]
        async fn test_conversation_scope_matches_messages() {
            let bus = EventBus::default();
            let org = WrappedUuidV4::new();
            let conversation = sample_conversation(org.clone());
            let mut sub = bus.subscribe(Scope::Conversation {
                conversation_id: conversation.id.clone(),
            });

            bus.publish(ConversationEvent::new(
                org.clone(),
                ConversationEventKind::IntegrationUpdated {
                    integration_id: WrappedUuidV4::new(),
                },
            ));
            bus.publish(ConversationEvent::new(
                org,
                ConversationEventKind::ConversationUpdated {
                    conversation: conversation.clone(),
                },
            ));

            let event = sub.recv().await.unwrap();
            assert_eq!(event.conversation_id(), Some(&conversation.id));
        }
    }
}
