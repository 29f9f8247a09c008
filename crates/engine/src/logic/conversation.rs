//! Conversation domain model and logic
//!
//! A conversation is a thread between one customer and one organization on
//! one channel. Its lifecycle is a state machine:
//!
//! ```text
//! pending -> active -> resolved -> closed
//!    \________/            |
//!        ^                 | (inbound within reopen window)
//!        |_________________|
//! ```
//!
//! At most one open (pending or active) conversation exists per
//! (organization, customer, channel) pair; a partial unique index enforces
//! this under concurrency.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{
    PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use utoipa::ToSchema;

use super::channel::{ChannelKind, InboundEvent};
use super::event::{ConversationEvent, ConversationEventKind, EventBus};
use super::integration::ChannelIntegration;
use super::message::{ChannelMessage, DeliveryStatus};
use crate::repository::{
    ConversationRepositoryLike, CreateConversation, CreateMessage, MessageRepositoryLike,
    UpdateConversationState,
};

/// Lifecycle state of a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Customer wrote in, no operator engaged yet.
    Pending,
    /// An operator is engaged.
    Active,
    /// Marked handled; reopens if the customer writes back within the window.
    Resolved,
    /// Terminal. New inbound from the same customer starts a fresh
    /// conversation.
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Pending => "pending",
            ConversationStatus::Active => "active",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Closed => "closed",
        }
    }

    /// Whether the conversation still accepts inbound appends directly.
    pub fn is_open(&self) -> bool {
        matches!(self, ConversationStatus::Pending | ConversationStatus::Active)
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConversationStatus::Pending),
            "active" => Ok(ConversationStatus::Active),
            "resolved" => Ok(ConversationStatus::Resolved),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(anyhow::anyhow!("unknown conversation status: {other}")),
        }
    }
}

impl From<ConversationStatus> for libsql::Value {
    fn from(val: ConversationStatus) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

impl From<&ConversationStatus> for libsql::Value {
    fn from(val: &ConversationStatus) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// Operator-facing priority of a conversation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "urgent" => Ok(Priority::Urgent),
            other => Err(anyhow::anyhow!("unknown priority: {other}")),
        }
    }
}

impl From<Priority> for libsql::Value {
    fn from(val: Priority) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

impl From<&Priority> for libsql::Value {
    fn from(val: &Priority) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// A conversation thread between one customer and one organization on one
/// channel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Conversation {
    pub id: WrappedUuidV4,
    pub organization_id: WrappedUuidV4,
    /// Provider-scoped customer identifier for the owning channel.
    pub customer_id: String,
    pub channel: ChannelKind,
    pub status: ConversationStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<WrappedUuidV4>,
    /// Free-form labels with set semantics; adding an existing tag is a
    /// no-op.
    pub tags: Vec<String>,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<WrappedChronoDateTime>,
}

pub type GetConversationResponse = Conversation;
pub type ListConversationsResponse = PaginatedResponse<Conversation>;

/// Request to assign a conversation to an operator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct AssignConversationRequest {
    pub agent_id: WrappedUuidV4,
}

/// Request to add tags to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct AddTagsRequest {
    pub tags: Vec<String>,
}

/// Request to change a conversation's priority.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct SetPriorityRequest {
    pub priority: Priority,
}

/// How an inbound message landed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReceiveOutcomeKind {
    /// A new conversation was created for this message.
    Created,
    /// The message was appended to an existing open conversation.
    Appended,
    /// A resolved conversation inside its reopen window was reactivated.
    Reopened,
    /// The provider retried a webhook we had already recorded.
    Duplicate,
}

/// Result of ingesting one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ReceiveOutcome {
    pub kind: ReceiveOutcomeKind,
    pub conversation: Conversation,
    pub message: ChannelMessage,
}

/// Per-pair append locks serializing inbound ingestion for one
/// (organization, customer, channel) so near-simultaneous messages append in
/// arrival order instead of racing conversation creation.
#[derive(Debug, Default)]
pub struct PairLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub fn lock_for(
        &self,
        organization_id: &WrappedUuidV4,
        customer_id: &str,
        channel: ChannelKind,
    ) -> Arc<Mutex<()>> {
        let key = format!("{organization_id}:{customer_id}:{channel}");
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// --- Logic Functions ---

/// Get a conversation by id.
pub async fn get_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    conversation_id: WrappedUuidV4,
) -> Result<GetConversationResponse, CommonError> {
    repository
        .get_conversation_by_id(&conversation_id)
        .await?
        .ok_or_else(|| CommonError::NotFound {
            msg: format!("Conversation with id {conversation_id} not found"),
            lookup_id: conversation_id.to_string(),
            source: None,
        })
}

/// List an organization's conversations, optionally filtered by status,
/// newest activity first.
pub async fn list_conversations<R: ConversationRepositoryLike>(
    repository: &R,
    organization_id: WrappedUuidV4,
    status: Option<ConversationStatus>,
    pagination: PaginationRequest,
) -> Result<ListConversationsResponse, CommonError> {
    repository
        .get_conversations(&organization_id, status, &pagination)
        .await
}

/// Ingest one normalized inbound message.
///
/// Runs under the pair lock so concurrent webhooks for the same customer
/// serialize. Resolution order: duplicate check, open conversation, reopen
/// window, create new. Creation still handles a unique violation by
/// re-reading, covering racers that do not share this process's locks.
pub async fn receive_inbound<R: ConversationRepositoryLike + MessageRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    pair_locks: &PairLocks,
    integration: &ChannelIntegration,
    inbound: InboundEvent,
) -> Result<ReceiveOutcome, CommonError> {
    let organization_id = integration.organization_id.clone();
    let lock = pair_locks.lock_for(&organization_id, &inbound.external_customer_ref, inbound.channel);
    let _guard = lock.lock().await;

    // Webhook retry: the provider message id is already recorded.
    if let Some(external_id) = &inbound.external_message_id {
        if let Some(existing) = repository
            .get_message_by_external_id(inbound.channel, external_id)
            .await?
        {
            debug!(external_id, "duplicate webhook delivery ignored");
            let conversation =
                get_conversation(repository, existing.conversation_id.clone()).await?;
            return Ok(ReceiveOutcome {
                kind: ReceiveOutcomeKind::Duplicate,
                conversation,
                message: existing,
            });
        }
    }

    let (conversation, kind) =
        resolve_target_conversation(repository, integration, &inbound).await?;

    // A duplicate external id surfacing here means two deliveries raced past
    // the precheck. Surface the first write.
    let message = match append_inbound_message(repository, &conversation, &inbound).await {
        Ok(message) => message,
        Err(e) if e.is_unique_violation() => {
            let external_id = inbound.external_message_id.as_deref().unwrap_or_default();
            let existing = repository
                .get_message_by_external_id(inbound.channel, external_id)
                .await?
                .ok_or(e)?;
            let conversation =
                get_conversation(repository, existing.conversation_id.clone()).await?;
            return Ok(ReceiveOutcome {
                kind: ReceiveOutcomeKind::Duplicate,
                conversation,
                message: existing,
            });
        }
        Err(e) => return Err(e),
    };

    let touched = touch_conversation(repository, &conversation).await?;

    match kind {
        ReceiveOutcomeKind::Created => {
            let _ = event_bus.publish(ConversationEvent::new(
                organization_id.clone(),
                ConversationEventKind::ConversationCreated {
                    conversation: touched.clone(),
                },
            ));
        }
        _ => {
            let _ = event_bus.publish(ConversationEvent::new(
                organization_id.clone(),
                ConversationEventKind::ConversationUpdated {
                    conversation: touched.clone(),
                },
            ));
        }
    }
    let _ = event_bus.publish(ConversationEvent::new(
        organization_id,
        ConversationEventKind::MessageCreated {
            message: message.clone(),
        },
    ));

    Ok(ReceiveOutcome {
        kind,
        conversation: touched,
        message,
    })
}

async fn resolve_target_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    integration: &ChannelIntegration,
    inbound: &InboundEvent,
) -> Result<(Conversation, ReceiveOutcomeKind), CommonError> {
    let organization_id = &integration.organization_id;

    if let Some(open) = repository
        .get_open_conversation(organization_id, &inbound.external_customer_ref, inbound.channel)
        .await?
    {
        return Ok((open, ReceiveOutcomeKind::Appended));
    }

    // A recently resolved conversation reopens instead of forking a new one.
    let reopen_window = Duration::from_secs(integration.settings.reopen_window_secs);
    if let Some(resolved) = repository
        .get_latest_resolved_conversation(
            organization_id,
            &inbound.external_customer_ref,
            inbound.channel,
        )
        .await?
    {
        let within_window = resolved
            .resolved_at
            .map(|resolved_at| {
                let elapsed = inbound.occurred_at.get_inner().signed_duration_since(
                    *resolved_at.get_inner(),
                );
                elapsed
                    <= chrono::Duration::from_std(reopen_window)
                        .unwrap_or(chrono::Duration::MAX)
            })
            .unwrap_or(false);

        if within_window {
            trace!(conversation_id = %resolved.id, "reopening resolved conversation");
            let now = WrappedChronoDateTime::now();
            let reopened = Conversation {
                status: ConversationStatus::Active,
                resolved_at: None,
                updated_at: now,
                ..resolved
            };
            repository
                .update_conversation_state(&update_params(&reopened))
                .await?;
            return Ok((reopened, ReceiveOutcomeKind::Reopened));
        }
    }

    let now = WrappedChronoDateTime::now();
    let conversation = Conversation {
        id: WrappedUuidV4::new(),
        organization_id: organization_id.clone(),
        customer_id: inbound.external_customer_ref.clone(),
        channel: inbound.channel,
        status: ConversationStatus::Pending,
        priority: integration.settings.default_priority,
        assigned_agent_id: None,
        tags: vec![],
        created_at: now,
        updated_at: now,
        resolved_at: None,
    };

    let create_params = CreateConversation {
        id: conversation.id.clone(),
        organization_id: conversation.organization_id.clone(),
        customer_id: conversation.customer_id.clone(),
        channel: conversation.channel,
        status: conversation.status,
        priority: conversation.priority,
        tags: tags_json(&conversation.tags)?,
        created_at: now,
        updated_at: now,
    };

    match repository.create_conversation(&create_params).await {
        Ok(()) => Ok((conversation, ReceiveOutcomeKind::Created)),
        Err(e) if e.is_unique_violation() => {
            // Another writer created the open conversation first; attach to
            // theirs.
            let open = repository
                .get_open_conversation(
                    organization_id,
                    &inbound.external_customer_ref,
                    inbound.channel,
                )
                .await?
                .ok_or(e)?;
            Ok((open, ReceiveOutcomeKind::Appended))
        }
        Err(e) => Err(e),
    }
}

async fn append_inbound_message<R: MessageRepositoryLike>(
    repository: &R,
    conversation: &Conversation,
    inbound: &InboundEvent,
) -> Result<ChannelMessage, CommonError> {
    let provider_metadata = if inbound.media.is_empty() {
        None
    } else {
        Some(WrappedJsonValue::new(serde_json::json!({
            "media": inbound.media,
        })))
    };

    let message = ChannelMessage {
        id: WrappedUuidV4::new(),
        conversation_id: conversation.id.clone(),
        channel: inbound.channel,
        body: inbound.text.clone(),
        is_incoming: true,
        status: DeliveryStatus::Delivered,
        external_id: inbound.external_message_id.clone(),
        provider_metadata,
        attempts: 0,
        last_error: None,
        created_at: inbound.occurred_at,
    };

    let create_params = CreateMessage {
        id: message.id.clone(),
        conversation_id: message.conversation_id.clone(),
        channel: message.channel,
        body: message.body.clone(),
        is_incoming: message.is_incoming,
        status: message.status,
        external_id: message.external_id.clone(),
        provider_metadata: message.provider_metadata.clone(),
        created_at: message.created_at,
    };

    repository.create_message(&create_params).await?;
    Ok(message)
}

async fn touch_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    conversation: &Conversation,
) -> Result<Conversation, CommonError> {
    let touched = Conversation {
        updated_at: WrappedChronoDateTime::now(),
        ..conversation.clone()
    };
    repository
        .update_conversation_state(&update_params(&touched))
        .await?;
    Ok(touched)
}

fn update_params(conversation: &Conversation) -> UpdateConversationState {
    UpdateConversationState {
        id: conversation.id.clone(),
        status: conversation.status,
        priority: conversation.priority,
        assigned_agent_id: conversation.assigned_agent_id.clone(),
        tags: tags_json(&conversation.tags).unwrap_or_else(|_| {
            WrappedJsonValue::new(serde_json::Value::Array(vec![]))
        }),
        updated_at: conversation.updated_at,
        resolved_at: conversation.resolved_at,
    }
}

fn tags_json(tags: &[String]) -> Result<WrappedJsonValue, CommonError> {
    Ok(WrappedJsonValue::new(serde_json::to_value(tags)?))
}

/// Assign a conversation to an operator, activating it if still pending.
pub async fn assign_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    conversation_id: WrappedUuidV4,
    request: AssignConversationRequest,
) -> Result<Conversation, CommonError> {
    let conversation = get_conversation(repository, conversation_id).await?;

    if conversation.status == ConversationStatus::Closed {
        return Err(CommonError::Conflict {
            msg: format!("conversation {} is closed", conversation.id),
            source: None,
        });
    }

    let updated = Conversation {
        status: ConversationStatus::Active,
        assigned_agent_id: Some(request.agent_id),
        resolved_at: None,
        updated_at: WrappedChronoDateTime::now(),
        ..conversation
    };
    repository
        .update_conversation_state(&update_params(&updated))
        .await?;

    let _ = event_bus.publish(ConversationEvent::new(
        updated.organization_id.clone(),
        ConversationEventKind::ConversationUpdated {
            conversation: updated.clone(),
        },
    ));

    Ok(updated)
}

/// Activate a pending conversation without assigning an operator.
///
/// The dispatcher calls this when the first reply goes out on a pending
/// conversation. No-op for conversations already past pending.
pub async fn activate_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    conversation_id: WrappedUuidV4,
) -> Result<Conversation, CommonError> {
    let conversation = get_conversation(repository, conversation_id).await?;
    if conversation.status != ConversationStatus::Pending {
        return Ok(conversation);
    }

    let updated = Conversation {
        status: ConversationStatus::Active,
        updated_at: WrappedChronoDateTime::now(),
        ..conversation
    };
    repository
        .update_conversation_state(&update_params(&updated))
        .await?;

    let _ = event_bus.publish(ConversationEvent::new(
        updated.organization_id.clone(),
        ConversationEventKind::ConversationUpdated {
            conversation: updated.clone(),
        },
    ));

    Ok(updated)
}

/// Resolve an open conversation.
pub async fn resolve_conversation<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    conversation_id: WrappedUuidV4,
) -> Result<Conversation, CommonError> {
    let conversation = get_conversation(repository, conversation_id).await?;

    if !conversation.status.is_open() {
        return Err(CommonError::Conflict {
            msg: format!(
                "conversation {} is {} and cannot be resolved",
                conversation.id, conversation.status
            ),
            source: None,
        });
    }

    let now = WrappedChronoDateTime::now();
    let updated = Conversation {
        status: ConversationStatus::Resolved,
        resolved_at: Some(now),
        updated_at: now,
        ..conversation
    };
    repository
        .update_conversation_state(&update_params(&updated))
        .await?;

    let _ = event_bus.publish(ConversationEvent::new(
        updated.organization_id.clone(),
        ConversationEventKind::ConversationUpdated {
            conversation: updated.clone(),
        },
    ));

    Ok(updated)
}

/// Add tags to a conversation. Tags behave as a set.
pub async fn add_tags<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    conversation_id: WrappedUuidV4,
    request: AddTagsRequest,
) -> Result<Conversation, CommonError> {
    let conversation = get_conversation(repository, conversation_id).await?;

    if conversation.status == ConversationStatus::Closed {
        return Err(CommonError::Conflict {
            msg: format!("conversation {} is closed", conversation.id),
            source: None,
        });
    }

    let mut tags = conversation.tags.clone();
    for tag in request.tags {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    if tags == conversation.tags {
        return Ok(conversation);
    }

    let updated = Conversation {
        tags,
        updated_at: WrappedChronoDateTime::now(),
        ..conversation
    };
    repository
        .update_conversation_state(&update_params(&updated))
        .await?;

    let _ = event_bus.publish(ConversationEvent::new(
        updated.organization_id.clone(),
        ConversationEventKind::ConversationUpdated {
            conversation: updated.clone(),
        },
    ));

    Ok(updated)
}

/// Change a conversation's priority.
pub async fn set_priority<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    conversation_id: WrappedUuidV4,
    request: SetPriorityRequest,
) -> Result<Conversation, CommonError> {
    let conversation = get_conversation(repository, conversation_id).await?;

    if conversation.status == ConversationStatus::Closed {
        return Err(CommonError::Conflict {
            msg: format!("conversation {} is closed", conversation.id),
            source: None,
        });
    }

    let updated = Conversation {
        priority: request.priority,
        updated_at: WrappedChronoDateTime::now(),
        ..conversation
    };
    repository
        .update_conversation_state(&update_params(&updated))
        .await?;

    let _ = event_bus.publish(ConversationEvent::new(
        updated.organization_id.clone(),
        ConversationEventKind::ConversationUpdated {
            conversation: updated.clone(),
        },
    ));

    Ok(updated)
}

/// Close resolved conversations whose reopen window elapsed.
///
/// Run periodically by the server. Returns how many conversations closed.
pub async fn close_expired<R: ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    reopen_window: Duration,
) -> Result<u64, CommonError> {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(reopen_window).unwrap_or(chrono::Duration::MAX);
    let closed = repository
        .close_resolved_before(&WrappedChronoDateTime::new(cutoff))
        .await?;

    for conversation in &closed {
        let _ = event_bus.publish(ConversationEvent::new(
            conversation.organization_id.clone(),
            ConversationEventKind::ConversationUpdated {
                conversation: conversation.clone(),
            },
        ));
    }

    Ok(closed.len() as u64)
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;

        #[test]
        fn test_status_string_roundtrip() {
            for status in [
                ConversationStatus::Pending,
                ConversationStatus::Active,
                ConversationStatus::Resolved,
                ConversationStatus::Closed,
            ] {
                let parsed = ConversationStatus::from_str(status.as_str()).unwrap();
                assert_eq!(status, parsed);
            }
        }

        #[test]
        fn test_open_states() {
            assert!(ConversationStatus::Pending.is_open());
            assert!(ConversationStatus::Active.is_open());
            assert!(!ConversationStatus::Resolved.is_open());
            assert!(!ConversationStatus::Closed.is_open());
        }

        #[test]
        fn test_priority_default_is_normal() {
            assert_eq!(Priority::default(), Priority::Normal);
        }

        #[test]
        fn test_pair_locks_same_key_same_lock() {
            let locks = PairLocks::new();
            let org = WrappedUuidV4::new();
            let a = locks.lock_for(&org, "cust", ChannelKind::Sms);
            let b = locks.lock_for(&org, "cust", ChannelKind::Sms);
            assert!(Arc::ptr_eq(&a, &b));

            let c = locks.lock_for(&org, "cust", ChannelKind::Email);
            assert!(!Arc::ptr_eq(&a, &c));
        }
    }
}
