//! Channel message model and logic
//!
//! A channel message is one inbound or outbound message inside a
//! conversation. Delivery state is tracked per message; the dispatcher
//! updates it as sends progress.

use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{
    PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};
use utoipa::ToSchema;

use super::channel::ChannelKind;
use super::event::{ConversationEvent, ConversationEventKind, EventBus};
use crate::repository::{ConversationRepositoryLike, MessageRepositoryLike};

/// Delivery state of a single message.
///
/// Outbound messages move `queued -> sent` (or `failed`); inbound messages
/// land as `delivered` and move to `read` when an operator opens the
/// conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Read => "read",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            "read" => Ok(DeliveryStatus::Read),
            other => Err(anyhow::anyhow!("unknown delivery status: {other}")),
        }
    }
}

impl From<DeliveryStatus> for libsql::Value {
    fn from(val: DeliveryStatus) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

impl From<&DeliveryStatus> for libsql::Value {
    fn from(val: &DeliveryStatus) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// One message inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ChannelMessage {
    pub id: WrappedUuidV4,
    pub conversation_id: WrappedUuidV4,
    pub channel: ChannelKind,
    pub body: String,
    pub is_incoming: bool,
    pub status: DeliveryStatus,
    /// Provider message id, present on inbound messages when the provider
    /// supplies one. Deduplication key for webhook retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Channel-specific payload details the generic model does not cover,
    /// such as media attachments.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    #[schema(value_type = Option<Object>)]
    pub provider_metadata: Option<WrappedJsonValue>,
    /// Delivery attempts consumed so far (outbound only).
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: WrappedChronoDateTime,
}

pub type GetMessageResponse = ChannelMessage;
pub type ListMessagesResponse = PaginatedResponse<ChannelMessage>;

/// Request to send an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct SendMessageRequest {
    pub body: String,
}

/// Response for marking a conversation read.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct MarkReadResponse {
    /// How many messages transitioned to `read`.
    pub marked: u64,
}

// --- Logic Functions ---

/// Get a message by id.
pub async fn get_message<R: MessageRepositoryLike>(
    repository: &R,
    message_id: WrappedUuidV4,
) -> Result<GetMessageResponse, CommonError> {
    repository
        .get_message_by_id(&message_id)
        .await?
        .ok_or_else(|| CommonError::NotFound {
            msg: format!("Message with id {message_id} not found"),
            lookup_id: message_id.to_string(),
            source: None,
        })
}

/// List a conversation's messages in chronological order.
pub async fn list_conversation_messages<R: MessageRepositoryLike + ConversationRepositoryLike>(
    repository: &R,
    conversation_id: WrappedUuidV4,
    pagination: PaginationRequest,
) -> Result<ListMessagesResponse, CommonError> {
    let conversation = repository.get_conversation_by_id(&conversation_id).await?;
    let _ = conversation.ok_or_else(|| CommonError::NotFound {
        msg: format!("Conversation with id {conversation_id} not found"),
        lookup_id: conversation_id.to_string(),
        source: None,
    })?;

    repository
        .get_messages_by_conversation(&conversation_id, &pagination)
        .await
}

/// Mark all unread inbound messages in a conversation as read.
///
/// Idempotent: marking an already-read conversation reports zero.
pub async fn mark_conversation_read<R: MessageRepositoryLike + ConversationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    conversation_id: WrappedUuidV4,
) -> Result<MarkReadResponse, CommonError> {
    let conversation = repository.get_conversation_by_id(&conversation_id).await?;
    let conversation = conversation.ok_or_else(|| CommonError::NotFound {
        msg: format!("Conversation with id {conversation_id} not found"),
        lookup_id: conversation_id.to_string(),
        source: None,
    })?;

    let marked = repository.mark_messages_read(&conversation_id).await?;

    if marked > 0 {
        let _ = event_bus.publish(ConversationEvent::new(
            conversation.organization_id.clone(),
            ConversationEventKind::ConversationUpdated { conversation },
        ));
    }

    Ok(MarkReadResponse { marked })
}
