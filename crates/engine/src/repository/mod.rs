//! Repository layer for the conversation engine
//! Contains trait definitions and the sqlite implementation for conversation,
//! message, and integration storage.

pub mod sqlite;

use async_trait::async_trait;
use shared::{
    error::CommonError,
    primitives::{
        PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue,
        WrappedUuidV4,
    },
};

pub use sqlite::Repository;

use crate::logic::{
    channel::ChannelKind,
    conversation::{Conversation, ConversationStatus, Priority},
    inbox::InboxCounts,
    integration::ChannelIntegration,
    message::{ChannelMessage, DeliveryStatus},
};

// --- Conversation Repository Types ---

/// Parameters for creating a new conversation
#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub id: WrappedUuidV4,
    pub organization_id: WrappedUuidV4,
    pub customer_id: String,
    pub channel: ChannelKind,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub tags: WrappedJsonValue,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

/// Parameters for updating a conversation's mutable state
#[derive(Debug, Clone)]
pub struct UpdateConversationState {
    pub id: WrappedUuidV4,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub assigned_agent_id: Option<WrappedUuidV4>,
    pub tags: WrappedJsonValue,
    pub updated_at: WrappedChronoDateTime,
    pub resolved_at: Option<WrappedChronoDateTime>,
}

// --- Message Repository Types ---

/// Parameters for creating a new message
#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub id: WrappedUuidV4,
    pub conversation_id: WrappedUuidV4,
    pub channel: ChannelKind,
    pub body: String,
    pub is_incoming: bool,
    pub status: DeliveryStatus,
    pub external_id: Option<String>,
    pub provider_metadata: Option<WrappedJsonValue>,
    pub created_at: WrappedChronoDateTime,
}

/// Parameters for updating a message's delivery state
#[derive(Debug, Clone)]
pub struct UpdateMessageDelivery {
    pub id: WrappedUuidV4,
    pub status: DeliveryStatus,
    pub external_id: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

// --- Integration Repository Types ---

/// Parameters for creating a new integration
#[derive(Debug, Clone)]
pub struct CreateIntegration {
    pub id: WrappedUuidV4,
    pub organization_id: WrappedUuidV4,
    pub channel: ChannelKind,
    pub credentials: WrappedJsonValue,
    pub settings: WrappedJsonValue,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

/// Parameters for updating an existing integration
#[derive(Debug, Clone)]
pub struct UpdateIntegration {
    pub id: WrappedUuidV4,
    pub credentials: WrappedJsonValue,
    pub settings: WrappedJsonValue,
    pub is_active: bool,
    pub updated_at: WrappedChronoDateTime,
}

// --- Repository Traits ---

/// Repository trait for conversation operations
#[async_trait]
pub trait ConversationRepositoryLike: Send + Sync {
    /// Create a new conversation
    async fn create_conversation(&self, params: &CreateConversation) -> Result<(), CommonError>;

    /// Update a conversation's mutable state
    async fn update_conversation_state(
        &self,
        params: &UpdateConversationState,
    ) -> Result<(), CommonError>;

    /// Get a conversation by ID
    async fn get_conversation_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<Conversation>, CommonError>;

    /// Get the open (pending or active) conversation for a pair, if any
    async fn get_open_conversation(
        &self,
        organization_id: &WrappedUuidV4,
        customer_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, CommonError>;

    /// Get the most recently resolved conversation for a pair, if any
    async fn get_latest_resolved_conversation(
        &self,
        organization_id: &WrappedUuidV4,
        customer_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, CommonError>;

    /// List an organization's conversations, newest activity first
    async fn get_conversations(
        &self,
        organization_id: &WrappedUuidV4,
        status: Option<ConversationStatus>,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<Conversation>, CommonError>;

    /// Close resolved conversations whose `resolved_at` predates the cutoff,
    /// returning the conversations that changed
    async fn close_resolved_before(
        &self,
        cutoff: &WrappedChronoDateTime,
    ) -> Result<Vec<Conversation>, CommonError>;

    /// Compute inbox badge counts for an organization
    async fn get_inbox_counts(
        &self,
        organization_id: &WrappedUuidV4,
    ) -> Result<InboxCounts, CommonError>;
}

/// Repository trait for message operations
#[async_trait]
pub trait MessageRepositoryLike: Send + Sync {
    /// Create a new message
    async fn create_message(&self, params: &CreateMessage) -> Result<(), CommonError>;

    /// Update a message's delivery state
    async fn update_message_delivery(
        &self,
        params: &UpdateMessageDelivery,
    ) -> Result<(), CommonError>;

    /// Get a message by ID
    async fn get_message_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<ChannelMessage>, CommonError>;

    /// Look up a message by its provider id, the webhook deduplication key
    async fn get_message_by_external_id(
        &self,
        channel: ChannelKind,
        external_id: &str,
    ) -> Result<Option<ChannelMessage>, CommonError>;

    /// List a conversation's messages in chronological order with pagination
    async fn get_messages_by_conversation(
        &self,
        conversation_id: &WrappedUuidV4,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<ChannelMessage>, CommonError>;

    /// The most recent messages across an organization, newest first
    async fn get_latest_messages(
        &self,
        organization_id: &WrappedUuidV4,
        limit: i64,
    ) -> Result<Vec<ChannelMessage>, CommonError>;

    /// Mark unread inbound messages in a conversation as read, returning how
    /// many changed
    async fn mark_messages_read(
        &self,
        conversation_id: &WrappedUuidV4,
    ) -> Result<u64, CommonError>;
}

/// Repository trait for integration operations
#[async_trait]
pub trait IntegrationRepositoryLike: Send + Sync {
    /// Create a new integration
    async fn create_integration(&self, params: &CreateIntegration) -> Result<(), CommonError>;

    /// Update an existing integration
    async fn update_integration(&self, params: &UpdateIntegration) -> Result<(), CommonError>;

    /// Deactivate an integration. Returns false when it was already inactive
    async fn deactivate_integration(&self, id: &WrappedUuidV4) -> Result<bool, CommonError>;

    /// Get an integration by ID
    async fn get_integration_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<ChannelIntegration>, CommonError>;

    /// Get an organization's integration for one channel, if any
    async fn get_integration_for_channel(
        &self,
        organization_id: &WrappedUuidV4,
        channel: ChannelKind,
    ) -> Result<Option<ChannelIntegration>, CommonError>;

    /// List an organization's integrations with pagination
    async fn get_integrations(
        &self,
        organization_id: &WrappedUuidV4,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<ChannelIntegration>, CommonError>;

    /// Record a successful provider interaction
    async fn update_last_sync(
        &self,
        id: &WrappedUuidV4,
        at: &WrappedChronoDateTime,
    ) -> Result<(), CommonError>;
}

/// Combined repository trait for all engine operations
#[async_trait]
pub trait EngineRepositoryLike:
    ConversationRepositoryLike + MessageRepositoryLike + IntegrationRepositoryLike
{
}

// Blanket implementation for any type that implements all traits
impl<T> EngineRepositoryLike for T where
    T: ConversationRepositoryLike + MessageRepositoryLike + IntegrationRepositoryLike
{
}
