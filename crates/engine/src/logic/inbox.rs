//! Unified inbox aggregation
//!
//! Cross-channel counts for an organization's inbox header. Computed directly
//! from the store so the numbers are exact even when broadcast events were
//! dropped.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;
use utoipa::ToSchema;

use super::message::ChannelMessage;
use crate::repository::{ConversationRepositoryLike, MessageRepositoryLike};

/// Badge counts for one organization's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct InboxCounts {
    /// Inbound messages in open conversations not yet marked read.
    pub unread: i64,
    /// Conversations awaiting a first operator response.
    pub pending: i64,
    /// Open conversations at urgent priority.
    pub urgent: i64,
    /// All open conversations.
    pub open_total: i64,
}

/// Recent activity across all of an organization's conversations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct InboxSummary {
    pub counts: InboxCounts,
    /// Most recent messages, newest first.
    pub latest_messages: Vec<ChannelMessage>,
}

/// Default number of recent messages in the inbox summary.
pub const DEFAULT_LATEST_MESSAGES: i64 = 20;

// --- Logic Functions ---

/// Compute inbox badge counts for an organization.
pub async fn get_inbox_counts<R: ConversationRepositoryLike>(
    repository: &R,
    organization_id: WrappedUuidV4,
) -> Result<InboxCounts, CommonError> {
    repository.get_inbox_counts(&organization_id).await
}

/// Counts plus the most recent messages across every channel.
pub async fn get_inbox_summary<R: ConversationRepositoryLike + MessageRepositoryLike>(
    repository: &R,
    organization_id: WrappedUuidV4,
    limit: i64,
) -> Result<InboxSummary, CommonError> {
    let counts = repository.get_inbox_counts(&organization_id).await?;
    let latest_messages = repository
        .get_latest_messages(&organization_id, limit)
        .await?;

    Ok(InboxSummary {
        counts,
        latest_messages,
    })
}
