//! SQLite repository implementation for the conversation engine

mod rows;

use async_trait::async_trait;
use shared::{
    error::CommonError,
    primitives::{
        PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedUuidV4,
        decode_pagination_token,
    },
};
use tracing::trace;

use crate::logic::{
    channel::ChannelKind,
    conversation::{Conversation, ConversationStatus},
    inbox::InboxCounts,
    integration::ChannelIntegration,
    message::ChannelMessage,
};
use crate::repository::{
    ConversationRepositoryLike, CreateConversation, CreateIntegration, CreateMessage,
    IntegrationRepositoryLike, MessageRepositoryLike, UpdateConversationState, UpdateIntegration,
    UpdateMessageDelivery,
};

use rows::{conversation_from_row, integration_from_row, message_from_row};

/// SQLite repository for engine data
#[derive(Clone)]
pub struct Repository {
    conn: shared::libsql::Connection,
}

impl Repository {
    /// Create a new repository instance
    pub fn new(conn: shared::libsql::Connection) -> Self {
        Self { conn }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &shared::libsql::Connection {
        &self.conn
    }
}

// --- Helper Functions ---

/// Decode pagination token to datetime cursor
fn decode_cursor(
    pagination: &PaginationRequest,
) -> Result<Option<WrappedChronoDateTime>, CommonError> {
    if let Some(token) = &pagination.next_page_token {
        let decoded_parts = decode_pagination_token(token).map_err(|e| CommonError::Repository {
            msg: format!("Invalid pagination token: {e}"),
            source: Some(e.into()),
        })?;
        if decoded_parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(
                WrappedChronoDateTime::try_from(decoded_parts[0].as_str()).map_err(|e| {
                    CommonError::Repository {
                        msg: format!("Invalid datetime in pagination token: {e}"),
                        source: Some(e.into()),
                    }
                })?,
            ))
        }
    } else {
        Ok(None)
    }
}

async fn collect_rows<T>(
    mut rows: libsql::Rows,
    convert: impl Fn(&libsql::Row) -> Result<T, CommonError>,
) -> Result<Vec<T>, CommonError> {
    let mut items = Vec::new();
    while let Some(row) = rows.next().await? {
        items.push(convert(&row)?);
    }
    Ok(items)
}

const CONVERSATION_COLUMNS: &str = "id, organization_id, customer_id, channel, status, priority, \
     assigned_agent_id, tags, created_at, updated_at, resolved_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, channel, body, is_incoming, status, \
     external_id, provider_metadata, attempts, last_error, created_at";

const INTEGRATION_COLUMNS: &str = "id, organization_id, channel, credentials, settings, \
     is_active, last_sync_at, created_at, updated_at";

// --- Conversation Repository Implementation ---

#[async_trait]
impl ConversationRepositoryLike for Repository {
    async fn create_conversation(&self, params: &CreateConversation) -> Result<(), CommonError> {
        trace!(conversation_id = %params.id, channel = %params.channel, "Creating conversation");
        self.conn
            .execute(
                "INSERT INTO conversations (id, organization_id, customer_id, channel, status, \
                 priority, tags, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                libsql::params![
                    &params.id,
                    &params.organization_id,
                    params.customer_id.clone(),
                    params.channel,
                    params.status,
                    params.priority,
                    &params.tags,
                    params.created_at,
                    params.updated_at,
                ],
            )
            .await?;
        trace!(conversation_id = %params.id, "Conversation created");
        Ok(())
    }

    async fn update_conversation_state(
        &self,
        params: &UpdateConversationState,
    ) -> Result<(), CommonError> {
        trace!(conversation_id = %params.id, status = %params.status, "Updating conversation state");
        self.conn
            .execute(
                "UPDATE conversations SET status = ?2, priority = ?3, assigned_agent_id = ?4, \
                 tags = ?5, updated_at = ?6, resolved_at = ?7 WHERE id = ?1",
                libsql::params![
                    &params.id,
                    params.status,
                    params.priority,
                    params.assigned_agent_id.clone(),
                    &params.tags,
                    params.updated_at,
                    params.resolved_at,
                ],
            )
            .await?;
        trace!(conversation_id = %params.id, "Conversation state updated");
        Ok(())
    }

    async fn get_conversation_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<Conversation>, CommonError> {
        trace!(conversation_id = %id, "Getting conversation by ID");
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                libsql::params![id],
            )
            .await?;

        let conversation = match rows.next().await? {
            Some(row) => Some(conversation_from_row(&row)?),
            None => None,
        };
        trace!(conversation_id = %id, found = conversation.is_some(), "Got conversation by ID");
        Ok(conversation)
    }

    async fn get_open_conversation(
        &self,
        organization_id: &WrappedUuidV4,
        customer_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, CommonError> {
        trace!(organization_id = %organization_id, customer_id, channel = %channel, "Getting open conversation");
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE organization_id = ?1 AND customer_id = ?2 AND channel = ?3 \
                     AND status IN ('pending', 'active')"
                ),
                libsql::params![organization_id, customer_id.to_string(), channel],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(conversation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_latest_resolved_conversation(
        &self,
        organization_id: &WrappedUuidV4,
        customer_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, CommonError> {
        trace!(organization_id = %organization_id, customer_id, channel = %channel, "Getting latest resolved conversation");
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE organization_id = ?1 AND customer_id = ?2 AND channel = ?3 \
                     AND status = 'resolved' ORDER BY resolved_at DESC LIMIT 1"
                ),
                libsql::params![organization_id, customer_id.to_string(), channel],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(conversation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_conversations(
        &self,
        organization_id: &WrappedUuidV4,
        status: Option<ConversationStatus>,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<Conversation>, CommonError> {
        trace!(organization_id = %organization_id, page_size = pagination.page_size, "Listing conversations");
        let cursor = decode_cursor(pagination)?;

        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE organization_id = ?1 \
                     AND (?2 IS NULL OR status = ?2) \
                     AND (?3 IS NULL OR updated_at < ?3) \
                     ORDER BY updated_at DESC LIMIT ?4"
                ),
                libsql::params![
                    organization_id,
                    status,
                    cursor,
                    pagination.page_size + 1,
                ],
            )
            .await?;

        let items = collect_rows(rows, conversation_from_row).await?;

        trace!(count = items.len(), "Listed conversations");
        Ok(PaginatedResponse::from_items_with_extra(
            items,
            pagination,
            |conversation| vec![conversation.updated_at.get_inner().to_rfc3339()],
        ))
    }

    async fn close_resolved_before(
        &self,
        cutoff: &WrappedChronoDateTime,
    ) -> Result<Vec<Conversation>, CommonError> {
        trace!(cutoff = %cutoff, "Closing resolved conversations past the reopen window");
        let rows = self
            .conn
            .query(
                &format!(
                    "UPDATE conversations SET status = 'closed', updated_at = ?2 \
                     WHERE status = 'resolved' AND resolved_at < ?1 \
                     RETURNING {CONVERSATION_COLUMNS}"
                ),
                libsql::params![cutoff, WrappedChronoDateTime::now()],
            )
            .await?;

        let closed = collect_rows(rows, conversation_from_row).await?;
        trace!(count = closed.len(), "Closed resolved conversations");
        Ok(closed)
    }

    async fn get_inbox_counts(
        &self,
        organization_id: &WrappedUuidV4,
    ) -> Result<InboxCounts, CommonError> {
        trace!(organization_id = %organization_id, "Computing inbox counts");
        let mut rows = self
            .conn
            .query(
                "SELECT \
                 (SELECT COUNT(*) FROM channel_messages m \
                  JOIN conversations c ON c.id = m.conversation_id \
                  WHERE c.organization_id = ?1 AND c.status IN ('pending', 'active') \
                  AND m.is_incoming = 1 AND m.status = 'delivered'), \
                 (SELECT COUNT(*) FROM conversations \
                  WHERE organization_id = ?1 AND status = 'pending'), \
                 (SELECT COUNT(*) FROM conversations \
                  WHERE organization_id = ?1 AND status IN ('pending', 'active') \
                  AND priority = 'urgent'), \
                 (SELECT COUNT(*) FROM conversations \
                  WHERE organization_id = ?1 AND status IN ('pending', 'active'))",
                libsql::params![organization_id],
            )
            .await?;

        let row = rows.next().await?.ok_or_else(|| CommonError::Repository {
            msg: "inbox counts query returned no row".to_string(),
            source: None,
        })?;

        Ok(InboxCounts {
            unread: row.get::<i64>(0)?,
            pending: row.get::<i64>(1)?,
            urgent: row.get::<i64>(2)?,
            open_total: row.get::<i64>(3)?,
        })
    }
}

// --- Message Repository Implementation ---

#[async_trait]
impl MessageRepositoryLike for Repository {
    async fn create_message(&self, params: &CreateMessage) -> Result<(), CommonError> {
        trace!(message_id = %params.id, conversation_id = %params.conversation_id, "Creating message");
        self.conn
            .execute(
                "INSERT INTO channel_messages (id, conversation_id, channel, body, is_incoming, \
                 status, external_id, provider_metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                libsql::params![
                    &params.id,
                    &params.conversation_id,
                    params.channel,
                    params.body.clone(),
                    params.is_incoming as i64,
                    params.status,
                    params.external_id.clone(),
                    params.provider_metadata.clone(),
                    params.created_at,
                ],
            )
            .await?;
        trace!(message_id = %params.id, "Message created");
        Ok(())
    }

    async fn update_message_delivery(
        &self,
        params: &UpdateMessageDelivery,
    ) -> Result<(), CommonError> {
        trace!(message_id = %params.id, status = %params.status, attempts = params.attempts, "Updating message delivery");
        self.conn
            .execute(
                "UPDATE channel_messages SET status = ?2, external_id = ?3, attempts = ?4, \
                 last_error = ?5 WHERE id = ?1",
                libsql::params![
                    &params.id,
                    params.status,
                    params.external_id.clone(),
                    params.attempts,
                    params.last_error.clone(),
                ],
            )
            .await?;
        trace!(message_id = %params.id, "Message delivery updated");
        Ok(())
    }

    async fn get_message_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<ChannelMessage>, CommonError> {
        trace!(message_id = %id, "Getting message by ID");
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM channel_messages WHERE id = ?1"),
                libsql::params![id],
            )
            .await?;

        let message = match rows.next().await? {
            Some(row) => Some(message_from_row(&row)?),
            None => None,
        };
        trace!(message_id = %id, found = message.is_some(), "Got message by ID");
        Ok(message)
    }

    async fn get_message_by_external_id(
        &self,
        channel: ChannelKind,
        external_id: &str,
    ) -> Result<Option<ChannelMessage>, CommonError> {
        trace!(channel = %channel, external_id, "Getting message by external ID");
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM channel_messages \
                     WHERE channel = ?1 AND external_id = ?2"
                ),
                libsql::params![channel, external_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(message_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_messages_by_conversation(
        &self,
        conversation_id: &WrappedUuidV4,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<ChannelMessage>, CommonError> {
        trace!(conversation_id = %conversation_id, page_size = pagination.page_size, "Listing messages by conversation");
        let cursor = decode_cursor(pagination)?;

        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM channel_messages \
                     WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at > ?2) \
                     ORDER BY created_at ASC LIMIT ?3"
                ),
                libsql::params![conversation_id, cursor, pagination.page_size + 1],
            )
            .await?;

        let items = collect_rows(rows, message_from_row).await?;

        trace!(conversation_id = %conversation_id, count = items.len(), "Listed messages by conversation");
        Ok(PaginatedResponse::from_items_with_extra(
            items,
            pagination,
            |message| vec![message.created_at.get_inner().to_rfc3339()],
        ))
    }

    async fn get_latest_messages(
        &self,
        organization_id: &WrappedUuidV4,
        limit: i64,
    ) -> Result<Vec<ChannelMessage>, CommonError> {
        trace!(organization_id = %organization_id, limit, "Getting latest messages");
        let rows = self
            .conn
            .query(
                "SELECT m.id, m.conversation_id, m.channel, m.body, m.is_incoming, m.status, \
                 m.external_id, m.provider_metadata, m.attempts, m.last_error, m.created_at \
                 FROM channel_messages m \
                 JOIN conversations c ON c.id = m.conversation_id \
                 WHERE c.organization_id = ?1 \
                 ORDER BY m.created_at DESC LIMIT ?2",
                libsql::params![organization_id, limit],
            )
            .await?;

        collect_rows(rows, message_from_row).await
    }

    async fn mark_messages_read(
        &self,
        conversation_id: &WrappedUuidV4,
    ) -> Result<u64, CommonError> {
        trace!(conversation_id = %conversation_id, "Marking messages read");
        let changed = self
            .conn
            .execute(
                "UPDATE channel_messages SET status = 'read' \
                 WHERE conversation_id = ?1 AND is_incoming = 1 AND status = 'delivered'",
                libsql::params![conversation_id],
            )
            .await?;
        trace!(conversation_id = %conversation_id, changed, "Marked messages read");
        Ok(changed)
    }
}

// --- Integration Repository Implementation ---

#[async_trait]
impl IntegrationRepositoryLike for Repository {
    async fn create_integration(&self, params: &CreateIntegration) -> Result<(), CommonError> {
        trace!(integration_id = %params.id, channel = %params.channel, "Creating integration");
        self.conn
            .execute(
                "INSERT INTO channel_integrations (id, organization_id, channel, credentials, \
                 settings, is_active, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
                libsql::params![
                    &params.id,
                    &params.organization_id,
                    params.channel,
                    &params.credentials,
                    &params.settings,
                    params.created_at,
                    params.updated_at,
                ],
            )
            .await?;
        trace!(integration_id = %params.id, "Integration created");
        Ok(())
    }

    async fn update_integration(&self, params: &UpdateIntegration) -> Result<(), CommonError> {
        trace!(integration_id = %params.id, "Updating integration");
        self.conn
            .execute(
                "UPDATE channel_integrations SET credentials = ?2, settings = ?3, \
                 is_active = ?4, updated_at = ?5 WHERE id = ?1",
                libsql::params![
                    &params.id,
                    &params.credentials,
                    &params.settings,
                    params.is_active as i64,
                    params.updated_at,
                ],
            )
            .await?;
        trace!(integration_id = %params.id, "Integration updated");
        Ok(())
    }

    async fn deactivate_integration(&self, id: &WrappedUuidV4) -> Result<bool, CommonError> {
        trace!(integration_id = %id, "Deactivating integration");
        // Conditional update keeps the operation idempotent under races.
        let changed = self
            .conn
            .execute(
                "UPDATE channel_integrations SET is_active = 0, updated_at = ?2 \
                 WHERE id = ?1 AND is_active = 1",
                libsql::params![id, WrappedChronoDateTime::now()],
            )
            .await?;
        trace!(integration_id = %id, deactivated = changed > 0, "Integration deactivation done");
        Ok(changed > 0)
    }

    async fn get_integration_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<ChannelIntegration>, CommonError> {
        trace!(integration_id = %id, "Getting integration by ID");
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {INTEGRATION_COLUMNS} FROM channel_integrations WHERE id = ?1"),
                libsql::params![id],
            )
            .await?;

        let integration = match rows.next().await? {
            Some(row) => Some(integration_from_row(&row)?),
            None => None,
        };
        trace!(integration_id = %id, found = integration.is_some(), "Got integration by ID");
        Ok(integration)
    }

    async fn get_integration_for_channel(
        &self,
        organization_id: &WrappedUuidV4,
        channel: ChannelKind,
    ) -> Result<Option<ChannelIntegration>, CommonError> {
        trace!(organization_id = %organization_id, channel = %channel, "Getting integration for channel");
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {INTEGRATION_COLUMNS} FROM channel_integrations \
                     WHERE organization_id = ?1 AND channel = ?2"
                ),
                libsql::params![organization_id, channel],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(integration_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_integrations(
        &self,
        organization_id: &WrappedUuidV4,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<ChannelIntegration>, CommonError> {
        trace!(organization_id = %organization_id, page_size = pagination.page_size, "Listing integrations");
        let cursor = decode_cursor(pagination)?;

        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {INTEGRATION_COLUMNS} FROM channel_integrations \
                     WHERE organization_id = ?1 AND (?2 IS NULL OR created_at < ?2) \
                     ORDER BY created_at DESC LIMIT ?3"
                ),
                libsql::params![organization_id, cursor, pagination.page_size + 1],
            )
            .await?;

        let items = collect_rows(rows, integration_from_row).await?;

        trace!(count = items.len(), "Listed integrations");
        Ok(PaginatedResponse::from_items_with_extra(
            items,
            pagination,
            |integration| vec![integration.created_at.get_inner().to_rfc3339()],
        ))
    }

    async fn update_last_sync(
        &self,
        id: &WrappedUuidV4,
        at: &WrappedChronoDateTime,
    ) -> Result<(), CommonError> {
        trace!(integration_id = %id, "Updating last sync");
        self.conn
            .execute(
                "UPDATE channel_integrations SET last_sync_at = ?2 WHERE id = ?1",
                libsql::params![id, at],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;
        use crate::logic::conversation::Priority;
        use crate::logic::message::DeliveryStatus;
        use serde_json::json;
        use shared::primitives::WrappedJsonValue;

        async fn setup_test_db() -> (libsql::Database, Repository) {
            let (db, conn) = shared::test_utils::setup_in_memory_database(crate::MIGRATIONS)
                .await
                .unwrap();
            (db, Repository::new(conn))
        }

        fn conversation_params(
            organization_id: &WrappedUuidV4,
            customer_id: &str,
            channel: ChannelKind,
            status: ConversationStatus,
        ) -> CreateConversation {
            let now = WrappedChronoDateTime::now();
            CreateConversation {
                id: WrappedUuidV4::new(),
                organization_id: organization_id.clone(),
                customer_id: customer_id.to_string(),
                channel,
                status,
                priority: Priority::Normal,
                tags: WrappedJsonValue::new(json!([])),
                created_at: now,
                updated_at: now,
            }
        }

        fn message_params(
            conversation_id: &WrappedUuidV4,
            channel: ChannelKind,
            body: &str,
            external_id: Option<&str>,
        ) -> CreateMessage {
            CreateMessage {
                id: WrappedUuidV4::new(),
                conversation_id: conversation_id.clone(),
                channel,
                body: body.to_string(),
                is_incoming: true,
                status: DeliveryStatus::Delivered,
                external_id: external_id.map(|s| s.to_string()),
                provider_metadata: None,
                created_at: WrappedChronoDateTime::now(),
            }
        }

        #[tokio::test]
        async fn test_create_and_get_conversation() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let params = conversation_params(
                &org,
                "+15551234567",
                ChannelKind::WhatsApp,
                ConversationStatus::Pending,
            );
            repo.create_conversation(&params).await.unwrap();

            let fetched = repo.get_conversation_by_id(&params.id).await.unwrap();
            assert!(fetched.is_some());
            let fetched = fetched.unwrap();
            assert_eq!(fetched.id, params.id);
            assert_eq!(fetched.customer_id, "+15551234567");
            assert_eq!(fetched.status, ConversationStatus::Pending);
            assert!(fetched.tags.is_empty());
        }

        #[tokio::test]
        async fn test_second_open_conversation_hits_unique_index() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let first = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Sms,
                ConversationStatus::Pending,
            );
            repo.create_conversation(&first).await.unwrap();

            let second = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Sms,
                ConversationStatus::Active,
            );
            let err = repo.create_conversation(&second).await.unwrap_err();
            assert!(err.is_unique_violation());

            // A closed conversation for the same pair does not conflict.
            let third = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Sms,
                ConversationStatus::Closed,
            );
            repo.create_conversation(&third).await.unwrap();
        }

        #[tokio::test]
        async fn test_get_open_conversation_ignores_resolved() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let resolved = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Email,
                ConversationStatus::Resolved,
            );
            repo.create_conversation(&resolved).await.unwrap();

            let open = repo
                .get_open_conversation(&org, "cust-1", ChannelKind::Email)
                .await
                .unwrap();
            assert!(open.is_none());

            let active = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Email,
                ConversationStatus::Active,
            );
            repo.create_conversation(&active).await.unwrap();

            let open = repo
                .get_open_conversation(&org, "cust-1", ChannelKind::Email)
                .await
                .unwrap();
            assert_eq!(open.unwrap().id, active.id);
        }

        #[tokio::test]
        async fn test_message_external_id_dedup() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let conversation = conversation_params(
                &org,
                "cust-1",
                ChannelKind::WhatsApp,
                ConversationStatus::Pending,
            );
            repo.create_conversation(&conversation).await.unwrap();

            let first = message_params(
                &conversation.id,
                ChannelKind::WhatsApp,
                "hello",
                Some("wamid.1"),
            );
            repo.create_message(&first).await.unwrap();

            let duplicate = message_params(
                &conversation.id,
                ChannelKind::WhatsApp,
                "hello again",
                Some("wamid.1"),
            );
            let err = repo.create_message(&duplicate).await.unwrap_err();
            assert!(err.is_unique_violation());

            // Messages without an external id never collide.
            let a = message_params(&conversation.id, ChannelKind::WhatsApp, "x", None);
            let b = message_params(&conversation.id, ChannelKind::WhatsApp, "y", None);
            repo.create_message(&a).await.unwrap();
            repo.create_message(&b).await.unwrap();

            let found = repo
                .get_message_by_external_id(ChannelKind::WhatsApp, "wamid.1")
                .await
                .unwrap();
            assert_eq!(found.unwrap().id, first.id);
        }

        #[tokio::test]
        async fn test_messages_by_conversation_chronological() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let conversation = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Sms,
                ConversationStatus::Active,
            );
            repo.create_conversation(&conversation).await.unwrap();

            let base = chrono::Utc::now();
            for i in 0..4 {
                let mut params = message_params(
                    &conversation.id,
                    ChannelKind::Sms,
                    &format!("message {i}"),
                    None,
                );
                params.created_at =
                    WrappedChronoDateTime::new(base + chrono::Duration::seconds(i));
                repo.create_message(&params).await.unwrap();
            }

            let page = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    &PaginationRequest::first_page(10),
                )
                .await
                .unwrap();
            assert_eq!(page.items.len(), 4);
            assert_eq!(page.items[0].body, "message 0");
            assert_eq!(page.items[3].body, "message 3");

            // Cursor pagination continues in order.
            let first_page = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    &PaginationRequest::first_page(2),
                )
                .await
                .unwrap();
            assert_eq!(first_page.items.len(), 2);
            let token = first_page.next_page_token.unwrap();
            let second_page = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    &PaginationRequest {
                        page_size: 2,
                        next_page_token: Some(token),
                    },
                )
                .await
                .unwrap();
            assert_eq!(second_page.items[0].body, "message 2");
        }

        #[tokio::test]
        async fn test_mark_messages_read_is_idempotent() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let conversation = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Messenger,
                ConversationStatus::Active,
            );
            repo.create_conversation(&conversation).await.unwrap();

            for i in 0..3 {
                let params = message_params(
                    &conversation.id,
                    ChannelKind::Messenger,
                    &format!("m{i}"),
                    None,
                );
                repo.create_message(&params).await.unwrap();
            }

            let marked = repo.mark_messages_read(&conversation.id).await.unwrap();
            assert_eq!(marked, 3);
            let marked_again = repo.mark_messages_read(&conversation.id).await.unwrap();
            assert_eq!(marked_again, 0);
        }

        #[tokio::test]
        async fn test_inbox_counts() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();
            let other_org = WrappedUuidV4::new();

            let mut pending = conversation_params(
                &org,
                "cust-1",
                ChannelKind::WhatsApp,
                ConversationStatus::Pending,
            );
            pending.priority = Priority::Urgent;
            repo.create_conversation(&pending).await.unwrap();
            repo.create_message(&message_params(
                &pending.id,
                ChannelKind::WhatsApp,
                "help",
                None,
            ))
            .await
            .unwrap();

            let active = conversation_params(
                &org,
                "cust-2",
                ChannelKind::Email,
                ConversationStatus::Active,
            );
            repo.create_conversation(&active).await.unwrap();

            // Another organization's data never leaks into the counts.
            let foreign = conversation_params(
                &other_org,
                "cust-1",
                ChannelKind::WhatsApp,
                ConversationStatus::Pending,
            );
            repo.create_conversation(&foreign).await.unwrap();

            let counts = repo.get_inbox_counts(&org).await.unwrap();
            assert_eq!(counts.unread, 1);
            assert_eq!(counts.pending, 1);
            assert_eq!(counts.urgent, 1);
            assert_eq!(counts.open_total, 2);
        }

        #[tokio::test]
        async fn test_close_resolved_before() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();

            let conversation = conversation_params(
                &org,
                "cust-1",
                ChannelKind::Sms,
                ConversationStatus::Resolved,
            );
            repo.create_conversation(&conversation).await.unwrap();

            let long_ago = WrappedChronoDateTime::new(
                chrono::Utc::now() - chrono::Duration::days(7),
            );
            repo.update_conversation_state(&UpdateConversationState {
                id: conversation.id.clone(),
                status: ConversationStatus::Resolved,
                priority: Priority::Normal,
                assigned_agent_id: None,
                tags: WrappedJsonValue::new(json!([])),
                updated_at: long_ago,
                resolved_at: Some(long_ago),
            })
            .await
            .unwrap();

            let cutoff = WrappedChronoDateTime::new(
                chrono::Utc::now() - chrono::Duration::days(1),
            );
            let closed = repo.close_resolved_before(&cutoff).await.unwrap();
            assert_eq!(closed.len(), 1);
            assert_eq!(closed[0].status, ConversationStatus::Closed);

            // Second sweep finds nothing.
            let closed = repo.close_resolved_before(&cutoff).await.unwrap();
            assert!(closed.is_empty());
        }

        #[tokio::test]
        async fn test_integration_lifecycle() {
            let (_db, repo) = setup_test_db().await;
            let org = WrappedUuidV4::new();
            let now = WrappedChronoDateTime::now();

            let params = CreateIntegration {
                id: WrappedUuidV4::new(),
                organization_id: org.clone(),
                channel: ChannelKind::WhatsApp,
                credentials: WrappedJsonValue::new(json!({"access_token": "t", "phone_number_id": "p", "app_secret": "s"})),
                settings: WrappedJsonValue::new(json!({})),
                created_at: now,
                updated_at: now,
            };
            repo.create_integration(&params).await.unwrap();

            let fetched = repo
                .get_integration_for_channel(&org, ChannelKind::WhatsApp)
                .await
                .unwrap()
                .unwrap();
            assert!(fetched.is_active);
            assert!(fetched.last_sync_at.is_none());

            // One integration per (organization, channel).
            let duplicate = CreateIntegration {
                id: WrappedUuidV4::new(),
                ..params.clone()
            };
            let err = repo.create_integration(&duplicate).await.unwrap_err();
            assert!(err.is_unique_violation());

            let synced_at = WrappedChronoDateTime::now();
            repo.update_last_sync(&params.id, &synced_at).await.unwrap();
            let fetched = repo
                .get_integration_by_id(&params.id)
                .await
                .unwrap()
                .unwrap();
            assert!(fetched.last_sync_at.is_some());

            assert!(repo.deactivate_integration(&params.id).await.unwrap());
            assert!(!repo.deactivate_integration(&params.id).await.unwrap());
            let fetched = repo
                .get_integration_by_id(&params.id)
                .await
                .unwrap()
                .unwrap();
            assert!(!fetched.is_active);
        }
    }
}
