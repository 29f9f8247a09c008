//! Webhook ingestion pipeline
//!
//! One raw webhook delivery moves through: integration lookup, adapter
//! verification and normalization, then conversation ingestion. Signature
//! failures surface as authentication errors so the webhook route answers
//! 401 and the provider does not retry forever with bad credentials.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::logic::channel::{AdapterError, ChannelKind, RawWebhook};
use crate::logic::conversation::{receive_inbound, ReceiveOutcomeKind};
use crate::service::EngineService;

/// What happened to a webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum IngestOutcome {
    /// The message landed in a conversation.
    Accepted {
        conversation_id: WrappedUuidV4,
        message_id: WrappedUuidV4,
    },
    /// The provider retried a delivery we had already recorded.
    Duplicate,
    /// Valid payload with nothing to ingest (receipts, typing indicators).
    Ignored,
}

/// Ingest one raw webhook delivery for an integration.
pub async fn ingest(
    service: &EngineService,
    channel: ChannelKind,
    integration_id: WrappedUuidV4,
    raw: RawWebhook,
) -> Result<IngestOutcome, CommonError> {
    let integration = crate::logic::integration::get_integration(
        &service.repository,
        integration_id.clone(),
    )
    .await?;

    // The integration id is part of the webhook URL; a mismatch with the
    // channel segment means a misconfigured provider subscription.
    if integration.channel != channel {
        return Err(CommonError::NotFound {
            msg: format!(
                "integration {integration_id} does not serve channel {channel}"
            ),
            lookup_id: integration_id.to_string(),
            source: None,
        });
    }

    if !integration.is_active {
        return Err(CommonError::Conflict {
            msg: format!("integration {integration_id} is deactivated"),
            source: None,
        });
    }

    let adapter = service
        .adapters
        .get(channel)
        .ok_or_else(|| CommonError::InvalidRequest {
            msg: format!("no adapter registered for channel {channel}"),
            source: None,
        })?;

    let inbound = match adapter.normalize_inbound(&integration, &raw) {
        Ok(inbound) => inbound,
        Err(AdapterError::InvalidSignature) => {
            warn!(integration_id = %integration_id, channel = %channel, "webhook signature verification failed");
            return Err(CommonError::Authentication {
                msg: "webhook signature verification failed".to_string(),
                source: None,
            });
        }
        Err(AdapterError::Malformed(msg)) => {
            return Err(CommonError::InvalidRequest {
                msg: format!("malformed webhook payload: {msg}"),
                source: None,
            });
        }
        Err(AdapterError::Ignored(reason)) => {
            debug!(integration_id = %integration_id, channel = %channel, reason, "ignoring webhook payload");
            return Ok(IngestOutcome::Ignored);
        }
    };

    let outcome = receive_inbound(
        &service.repository,
        &service.event_bus,
        &service.pair_locks,
        &integration,
        inbound,
    )
    .await?;

    Ok(match outcome.kind {
        ReceiveOutcomeKind::Duplicate => IngestOutcome::Duplicate,
        _ => IngestOutcome::Accepted {
            conversation_id: outcome.conversation.id,
            message_id: outcome.message.id,
        },
    })
}
