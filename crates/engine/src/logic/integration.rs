//! Channel integration model and logic
//!
//! An integration binds an organization to one channel: credentials for the
//! provider API plus behavioral settings. Webhook ingestion and outbound
//! dispatch both resolve their integration first.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{
    PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};
use utoipa::ToSchema;

use super::channel::{AdapterRegistry, ChannelKind};
use super::conversation::Priority;
use super::event::{ConversationEvent, ConversationEventKind, EventBus};
use crate::repository::{CreateIntegration, IntegrationRepositoryLike, UpdateIntegration};

/// Default reopen window: one day.
pub const DEFAULT_REOPEN_WINDOW_SECS: u64 = 86_400;

/// Behavioral settings for one integration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct IntegrationSettings {
    /// How long after resolution an inbound message reopens the conversation
    /// instead of starting a new one.
    #[serde(default = "default_reopen_window_secs")]
    pub reopen_window_secs: u64,
    /// Priority assigned to conversations created through this integration.
    #[serde(default)]
    pub default_priority: Priority,
}

fn default_reopen_window_secs() -> u64 {
    DEFAULT_REOPEN_WINDOW_SECS
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            reopen_window_secs: DEFAULT_REOPEN_WINDOW_SECS,
            default_priority: Priority::default(),
        }
    }
}

/// An organization's connection to one channel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ChannelIntegration {
    pub id: WrappedUuidV4,
    pub organization_id: WrappedUuidV4,
    pub channel: ChannelKind,
    /// Provider credentials, opaque to the engine and interpreted by the
    /// channel adapter.
    #[schemars(with = "serde_json::Value")]
    #[schema(value_type = Object)]
    pub credentials: WrappedJsonValue,
    pub settings: IntegrationSettings,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<WrappedChronoDateTime>,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

/// Request to connect a channel for an organization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct CreateIntegrationRequest {
    pub organization_id: WrappedUuidV4,
    pub channel: ChannelKind,
    #[schemars(with = "serde_json::Value")]
    #[schema(value_type = Object)]
    pub credentials: WrappedJsonValue,
    #[serde(default)]
    pub settings: IntegrationSettings,
}

/// Request to update an existing integration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct UpdateIntegrationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    #[schema(value_type = Option<Object>)]
    pub credentials: Option<WrappedJsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<IntegrationSettings>,
    /// Reactivate an integration that was deactivated after an auth failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Response for deactivating an integration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct DeactivateIntegrationResponse {
    /// False when the integration was already inactive.
    pub deactivated: bool,
}

pub type CreateIntegrationResponse = ChannelIntegration;
pub type UpdateIntegrationResponse = ChannelIntegration;
pub type GetIntegrationResponse = ChannelIntegration;
pub type ListIntegrationsResponse = PaginatedResponse<ChannelIntegration>;

// --- Logic Functions ---

fn validate_credentials(
    adapters: &AdapterRegistry,
    channel: ChannelKind,
    credentials: &WrappedJsonValue,
) -> Result<(), CommonError> {
    let adapter = adapters
        .get(channel)
        .ok_or_else(|| CommonError::InvalidRequest {
            msg: format!("no adapter registered for channel {channel}"),
            source: None,
        })?;

    adapter
        .validate_configuration(credentials.get_inner())
        .map_err(|e| CommonError::InvalidRequest {
            msg: format!("invalid credentials for channel {channel}: {e}"),
            source: Some(e.into()),
        })
}

/// Connect a channel for an organization.
///
/// At most one integration exists per (organization, channel); a second create
/// surfaces as a conflict.
pub async fn create_integration<R: IntegrationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    adapters: &AdapterRegistry,
    request: CreateIntegrationRequest,
) -> Result<CreateIntegrationResponse, CommonError> {
    validate_credentials(adapters, request.channel, &request.credentials)?;

    let now = WrappedChronoDateTime::now();
    let integration = ChannelIntegration {
        id: WrappedUuidV4::new(),
        organization_id: request.organization_id,
        channel: request.channel,
        credentials: request.credentials,
        settings: request.settings,
        is_active: true,
        last_sync_at: None,
        created_at: now,
        updated_at: now,
    };

    let settings_json = WrappedJsonValue::new(serde_json::to_value(&integration.settings)?);
    let create_params = CreateIntegration {
        id: integration.id.clone(),
        organization_id: integration.organization_id.clone(),
        channel: integration.channel,
        credentials: integration.credentials.clone(),
        settings: settings_json,
        created_at: now,
        updated_at: now,
    };

    match repository.create_integration(&create_params).await {
        Ok(()) => {}
        Err(e) if e.is_unique_violation() => {
            return Err(CommonError::Conflict {
                msg: format!(
                    "organization {} already has a {} integration",
                    integration.organization_id, integration.channel
                ),
                source: Some(e.into()),
            });
        }
        Err(e) => return Err(e),
    }

    let _ = event_bus.publish(ConversationEvent::new(
        integration.organization_id.clone(),
        ConversationEventKind::IntegrationUpdated {
            integration_id: integration.id.clone(),
        },
    ));

    Ok(integration)
}

/// Get an integration by id.
pub async fn get_integration<R: IntegrationRepositoryLike>(
    repository: &R,
    integration_id: WrappedUuidV4,
) -> Result<GetIntegrationResponse, CommonError> {
    repository
        .get_integration_by_id(&integration_id)
        .await?
        .ok_or_else(|| CommonError::NotFound {
            msg: format!("Integration with id {integration_id} not found"),
            lookup_id: integration_id.to_string(),
            source: None,
        })
}

/// List an organization's integrations with pagination.
pub async fn list_integrations<R: IntegrationRepositoryLike>(
    repository: &R,
    organization_id: WrappedUuidV4,
    pagination: PaginationRequest,
) -> Result<ListIntegrationsResponse, CommonError> {
    repository
        .get_integrations(&organization_id, &pagination)
        .await
}

/// Update credentials, settings, or active state on an integration.
pub async fn update_integration<R: IntegrationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    adapters: &AdapterRegistry,
    integration_id: WrappedUuidV4,
    request: UpdateIntegrationRequest,
) -> Result<UpdateIntegrationResponse, CommonError> {
    let existing = get_integration(repository, integration_id.clone()).await?;

    let new_credentials = request.credentials.unwrap_or(existing.credentials);
    let new_settings = request.settings.unwrap_or(existing.settings);
    let new_is_active = request.is_active.unwrap_or(existing.is_active);

    validate_credentials(adapters, existing.channel, &new_credentials)?;

    let now = WrappedChronoDateTime::now();
    let settings_json = WrappedJsonValue::new(serde_json::to_value(&new_settings)?);
    let update_params = UpdateIntegration {
        id: integration_id.clone(),
        credentials: new_credentials.clone(),
        settings: settings_json,
        is_active: new_is_active,
        updated_at: now,
    };

    repository.update_integration(&update_params).await?;

    let updated = ChannelIntegration {
        credentials: new_credentials,
        settings: new_settings,
        is_active: new_is_active,
        updated_at: now,
        ..existing
    };

    let _ = event_bus.publish(ConversationEvent::new(
        updated.organization_id.clone(),
        ConversationEventKind::IntegrationUpdated {
            integration_id: updated.id.clone(),
        },
    ));

    Ok(updated)
}

/// Deactivate an integration so it stops accepting webhooks and sends.
///
/// Idempotent: deactivating an already-inactive integration reports
/// `deactivated: false` rather than an error.
pub async fn deactivate_integration<R: IntegrationRepositoryLike>(
    repository: &R,
    event_bus: &EventBus,
    integration_id: WrappedUuidV4,
) -> Result<DeactivateIntegrationResponse, CommonError> {
    let existing = get_integration(repository, integration_id.clone()).await?;

    let deactivated = repository.deactivate_integration(&integration_id).await?;
    if deactivated {
        let _ = event_bus.publish(ConversationEvent::new(
            existing.organization_id,
            ConversationEventKind::IntegrationUpdated {
                integration_id,
            },
        ));
    }

    Ok(DeactivateIntegrationResponse { deactivated })
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;

        #[test]
        fn test_settings_defaults() {
            let settings: IntegrationSettings = serde_json::from_str("{}").unwrap();
            assert_eq!(settings.reopen_window_secs, DEFAULT_REOPEN_WINDOW_SECS);
            assert_eq!(settings.default_priority, Priority::Normal);
        }

        #[test]
        fn test_settings_partial_override() {
            let settings: IntegrationSettings =
                serde_json::from_str("{\"reopen_window_secs\": 3600}").unwrap();
            assert_eq!(settings.reopen_window_secs, 3600);
            assert_eq!(settings.default_priority, Priority::Normal);
        }
    }
}
