//! Channel model and adapter trait
//!
//! A channel is an external messaging surface (WhatsApp, Messenger, Instagram
//! DMs, email, SMS). Adapters translate between a provider's wire payloads and
//! the engine's generic inbound/outbound types; everything downstream of the
//! adapter is channel-agnostic.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use thiserror::Error;
use utoipa::ToSchema;

use super::integration::ChannelIntegration;

/// The messaging surfaces the engine can ingest from and deliver to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    WhatsApp,
    Messenger,
    Instagram,
    Email,
    Sms,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Messenger => "messenger",
            ChannelKind::Instagram => "instagram",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
        }
    }

    pub fn all() -> &'static [ChannelKind] {
        &[
            ChannelKind::WhatsApp,
            ChannelKind::Messenger,
            ChannelKind::Instagram,
            ChannelKind::Email,
            ChannelKind::Sms,
        ]
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(ChannelKind::WhatsApp),
            "messenger" => Ok(ChannelKind::Messenger),
            "instagram" => Ok(ChannelKind::Instagram),
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            other => Err(anyhow::anyhow!("unknown channel: {other}")),
        }
    }
}

impl From<ChannelKind> for libsql::Value {
    fn from(val: ChannelKind) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

impl From<&ChannelKind> for libsql::Value {
    fn from(val: &ChannelKind) -> Self {
        libsql::Value::Text(val.as_str().to_string())
    }
}

/// A media attachment reference carried alongside message text.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct MediaRef {
    pub url: String,
    /// MIME type as reported by the provider, e.g. `image/jpeg`.
    pub media_type: String,
}

/// A channel-agnostic inbound message produced by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct InboundEvent {
    pub channel: ChannelKind,
    /// Provider-scoped customer identifier (phone number, page-scoped id,
    /// email address).
    pub external_customer_ref: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
    /// Provider message id used for webhook deduplication, when the provider
    /// supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
    pub occurred_at: WrappedChronoDateTime,
}

/// An outbound message handed to an adapter for delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub conversation_id: WrappedUuidV4,
    pub channel: ChannelKind,
    /// The customer's provider-scoped identifier.
    pub recipient_ref: String,
    pub body: String,
}

/// Provider acknowledgement for a delivered outbound message.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

/// A raw webhook delivery before any channel-specific parsing.
#[derive(Debug, Clone)]
pub struct RawWebhook {
    /// Provider signature header, when the channel signs deliveries.
    pub signature: Option<String>,
    pub body: String,
}

/// Failures normalizing an inbound webhook payload.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("webhook signature verification failed")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    /// The payload is valid but carries nothing the engine ingests, such as
    /// delivery receipts or typing indicators.
    #[error("payload ignored: {0}")]
    Ignored(String),
}

/// Failures delivering an outbound message, classified so the dispatcher can
/// decide between retrying, failing fast, and deactivating the integration.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    #[error("integration credentials expired or revoked")]
    AuthExpired,
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
    #[error("transient delivery failure")]
    Transient(#[source] anyhow::Error),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SendError::RateLimited { .. } | SendError::Transient(_)
        )
    }
}

/// Translates between one provider's wire format and the engine's model.
///
/// `normalize_inbound` is synchronous and pure so it can be unit tested
/// against captured payloads without a network.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter serves.
    fn channel(&self) -> ChannelKind;

    /// JSON schema describing the credential object this adapter expects.
    fn configuration_schema(&self) -> schemars::Schema;

    /// Validate integration credentials before they are persisted.
    fn validate_configuration(&self, credentials: &serde_json::Value) -> Result<(), AdapterError> {
        let schema = self.configuration_schema();
        let schema_value = serde_json::to_value(&schema)
            .map_err(|e| AdapterError::Malformed(format!("invalid configuration schema: {e}")))?;
        let required = schema_value
            .get("required")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if credentials.get(key).is_none() {
                return Err(AdapterError::Malformed(format!(
                    "missing required credential field: {key}"
                )));
            }
        }
        Ok(())
    }

    /// Verify and parse a raw webhook delivery into a generic inbound event.
    fn normalize_inbound(
        &self,
        integration: &ChannelIntegration,
        raw: &RawWebhook,
    ) -> Result<InboundEvent, AdapterError>;

    /// Deliver an outbound message through the provider.
    async fn send_outbound(
        &self,
        integration: &ChannelIntegration,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, SendError>;
}

/// Registry of channel adapters, built once at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
        }
    }

    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    pub fn get(&self, channel: ChannelKind) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).map(|entry| entry.clone())
    }

    pub fn registered_channels(&self) -> Vec<ChannelKind> {
        self.adapters.iter().map(|entry| *entry.key()).collect()
    }
}
