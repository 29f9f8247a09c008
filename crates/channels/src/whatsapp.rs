//! WhatsApp Cloud API adapter.
//!
//! Inbound webhooks arrive as `entry[].changes[].value` envelopes signed
//! with `sha256=<hex>` over the raw body. Outbound messages go through the
//! Graph API `/{phone_number_id}/messages` endpoint.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::primitives::WrappedChronoDateTime;
use tracing::debug;

use engine::logic::channel::{
    AdapterError, ChannelAdapter, ChannelKind, DeliveryReceipt, InboundEvent, MediaRef,
    OutboundMessage, RawWebhook, SendError,
};
use engine::logic::integration::ChannelIntegration;

use crate::signature::verify_meta_signature;
use crate::{check_response, credentials_for_inbound, credentials_for_outbound, http_client};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// Credentials for one WhatsApp Business phone number.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WhatsAppCredentials {
    /// Cloud API phone number id that sends and receives for this
    /// integration.
    pub phone_number_id: String,
    /// Long-lived system user access token.
    pub access_token: String,
    /// App secret used to verify webhook signatures.
    pub app_secret: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    value: WebhookValue,
}

#[derive(Debug, Deserialize)]
struct WebhookValue {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    from: String,
    id: String,
    timestamp: String,
    text: Option<MessageText>,
    image: Option<MediaPayload>,
    document: Option<MediaPayload>,
    audio: Option<MediaPayload>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    id: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub struct WhatsAppAdapter {
    client: reqwest::Client,
}

impl WhatsAppAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for WhatsAppAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn media_ref(payload: &MediaPayload) -> MediaRef {
    MediaRef {
        // Media downloads resolve through the Graph API media endpoint.
        url: format!("{GRAPH_API_BASE}/{}", payload.id),
        media_type: payload
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

fn occurred_at(timestamp: &str) -> WrappedChronoDateTime {
    timestamp
        .parse::<i64>()
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(WrappedChronoDateTime::new)
        .unwrap_or_else(WrappedChronoDateTime::now)
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    fn configuration_schema(&self) -> schemars::Schema {
        schemars::schema_for!(WhatsAppCredentials)
    }

    fn normalize_inbound(
        &self,
        integration: &ChannelIntegration,
        raw: &RawWebhook,
    ) -> Result<InboundEvent, AdapterError> {
        let credentials: WhatsAppCredentials = credentials_for_inbound(integration)?;

        let signature = raw
            .signature
            .as_deref()
            .ok_or(AdapterError::InvalidSignature)?;
        if !verify_meta_signature(&credentials.app_secret, raw.body.as_bytes(), signature) {
            return Err(AdapterError::InvalidSignature);
        }

        let envelope: WebhookEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        let message = envelope
            .entry
            .into_iter()
            .flat_map(|entry| entry.changes)
            .flat_map(|change| change.value.messages)
            .next()
            .ok_or_else(|| {
                AdapterError::Ignored("no messages in delivery, statuses only".to_string())
            })?;

        let mut media = Vec::new();
        for payload in [&message.image, &message.document, &message.audio]
            .into_iter()
            .flatten()
        {
            media.push(media_ref(payload));
        }

        let text = message
            .text
            .map(|t| t.body)
            .unwrap_or_default();

        Ok(InboundEvent {
            channel: ChannelKind::WhatsApp,
            external_customer_ref: message.from,
            text,
            media,
            external_message_id: Some(message.id),
            occurred_at: occurred_at(&message.timestamp),
        })
    }

    async fn send_outbound(
        &self,
        integration: &ChannelIntegration,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        let credentials: WhatsAppCredentials = credentials_for_outbound(integration)?;

        let url = format!(
            "{GRAPH_API_BASE}/{}/messages",
            credentials.phone_number_id
        );
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": message.recipient_ref,
            "type": "text",
            "text": { "body": message.body },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transient(e.into()))?;

        let value = check_response(response).await?;
        let parsed: SendResponse = serde_json::from_value(value)
            .map_err(|e| SendError::Transient(e.into()))?;
        let provider_message_id = parsed.messages.into_iter().next().map(|m| m.id);
        debug!(recipient = %message.recipient_ref, "whatsapp message accepted");

        Ok(DeliveryReceipt {
            provider_message_id,
        })
    }
}
