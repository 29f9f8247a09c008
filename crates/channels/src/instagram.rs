//! Instagram messaging adapter.
//!
//! Instagram DMs ride the same webhook platform as Messenger: signed
//! `entry[].messaging[]` envelopes keyed by the customer's Instagram-scoped
//! id, delivered against the connected professional account.

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

/// Credentials for one Instagram professional account.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InstagramCredentials {
    /// Instagram professional account id.
    pub instagram_account_id: String,
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
    messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
struct MessagingEvent {
    sender: Participant,
    timestamp: Option<i64>,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct Participant {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    mid: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    is_echo: bool,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(rename = "type")]
    kind: String,
    payload: AttachmentPayload,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
}

pub struct InstagramAdapter {
    client: reqwest::Client,
}

impl InstagramAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for InstagramAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for InstagramAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Instagram
    }

    fn configuration_schema(&self) -> schemars::Schema {
        schemars::schema_for!(InstagramCredentials)
    }

    fn normalize_inbound(
        &self,
        integration: &ChannelIntegration,
        raw: &RawWebhook,
    ) -> Result<InboundEvent, AdapterError> {
        let credentials: InstagramCredentials = credentials_for_inbound(integration)?;

        let signature = raw
            .signature
            .as_deref()
            .ok_or(AdapterError::InvalidSignature)?;
        if !verify_meta_signature(&credentials.app_secret, raw.body.as_bytes(), signature) {
            return Err(AdapterError::InvalidSignature);
        }

        let envelope: WebhookEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        let event = envelope
            .entry
            .into_iter()
            .flat_map(|entry| entry.messaging)
            .next()
            .ok_or_else(|| AdapterError::Ignored("no messaging events".to_string()))?;

        let message = event
            .message
            .ok_or_else(|| AdapterError::Ignored("reaction or seen event".to_string()))?;
        if message.is_echo {
            return Err(AdapterError::Ignored("echo of our own send".to_string()));
        }

        let media = message
            .attachments
            .into_iter()
            .filter_map(|attachment| {
                attachment.payload.url.map(|url| MediaRef {
                    url,
                    media_type: attachment.kind,
                })
            })
            .collect();

        Ok(InboundEvent {
            channel: ChannelKind::Instagram,
            external_customer_ref: event.sender.id,
            text: message.text.unwrap_or_default(),
            media,
            external_message_id: Some(message.mid),
            occurred_at: event
                .timestamp
                .and_then(chrono::DateTime::from_timestamp_millis)
                .map(WrappedChronoDateTime::new)
                .unwrap_or_else(WrappedChronoDateTime::now),
        })
    }

    async fn send_outbound(
        &self,
        integration: &ChannelIntegration,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        let credentials: InstagramCredentials = credentials_for_outbound(integration)?;

        let url = format!(
            "{GRAPH_API_BASE}/{}/messages",
            credentials.instagram_account_id
        );
        let body = serde_json::json!({
            "recipient": { "id": message.recipient_ref },
            "message": { "text": message.body },
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
        debug!(recipient = %message.recipient_ref, "instagram message accepted");

        Ok(DeliveryReceipt {
            provider_message_id: parsed.message_id,
        })
    }
}
