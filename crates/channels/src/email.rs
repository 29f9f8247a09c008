//! Email relay adapter.
//!
//! Inbound mail arrives through an inbound-parse relay that posts the parsed
//! message as JSON, signed with a plain hex HMAC in `x-signature`. Outbound
//! mail goes back out through the relay's send API.

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

use crate::signature::verify_hmac_sha256;
use crate::{check_response, credentials_for_inbound, credentials_for_outbound, http_client};

const RELAY_API_BASE: &str = "https://api.mailrelay.example.com/v1";

/// Credentials for one email relay mailbox.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EmailCredentials {
    /// Relay API key for outbound sends.
    pub api_key: String,
    /// Address outbound mail is sent from.
    pub from_address: String,
    /// Shared secret the relay signs inbound webhooks with.
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize)]
struct InboundMail {
    /// RFC 5322 Message-ID of the inbound mail.
    message_id: Option<String>,
    from: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<MailAttachment>,
    #[serde(default)]
    received_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MailAttachment {
    url: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

pub struct EmailAdapter {
    client: reqwest::Client,
}

impl EmailAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for EmailAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold the subject into the body so operators see it without a dedicated
/// subject field.
fn body_text(subject: Option<&str>, text: &str) -> String {
    match subject {
        Some(subject) if !subject.is_empty() => format!("{subject}\n\n{text}"),
        _ => text.to_string(),
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn configuration_schema(&self) -> schemars::Schema {
        schemars::schema_for!(EmailCredentials)
    }

    fn normalize_inbound(
        &self,
        integration: &ChannelIntegration,
        raw: &RawWebhook,
    ) -> Result<InboundEvent, AdapterError> {
        let credentials: EmailCredentials = credentials_for_inbound(integration)?;

        let signature = raw
            .signature
            .as_deref()
            .ok_or(AdapterError::InvalidSignature)?;
        if !verify_hmac_sha256(&credentials.webhook_secret, raw.body.as_bytes(), signature) {
            return Err(AdapterError::InvalidSignature);
        }

        let mail: InboundMail = serde_json::from_str(&raw.body)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        let media = mail
            .attachments
            .into_iter()
            .map(|attachment| MediaRef {
                url: attachment.url,
                media_type: attachment
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            })
            .collect();

        let occurred_at = mail
            .received_at
            .as_deref()
            .and_then(|value| WrappedChronoDateTime::try_from(value).ok())
            .unwrap_or_else(WrappedChronoDateTime::now);

        Ok(InboundEvent {
            channel: ChannelKind::Email,
            external_customer_ref: mail.from,
            text: body_text(mail.subject.as_deref(), &mail.text),
            media,
            external_message_id: mail.message_id,
            occurred_at,
        })
    }

    async fn send_outbound(
        &self,
        integration: &ChannelIntegration,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        let credentials: EmailCredentials = credentials_for_outbound(integration)?;

        let url = format!("{RELAY_API_BASE}/messages");
        let body = serde_json::json!({
            "from": credentials.from_address,
            "to": message.recipient_ref,
            "text": message.body,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transient(e.into()))?;

        let value = check_response(response).await?;
        let parsed: SendResponse = serde_json::from_value(value)
            .map_err(|e| SendError::Transient(e.into()))?;
        debug!(recipient = %message.recipient_ref, "email accepted by relay");

        Ok(DeliveryReceipt {
            provider_message_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;
        use crate::signature::sign_hmac_sha256;
        use shared::primitives::{WrappedJsonValue, WrappedUuidV4};

        fn integration() -> ChannelIntegration {
            let now = WrappedChronoDateTime::now();
            ChannelIntegration {
                id: WrappedUuidV4::new(),
                organization_id: WrappedUuidV4::new(),
                channel: ChannelKind::Email,
                credentials: WrappedJsonValue::new(serde_json::json!({
                    "api_key": "key",
                    "from_address": "support@acme.example.com",
                    "webhook_secret": "mail-secret",
                })),
                settings: Default::default(),
                is_active: true,
                last_sync_at: None,
                created_at: now,
                updated_at: now,
            }
        }

        fn signed(body: &str) -> RawWebhook {
            RawWebhook {
                signature: Some(sign_hmac_sha256("mail-secret", body.as_bytes())),
                body: body.to_string(),
            }
        }

        #[test]
        fn test_subject_folds_into_body() {
            let body = r#"{
                "message_id": "<abc@mail.example.com>",
                "from": "customer@example.com",
                "subject": "Order #42 missing",
                "text": "It never arrived.",
                "received_at": "2026-08-28T16:00:00Z"
            }"#;
            let adapter = EmailAdapter::new();
            let event = adapter
                .normalize_inbound(&integration(), &signed(body))
                .unwrap();
            assert_eq!(event.external_customer_ref, "customer@example.com");
            assert_eq!(event.text, "Order #42 missing\n\nIt never arrived.");
            assert_eq!(
                event.external_message_id.as_deref(),
                Some("<abc@mail.example.com>")
            );
        }

        #[test]
        fn test_attachments_become_media_refs() {
            let body = r#"{
                "from": "customer@example.com",
                "text": "see attached",
                "attachments": [{"url": "https://relay.example/att/1", "content_type": "application/pdf"}]
            }"#;
            let adapter = EmailAdapter::new();
            let event = adapter
                .normalize_inbound(&integration(), &signed(body))
                .unwrap();
            assert_eq!(event.media.len(), 1);
            assert_eq!(event.media[0].media_type, "application/pdf");
        }

        #[test]
        fn test_bad_signature_is_rejected() {
            let adapter = EmailAdapter::new();
            let raw = RawWebhook {
                signature: Some("deadbeef".to_string()),
                body: r#"{"from":"x@y.z","text":"hi"}"#.to_string(),
            };
            let err = adapter.normalize_inbound(&integration(), &raw).unwrap_err();
            assert!(matches!(err, AdapterError::InvalidSignature));
        }

        #[test]
        fn test_configuration_requires_all_fields() {
            let adapter = EmailAdapter::new();
            assert!(adapter
                .validate_configuration(&serde_json::json!({
                    "api_key": "k",
                    "from_address": "a@b.c",
                    "webhook_secret": "s",
                }))
                .is_ok());
            assert!(adapter
                .validate_configuration(&serde_json::json!({"api_key": "k"}))
                .is_err());
        }
    }
}
