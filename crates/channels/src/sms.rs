//! SMS aggregator adapter.
//!
//! The aggregator posts inbound texts as JSON signed with a plain hex HMAC
//! in `x-signature`, and accepts outbound sends against the account's
//! messages endpoint.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::primitives::WrappedChronoDateTime;
use tracing::debug;

use engine::logic::channel::{
    AdapterError, ChannelAdapter, ChannelKind, DeliveryReceipt, InboundEvent, OutboundMessage,
    RawWebhook, SendError,
};
use engine::logic::integration::ChannelIntegration;

use crate::signature::verify_hmac_sha256;
use crate::{check_response, credentials_for_inbound, credentials_for_outbound, http_client};

const SMS_API_BASE: &str = "https://api.sms-gateway.example.com/v2";

/// Credentials for one SMS aggregator account.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SmsCredentials {
    pub account_sid: String,
    /// Account auth token; also the webhook signing secret.
    pub auth_token: String,
    /// E.164 number outbound texts are sent from.
    pub from_number: String,
}

#[derive(Debug, Deserialize)]
struct InboundSms {
    message_sid: Option<String>,
    from: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    received_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    sid: Option<String>,
}

pub struct SmsAdapter {
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for SmsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn configuration_schema(&self) -> schemars::Schema {
        schemars::schema_for!(SmsCredentials)
    }

    fn normalize_inbound(
        &self,
        integration: &ChannelIntegration,
        raw: &RawWebhook,
    ) -> Result<InboundEvent, AdapterError> {
        let credentials: SmsCredentials = credentials_for_inbound(integration)?;

        let signature = raw
            .signature
            .as_deref()
            .ok_or(AdapterError::InvalidSignature)?;
        if !verify_hmac_sha256(&credentials.auth_token, raw.body.as_bytes(), signature) {
            return Err(AdapterError::InvalidSignature);
        }

        let sms: InboundSms = serde_json::from_str(&raw.body)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        if sms.body.is_empty() {
            return Err(AdapterError::Ignored("empty text body".to_string()));
        }

        let occurred_at = sms
            .received_at
            .as_deref()
            .and_then(|value| WrappedChronoDateTime::try_from(value).ok())
            .unwrap_or_else(WrappedChronoDateTime::now);

        Ok(InboundEvent {
            channel: ChannelKind::Sms,
            external_customer_ref: sms.from,
            text: sms.body,
            media: vec![],
            external_message_id: sms.message_sid,
            occurred_at,
        })
    }

    async fn send_outbound(
        &self,
        integration: &ChannelIntegration,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        let credentials: SmsCredentials = credentials_for_outbound(integration)?;

        let url = format!(
            "{SMS_API_BASE}/accounts/{}/messages",
            credentials.account_sid
        );
        let body = serde_json::json!({
            "from": credentials.from_number,
            "to": message.recipient_ref,
            "body": message.body,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transient(e.into()))?;

        let value = check_response(response).await?;
        let parsed: SendResponse = serde_json::from_value(value)
            .map_err(|e| SendError::Transient(e.into()))?;
        debug!(recipient = %message.recipient_ref, "sms accepted by aggregator");

        Ok(DeliveryReceipt {
            provider_message_id: parsed.sid,
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
                channel: ChannelKind::Sms,
                credentials: WrappedJsonValue::new(serde_json::json!({
                    "account_sid": "AC123",
                    "auth_token": "sms-secret",
                    "from_number": "+15550009999",
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
                signature: Some(sign_hmac_sha256("sms-secret", body.as_bytes())),
                body: body.to_string(),
            }
        }

        #[test]
        fn test_normalize_inbound_text() {
            let body = r#"{
                "message_sid": "SM-abc",
                "from": "+15550001234",
                "to": "+15550009999",
                "body": "stop by tomorrow?",
                "received_at": "2026-08-28T09:30:00Z"
            }"#;
            let adapter = SmsAdapter::new();
            let event = adapter
                .normalize_inbound(&integration(), &signed(body))
                .unwrap();
            assert_eq!(event.external_customer_ref, "+15550001234");
            assert_eq!(event.text, "stop by tomorrow?");
            assert_eq!(event.external_message_id.as_deref(), Some("SM-abc"));
        }

        #[test]
        fn test_empty_body_is_ignored() {
            let body = r#"{"message_sid": "SM-x", "from": "+15550001234", "body": ""}"#;
            let adapter = SmsAdapter::new();
            let err = adapter
                .normalize_inbound(&integration(), &signed(body))
                .unwrap_err();
            assert!(matches!(err, AdapterError::Ignored(_)));
        }

        #[test]
        fn test_bad_signature_is_rejected() {
            let adapter = SmsAdapter::new();
            let raw = RawWebhook {
                signature: Some("ff00".to_string()),
                body: r#"{"from":"+1","body":"hi"}"#.to_string(),
            };
            let err = adapter.normalize_inbound(&integration(), &raw).unwrap_err();
            assert!(matches!(err, AdapterError::InvalidSignature));
        }
    }
}
