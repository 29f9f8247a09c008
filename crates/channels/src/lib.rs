//! Concrete channel adapters for the conversation engine.
//!
//! One adapter per provider: WhatsApp Cloud API, Facebook Messenger,
//! Instagram messaging, an inbound-parse email relay, and a JSON SMS
//! aggregator. Adapters verify webhook signatures over the raw request
//! body, normalize provider payloads into [`engine::logic::channel::InboundEvent`],
//! and deliver outbound messages over the provider HTTP API.

use std::sync::Arc;
use std::time::Duration;

use engine::logic::channel::{AdapterError, AdapterRegistry, SendError};
use engine::logic::integration::ChannelIntegration;

pub mod email;
pub mod instagram;
pub mod messenger;
pub mod signature;
pub mod sms;
pub mod whatsapp;

pub use email::EmailAdapter;
pub use instagram::InstagramAdapter;
pub use messenger::MessengerAdapter;
pub use sms::SmsAdapter;
pub use whatsapp::WhatsAppAdapter;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Register every adapter this crate ships.
pub fn register_defaults(registry: &AdapterRegistry) {
    registry.register(Arc::new(WhatsAppAdapter::new()));
    registry.register(Arc::new(MessengerAdapter::new()));
    registry.register(Arc::new(InstagramAdapter::new()));
    registry.register(Arc::new(EmailAdapter::new()));
    registry.register(Arc::new(SmsAdapter::new()));
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Deserialize an integration's credential blob into an adapter's
/// credential type.
pub(crate) fn parse_credentials<T: serde::de::DeserializeOwned>(
    integration: &ChannelIntegration,
) -> Result<T, String> {
    serde_json::from_value(integration.credentials.get_inner().clone())
        .map_err(|e| format!("invalid credentials: {e}"))
}

pub(crate) fn credentials_for_inbound<T: serde::de::DeserializeOwned>(
    integration: &ChannelIntegration,
) -> Result<T, AdapterError> {
    parse_credentials(integration).map_err(AdapterError::Malformed)
}

pub(crate) fn credentials_for_outbound<T: serde::de::DeserializeOwned>(
    integration: &ChannelIntegration,
) -> Result<T, SendError> {
    parse_credentials(integration).map_err(SendError::Permanent)
}

pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a provider error response onto the dispatcher's failure classes.
pub(crate) fn classify_error_status(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> SendError {
    use reqwest::StatusCode;

    if status == StatusCode::TOO_MANY_REQUESTS {
        SendError::RateLimited { retry_after }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        SendError::AuthExpired
    } else if status.is_client_error() {
        SendError::Permanent(format!("provider returned {status}: {body}"))
    } else {
        SendError::Transient(anyhow::anyhow!("provider returned {status}: {body}"))
    }
}

/// Resolve a provider response into its JSON body or a classified failure.
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<serde_json::Value, SendError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| SendError::Transient(e.into()));
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_error_status(status, retry_after, body))
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;
        use reqwest::StatusCode;

        #[test]
        fn test_rate_limit_maps_to_retryable() {
            let err = classify_error_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(7)),
                String::new(),
            );
            match err {
                SendError::RateLimited { retry_after } => {
                    assert_eq!(retry_after, Some(Duration::from_secs(7)));
                }
                other => panic!("expected rate limited, got {other:?}"),
            }
        }

        #[test]
        fn test_auth_statuses_map_to_auth_expired() {
            for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
                assert!(matches!(
                    classify_error_status(status, None, String::new()),
                    SendError::AuthExpired
                ));
            }
        }

        #[test]
        fn test_other_client_errors_are_permanent() {
            assert!(matches!(
                classify_error_status(StatusCode::BAD_REQUEST, None, "bad recipient".to_string()),
                SendError::Permanent(_)
            ));
        }

        #[test]
        fn test_server_errors_are_transient() {
            let err = classify_error_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                String::new(),
            );
            assert!(err.is_retryable());
        }

        #[test]
        fn test_retry_after_header_parsing() {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
            assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));

            headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
            assert_eq!(retry_after(&headers), None);
        }
    }
}
