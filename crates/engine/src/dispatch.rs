//! Outbound dispatch with bounded retry
//!
//! Replies persist as `queued` before the first provider attempt, so a crash
//! mid-send never loses an operator's message. Each attempt's count and last
//! error persist with the message; the caller always gets the message back
//! with its final delivery status rather than an opaque failure.

use std::time::Duration;

use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use tracing::{debug, warn};

use crate::logic::channel::{OutboundMessage, SendError};
use crate::logic::conversation::{Conversation, ConversationStatus};
use crate::logic::event::{ConversationEvent, ConversationEventKind, EventBus};
use crate::logic::integration::ChannelIntegration;
use crate::logic::message::{ChannelMessage, DeliveryStatus, SendMessageRequest};
use crate::repository::{
    CreateMessage, IntegrationRepositoryLike, MessageRepositoryLike, UpdateMessageDelivery,
};
use crate::service::EngineService;

/// Backoff budget for one outbound message.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt. `attempt` is the 1-based attempt that
    /// just failed. A provider-supplied Retry-After wins over the computed
    /// backoff; both are capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after.min(self.max_delay);
        }
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1 << exp);
        backoff.min(self.max_delay)
    }
}

/// Send an operator reply through the conversation's owning channel.
///
/// The returned message carries the final delivery status: `sent` on
/// success, `failed` when the retry budget is exhausted or the failure is
/// permanent. Delivery failure is state, not an error.
pub async fn send(
    service: &EngineService,
    conversation_id: WrappedUuidV4,
    request: SendMessageRequest,
) -> Result<ChannelMessage, CommonError> {
    let conversation =
        crate::logic::conversation::get_conversation(&service.repository, conversation_id).await?;

    if conversation.status == ConversationStatus::Closed {
        return Err(CommonError::InvalidRequest {
            msg: format!("conversation {} is closed", conversation.id),
            source: None,
        });
    }

    let integration = service
        .repository
        .get_integration_for_channel(&conversation.organization_id, conversation.channel)
        .await?
        .ok_or_else(|| CommonError::NotFound {
            msg: format!(
                "no {} integration for organization {}",
                conversation.channel, conversation.organization_id
            ),
            lookup_id: conversation.organization_id.to_string(),
            source: None,
        })?;

    if !integration.is_active {
        return Err(CommonError::Conflict {
            msg: format!("integration {} is deactivated", integration.id),
            source: None,
        });
    }

    let adapter = service
        .adapters
        .get(conversation.channel)
        .ok_or_else(|| CommonError::InvalidRequest {
            msg: format!("no adapter registered for channel {}", conversation.channel),
            source: None,
        })?;

    // Persist before the first attempt so the reply survives a crash.
    let mut message = ChannelMessage {
        id: WrappedUuidV4::new(),
        conversation_id: conversation.id.clone(),
        channel: conversation.channel,
        body: request.body,
        is_incoming: false,
        status: DeliveryStatus::Queued,
        external_id: None,
        provider_metadata: None,
        attempts: 0,
        last_error: None,
        created_at: WrappedChronoDateTime::now(),
    };
    service
        .repository
        .create_message(&CreateMessage {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            channel: message.channel,
            body: message.body.clone(),
            is_incoming: false,
            status: message.status,
            external_id: None,
            provider_metadata: None,
            created_at: message.created_at,
        })
        .await?;
    let _ = service.event_bus.publish(ConversationEvent::new(
        conversation.organization_id.clone(),
        ConversationEventKind::MessageCreated {
            message: message.clone(),
        },
    ));

    let outbound = OutboundMessage {
        conversation_id: conversation.id.clone(),
        channel: conversation.channel,
        recipient_ref: conversation.customer_id.clone(),
        body: message.body.clone(),
    };

    let policy = service.retry_policy;
    loop {
        message.attempts += 1;
        let attempt = message.attempts as u32;

        match adapter.send_outbound(&integration, &outbound).await {
            Ok(receipt) => {
                message.status = DeliveryStatus::Sent;
                message.external_id = receipt.provider_message_id;
                message.last_error = None;
                persist_delivery(service, &message).await?;
                service
                    .repository
                    .update_last_sync(&integration.id, &WrappedChronoDateTime::now())
                    .await?;
                activate_if_pending(service, &conversation).await?;
                publish_message_updated(&service.event_bus, &conversation, &message);
                return Ok(message);
            }
            Err(SendError::AuthExpired) => {
                warn!(integration_id = %integration.id, "provider rejected credentials, deactivating integration");
                message.status = DeliveryStatus::Failed;
                message.last_error = Some("integration credentials expired".to_string());
                persist_delivery(service, &message).await?;
                deactivate_for_auth_failure(service, &integration).await?;
                publish_message_updated(&service.event_bus, &conversation, &message);
                return Ok(message);
            }
            Err(SendError::Permanent(reason)) => {
                message.status = DeliveryStatus::Failed;
                message.last_error = Some(reason);
                persist_delivery(service, &message).await?;
                publish_message_updated(&service.event_bus, &conversation, &message);
                return Ok(message);
            }
            Err(e @ (SendError::RateLimited { .. } | SendError::Transient(_))) => {
                let retry_after = match &e {
                    SendError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                message.last_error = Some(e.to_string());

                if attempt >= policy.max_attempts {
                    message.status = DeliveryStatus::Failed;
                    persist_delivery(service, &message).await?;
                    publish_message_updated(&service.event_bus, &conversation, &message);
                    return Ok(message);
                }

                persist_delivery(service, &message).await?;
                let delay = policy.delay_for(attempt, retry_after);
                debug!(
                    message_id = %message.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "delivery attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn persist_delivery(
    service: &EngineService,
    message: &ChannelMessage,
) -> Result<(), CommonError> {
    service
        .repository
        .update_message_delivery(&UpdateMessageDelivery {
            id: message.id.clone(),
            status: message.status,
            external_id: message.external_id.clone(),
            attempts: message.attempts,
            last_error: message.last_error.clone(),
        })
        .await
}

/// The first successful operator reply activates a pending conversation.
async fn activate_if_pending(
    service: &EngineService,
    conversation: &Conversation,
) -> Result<(), CommonError> {
    if conversation.status != ConversationStatus::Pending {
        return Ok(());
    }
    crate::logic::conversation::activate_conversation(
        &service.repository,
        &service.event_bus,
        conversation.id.clone(),
    )
    .await?;
    Ok(())
}

async fn deactivate_for_auth_failure(
    service: &EngineService,
    integration: &ChannelIntegration,
) -> Result<(), CommonError> {
    let deactivated = service
        .repository
        .deactivate_integration(&integration.id)
        .await?;
    if deactivated {
        let _ = service.event_bus.publish(ConversationEvent::new(
            integration.organization_id.clone(),
            ConversationEventKind::IntegrationAuthExpired {
                integration_id: integration.id.clone(),
                channel: integration.channel,
            },
        ));
    }
    Ok(())
}

fn publish_message_updated(
    event_bus: &EventBus,
    conversation: &Conversation,
    message: &ChannelMessage,
) {
    let _ = event_bus.publish(ConversationEvent::new(
        conversation.organization_id.clone(),
        ConversationEventKind::MessageUpdated {
            message: message.clone(),
        },
    ));
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;

        #[test]
        fn test_backoff_doubles_and_caps() {
            let policy = RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(2),
            };
            assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
            assert_eq!(policy.delay_for(2, None), Duration::from_secs(1));
            assert_eq!(policy.delay_for(3, None), Duration::from_secs(2));
            assert_eq!(policy.delay_for(10, None), Duration::from_secs(2));
        }

        #[test]
        fn test_retry_after_wins_but_is_capped() {
            let policy = RetryPolicy::default();
            assert_eq!(
                policy.delay_for(1, Some(Duration::from_secs(5))),
                Duration::from_secs(5)
            );
            assert_eq!(
                policy.delay_for(1, Some(Duration::from_secs(600))),
                policy.max_delay
            );
        }
    }
}
