//! End-to-end flows through the conversation engine over an in-memory
//! database, using a scripted channel adapter in place of a real provider.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use tokio::sync::Mutex;

use engine::dispatch::{self, RetryPolicy};
use engine::gateway::{self, IngestOutcome};
use engine::logic::channel::{
    AdapterError, AdapterRegistry, ChannelAdapter, ChannelKind, DeliveryReceipt, InboundEvent,
    OutboundMessage, RawWebhook, SendError,
};
use engine::logic::conversation::{
    self, AddTagsRequest, AssignConversationRequest, ConversationStatus, Priority,
    ReceiveOutcomeKind, SetPriorityRequest,
};
use engine::logic::event::{ConversationEventKind, EventBus, Scope};
use engine::logic::inbox;
use engine::logic::integration::{
    self, ChannelIntegration, CreateIntegrationRequest, IntegrationSettings,
};
use engine::logic::message::{self, DeliveryStatus, SendMessageRequest};
use engine::repository::{IntegrationRepositoryLike, Repository};
use engine::service::{EngineService, EngineServiceParams};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ScriptedCredentials {
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct ScriptedPayload {
    from: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// Adapter whose outbound behavior is scripted per test.
struct ScriptedAdapter {
    channel: ChannelKind,
    outcomes: Mutex<VecDeque<Result<DeliveryReceipt, SendError>>>,
}

impl ScriptedAdapter {
    fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    async fn script(&self, outcomes: Vec<Result<DeliveryReceipt, SendError>>) {
        let mut queue = self.outcomes.lock().await;
        queue.clear();
        queue.extend(outcomes);
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn configuration_schema(&self) -> schemars::Schema {
        schemars::schema_for!(ScriptedCredentials)
    }

    fn normalize_inbound(
        &self,
        _integration: &ChannelIntegration,
        raw: &RawWebhook,
    ) -> Result<InboundEvent, AdapterError> {
        if raw.signature.as_deref() != Some("valid") {
            return Err(AdapterError::InvalidSignature);
        }
        let payload: ScriptedPayload = serde_json::from_str(&raw.body)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;
        if payload.kind.as_deref() == Some("receipt") {
            return Err(AdapterError::Ignored("delivery receipt".to_string()));
        }
        Ok(InboundEvent {
            channel: self.channel,
            external_customer_ref: payload.from,
            text: payload.text,
            media: vec![],
            external_message_id: payload.message_id,
            occurred_at: WrappedChronoDateTime::now(),
        })
    }

    async fn send_outbound(
        &self,
        _integration: &ChannelIntegration,
        _message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        self.outcomes.lock().await.pop_front().unwrap_or(Ok(DeliveryReceipt {
            provider_message_id: Some("provider-msg-1".to_string()),
        }))
    }
}

async fn setup() -> (libsql::Database, EngineService, Arc<ScriptedAdapter>) {
    let (db, conn) = shared::test_utils::setup_in_memory_database(engine::MIGRATIONS)
        .await
        .unwrap();
    let repository = Repository::new(conn);

    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::WhatsApp));
    let registry = AdapterRegistry::new();
    registry.register(adapter.clone());

    let service = EngineService::new(EngineServiceParams {
        repository,
        event_bus: EventBus::default(),
        adapters: Arc::new(registry),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    });

    (db, service, adapter)
}

async fn connect_channel(
    service: &EngineService,
    organization_id: &WrappedUuidV4,
    settings: IntegrationSettings,
) -> ChannelIntegration {
    integration::create_integration(
        &service.repository,
        &service.event_bus,
        &service.adapters,
        CreateIntegrationRequest {
            organization_id: organization_id.clone(),
            channel: ChannelKind::WhatsApp,
            credentials: WrappedJsonValue::new(serde_json::json!({"api_token": "tok"})),
            settings,
        },
    )
    .await
    .unwrap()
}

fn inbound(customer: &str, text: &str, message_id: Option<&str>) -> InboundEvent {
    InboundEvent {
        channel: ChannelKind::WhatsApp,
        external_customer_ref: customer.to_string(),
        text: text.to_string(),
        media: vec![],
        external_message_id: message_id.map(|s| s.to_string()),
        occurred_at: WrappedChronoDateTime::now(),
    }
}

async fn receive(
    service: &EngineService,
    integration: &ChannelIntegration,
    event: InboundEvent,
) -> conversation::ReceiveOutcome {
    conversation::receive_inbound(
        &service.repository,
        &service.event_bus,
        &service.pair_locks,
        integration,
        event,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_first_inbound_creates_pending_conversation() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let outcome = receive(&service, &integration, inbound("+15550001111", "hi", Some("m-1"))).await;

    assert_eq!(outcome.kind, ReceiveOutcomeKind::Created);
    assert_eq!(outcome.conversation.status, ConversationStatus::Pending);
    assert_eq!(outcome.conversation.priority, Priority::Normal);
    assert_eq!(outcome.conversation.customer_id, "+15550001111");
    assert!(outcome.message.is_incoming);
    assert_eq!(outcome.message.status, DeliveryStatus::Delivered);
    assert_eq!(outcome.message.external_id.as_deref(), Some("m-1"));

    // A second message from the same customer appends rather than forking.
    let outcome =
        receive(&service, &integration, inbound("+15550001111", "again", Some("m-2"))).await;
    assert_eq!(outcome.kind, ReceiveOutcomeKind::Appended);

    let messages = message::list_conversation_messages(
        &service.repository,
        outcome.conversation.id.clone(),
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(messages.items.len(), 2);
    assert_eq!(messages.items[0].body, "hi");
    assert_eq!(messages.items[1].body, "again");
}

#[tokio::test]
async fn test_duplicate_webhook_delivery_is_idempotent() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let first = receive(&service, &integration, inbound("cust-1", "hello", Some("dup-1"))).await;
    let second = receive(&service, &integration, inbound("cust-1", "hello", Some("dup-1"))).await;

    assert_eq!(second.kind, ReceiveOutcomeKind::Duplicate);
    assert_eq!(second.message.id, first.message.id);

    let messages = message::list_conversation_messages(
        &service.repository,
        first.conversation.id.clone(),
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(messages.items.len(), 1);
}

#[tokio::test]
async fn test_resolved_conversation_reopens_within_window() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let created = receive(&service, &integration, inbound("cust-2", "help", None)).await;
    conversation::resolve_conversation(
        &service.repository,
        &service.event_bus,
        created.conversation.id.clone(),
    )
    .await
    .unwrap();

    let outcome = receive(&service, &integration, inbound("cust-2", "one more thing", None)).await;
    assert_eq!(outcome.kind, ReceiveOutcomeKind::Reopened);
    assert_eq!(outcome.conversation.id, created.conversation.id);
    assert_eq!(outcome.conversation.status, ConversationStatus::Active);
    assert!(outcome.conversation.resolved_at.is_none());
}

#[tokio::test]
async fn test_inbound_after_window_starts_fresh_conversation() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    // A zero-length window means a resolved conversation never reopens.
    let integration = connect_channel(
        &service,
        &org,
        IntegrationSettings {
            reopen_window_secs: 0,
            default_priority: Priority::default(),
        },
    )
    .await;

    let created = receive(&service, &integration, inbound("cust-3", "hi", None)).await;
    conversation::resolve_conversation(
        &service.repository,
        &service.event_bus,
        created.conversation.id.clone(),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let outcome = receive(&service, &integration, inbound("cust-3", "new issue", None)).await;
    assert_eq!(outcome.kind, ReceiveOutcomeKind::Created);
    assert_ne!(outcome.conversation.id, created.conversation.id);
    assert_eq!(outcome.conversation.status, ConversationStatus::Pending);
}

#[tokio::test]
async fn test_lifecycle_transitions_and_rejections() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let created = receive(&service, &integration, inbound("cust-4", "hi", None)).await;
    let conversation_id = created.conversation.id.clone();

    // Assign activates the pending conversation.
    let agent = WrappedUuidV4::new();
    let assigned = conversation::assign_conversation(
        &service.repository,
        &service.event_bus,
        conversation_id.clone(),
        AssignConversationRequest {
            agent_id: agent.clone(),
        },
    )
    .await
    .unwrap();
    assert_eq!(assigned.status, ConversationStatus::Active);
    assert_eq!(assigned.assigned_agent_id, Some(agent));

    // Tags behave as a set.
    let tagged = conversation::add_tags(
        &service.repository,
        &service.event_bus,
        conversation_id.clone(),
        AddTagsRequest {
            tags: vec!["billing".to_string(), "billing".to_string(), "vip".to_string()],
        },
    )
    .await
    .unwrap();
    assert_eq!(tagged.tags, vec!["billing".to_string(), "vip".to_string()]);

    let prioritized = conversation::set_priority(
        &service.repository,
        &service.event_bus,
        conversation_id.clone(),
        SetPriorityRequest {
            priority: Priority::Urgent,
        },
    )
    .await
    .unwrap();
    assert_eq!(prioritized.priority, Priority::Urgent);

    let resolved = conversation::resolve_conversation(
        &service.repository,
        &service.event_bus,
        conversation_id.clone(),
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, ConversationStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    // Resolving twice is a conflict; only open conversations resolve.
    let err = conversation::resolve_conversation(
        &service.repository,
        &service.event_bus,
        conversation_id.clone(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::Conflict { .. }));

    // Close it through the sweep, then every mutation is rejected.
    let closed = conversation::close_expired(
        &service.repository,
        &service.event_bus,
        Duration::from_secs(0),
    )
    .await
    .unwrap();
    assert_eq!(closed, 1);

    let err = conversation::assign_conversation(
        &service.repository,
        &service.event_bus,
        conversation_id.clone(),
        AssignConversationRequest {
            agent_id: WrappedUuidV4::new(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::Conflict { .. }));

    // A second sweep finds nothing.
    let closed = conversation::close_expired(
        &service.repository,
        &service.event_bus,
        Duration::from_secs(0),
    )
    .await
    .unwrap();
    assert_eq!(closed, 0);
}

#[tokio::test]
async fn test_dispatch_success_activates_pending_conversation() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let created = receive(&service, &integration, inbound("cust-5", "hi", None)).await;
    assert_eq!(created.conversation.status, ConversationStatus::Pending);

    let sent = dispatch::send(
        &service,
        created.conversation.id.clone(),
        SendMessageRequest {
            body: "hello from support".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert_eq!(sent.attempts, 1);
    assert!(!sent.is_incoming);
    assert_eq!(sent.external_id.as_deref(), Some("provider-msg-1"));

    let refreshed = conversation::get_conversation(&service.repository, created.conversation.id)
        .await
        .unwrap();
    assert_eq!(refreshed.status, ConversationStatus::Active);

    let refreshed_integration =
        integration::get_integration(&service.repository, integration.id)
            .await
            .unwrap();
    assert!(refreshed_integration.last_sync_at.is_some());
}

#[tokio::test]
async fn test_dispatch_retries_transient_failures() {
    let (_db, service, adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;
    let created = receive(&service, &integration, inbound("cust-6", "hi", None)).await;

    adapter
        .script(vec![
            Err(SendError::Transient(anyhow::anyhow!("connection reset"))),
            Err(SendError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            }),
            Ok(DeliveryReceipt {
                provider_message_id: Some("after-retries".to_string()),
            }),
        ])
        .await;

    let sent = dispatch::send(
        &service,
        created.conversation.id,
        SendMessageRequest {
            body: "are you there?".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert_eq!(sent.attempts, 3);
    assert_eq!(sent.external_id.as_deref(), Some("after-retries"));
    assert!(sent.last_error.is_none());
}

#[tokio::test]
async fn test_dispatch_exhausted_retries_record_failure() {
    let (_db, service, adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;
    let created = receive(&service, &integration, inbound("cust-7", "hi", None)).await;

    adapter
        .script(vec![
            Err(SendError::Transient(anyhow::anyhow!("timeout"))),
            Err(SendError::Transient(anyhow::anyhow!("timeout"))),
            Err(SendError::Transient(anyhow::anyhow!("timeout"))),
        ])
        .await;

    let failed = dispatch::send(
        &service,
        created.conversation.id.clone(),
        SendMessageRequest {
            body: "hello?".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.last_error.is_some());

    // The failure persisted with the message.
    let stored = message::get_message(&service.repository, failed.id).await.unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.attempts, 3);
}

#[tokio::test]
async fn test_dispatch_permanent_failure_does_not_retry() {
    let (_db, service, adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;
    let created = receive(&service, &integration, inbound("cust-8", "hi", None)).await;

    adapter
        .script(vec![Err(SendError::Permanent(
            "recipient opted out".to_string(),
        ))])
        .await;

    let failed = dispatch::send(
        &service,
        created.conversation.id,
        SendMessageRequest {
            body: "promo".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.last_error.as_deref(), Some("recipient opted out"));
}

#[tokio::test]
async fn test_dispatch_auth_expiry_deactivates_integration() {
    let (_db, service, adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;
    let created = receive(&service, &integration, inbound("cust-9", "hi", None)).await;

    let mut subscription = service.event_bus.subscribe(Scope::Organization {
        organization_id: org.clone(),
    });

    adapter.script(vec![Err(SendError::AuthExpired)]).await;

    let failed = dispatch::send(
        &service,
        created.conversation.id.clone(),
        SendMessageRequest {
            body: "reply".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);

    let refreshed = integration::get_integration(&service.repository, integration.id.clone())
        .await
        .unwrap();
    assert!(!refreshed.is_active);

    // The auth expiry was announced on the bus.
    let mut saw_auth_expired = false;
    for _ in 0..8 {
        match subscription.recv().await {
            Some(event) => {
                if matches!(
                    event.kind,
                    ConversationEventKind::IntegrationAuthExpired { .. }
                ) {
                    saw_auth_expired = true;
                    break;
                }
            }
            None => break,
        }
    }
    assert!(saw_auth_expired);

    // Further sends on this channel are refused until reconnected.
    let err = dispatch::send(
        &service,
        created.conversation.id,
        SendMessageRequest {
            body: "again".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::Conflict { .. }));
}

#[tokio::test]
async fn test_send_on_closed_conversation_is_rejected() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;
    let created = receive(&service, &integration, inbound("cust-10", "hi", None)).await;

    conversation::resolve_conversation(
        &service.repository,
        &service.event_bus,
        created.conversation.id.clone(),
    )
    .await
    .unwrap();
    conversation::close_expired(
        &service.repository,
        &service.event_bus,
        Duration::from_secs(0),
    )
    .await
    .unwrap();

    let err = dispatch::send(
        &service,
        created.conversation.id,
        SendMessageRequest {
            body: "too late".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_mark_read_and_inbox_counts() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let first = receive(&service, &integration, inbound("cust-11", "q1", None)).await;
    receive(&service, &integration, inbound("cust-11", "q2", None)).await;
    let second = receive(&service, &integration, inbound("cust-12", "other", None)).await;

    conversation::set_priority(
        &service.repository,
        &service.event_bus,
        second.conversation.id.clone(),
        SetPriorityRequest {
            priority: Priority::Urgent,
        },
    )
    .await
    .unwrap();

    let counts = inbox::get_inbox_counts(&service.repository, org.clone()).await.unwrap();
    assert_eq!(counts.unread, 3);
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.urgent, 1);
    assert_eq!(counts.open_total, 2);

    let mut subscription = service
        .event_bus
        .subscribe(Scope::Conversation {
            conversation_id: first.conversation.id.clone(),
        });

    let marked = message::mark_conversation_read(
        &service.repository,
        &service.event_bus,
        first.conversation.id.clone(),
    )
    .await
    .unwrap();
    assert_eq!(marked.marked, 2);

    // Live sessions see the read state change as a conversation update.
    let event = subscription.recv().await.expect("expected an event");
    assert_eq!(event.organization_id, org);
    assert!(matches!(
        event.kind,
        ConversationEventKind::ConversationUpdated { ref conversation }
            if conversation.id == first.conversation.id
    ));

    // Marking again is a no-op.
    let marked = message::mark_conversation_read(
        &service.repository,
        &service.event_bus,
        first.conversation.id.clone(),
    )
    .await
    .unwrap();
    assert_eq!(marked.marked, 0);

    let counts = inbox::get_inbox_counts(&service.repository, org.clone()).await.unwrap();
    assert_eq!(counts.unread, 1);

    let summary = inbox::get_inbox_summary(&service.repository, org, 2).await.unwrap();
    assert_eq!(summary.latest_messages.len(), 2);
    // Newest first.
    assert_eq!(summary.latest_messages[0].body, "other");
}

#[tokio::test]
async fn test_gateway_ingest_happy_path_and_rejections() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let accepted = gateway::ingest(
        &service,
        ChannelKind::WhatsApp,
        integration.id.clone(),
        RawWebhook {
            signature: Some("valid".to_string()),
            body: r#"{"from":"+15550002222","text":"hi there","message_id":"wamid-1"}"#.to_string(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(accepted, IngestOutcome::Accepted { .. }));

    // Provider retry of the same delivery.
    let duplicate = gateway::ingest(
        &service,
        ChannelKind::WhatsApp,
        integration.id.clone(),
        RawWebhook {
            signature: Some("valid".to_string()),
            body: r#"{"from":"+15550002222","text":"hi there","message_id":"wamid-1"}"#.to_string(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(duplicate, IngestOutcome::Duplicate));

    // Receipts are acknowledged without ingesting anything.
    let ignored = gateway::ingest(
        &service,
        ChannelKind::WhatsApp,
        integration.id.clone(),
        RawWebhook {
            signature: Some("valid".to_string()),
            body: r#"{"from":"+15550002222","kind":"receipt"}"#.to_string(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(ignored, IngestOutcome::Ignored));

    // Bad signature answers as an authentication failure.
    let err = gateway::ingest(
        &service,
        ChannelKind::WhatsApp,
        integration.id.clone(),
        RawWebhook {
            signature: Some("forged".to_string()),
            body: r#"{"from":"+15550002222","text":"spoof"}"#.to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::Authentication { .. }));

    // Unparseable payload is a bad request.
    let err = gateway::ingest(
        &service,
        ChannelKind::WhatsApp,
        integration.id.clone(),
        RawWebhook {
            signature: Some("valid".to_string()),
            body: "not json".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::InvalidRequest { .. }));

    // The channel path segment must match the integration's channel.
    let err = gateway::ingest(
        &service,
        ChannelKind::Sms,
        integration.id.clone(),
        RawWebhook {
            signature: Some("valid".to_string()),
            body: r#"{"from":"+15550002222","text":"hi"}"#.to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::NotFound { .. }));

    // A deactivated integration stops ingesting.
    service
        .repository
        .deactivate_integration(&integration.id)
        .await
        .unwrap();
    let err = gateway::ingest(
        &service,
        ChannelKind::WhatsApp,
        integration.id,
        RawWebhook {
            signature: Some("valid".to_string()),
            body: r#"{"from":"+15550002222","text":"hi"}"#.to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommonError::Conflict { .. }));
}

#[tokio::test]
async fn test_ingestion_publishes_scoped_events() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let other_org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;
    let other_integration =
        connect_channel(&service, &other_org, IntegrationSettings::default()).await;

    let mut subscription = service.event_bus.subscribe(Scope::Organization {
        organization_id: org.clone(),
    });

    receive(&service, &other_integration, inbound("stranger", "noise", None)).await;
    let outcome = receive(&service, &integration, inbound("cust-13", "signal", None)).await;

    let created = subscription.recv().await.unwrap();
    assert_eq!(created.organization_id, org);
    match created.kind {
        ConversationEventKind::ConversationCreated { conversation } => {
            assert_eq!(conversation.id, outcome.conversation.id);
        }
        other => panic!("expected conversation_created, got {other:?}"),
    }

    let message_event = subscription.recv().await.unwrap();
    match message_event.kind {
        ConversationEventKind::MessageCreated { message } => {
            assert_eq!(message.body, "signal");
        }
        other => panic!("expected message_created, got {other:?}"),
    }
}

#[tokio::test]
async fn test_conversation_listing_filters_by_status() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let first = receive(&service, &integration, inbound("cust-14", "a", None)).await;
    receive(&service, &integration, inbound("cust-15", "b", None)).await;

    conversation::resolve_conversation(
        &service.repository,
        &service.event_bus,
        first.conversation.id.clone(),
    )
    .await
    .unwrap();

    let all = conversation::list_conversations(
        &service.repository,
        org.clone(),
        None,
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(all.items.len(), 2);

    let resolved = conversation::list_conversations(
        &service.repository,
        org.clone(),
        Some(ConversationStatus::Resolved),
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(resolved.items.len(), 1);
    assert_eq!(resolved.items[0].id, first.conversation.id);

    let pending = conversation::list_conversations(
        &service.repository,
        org,
        Some(ConversationStatus::Pending),
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(pending.items.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inbound_for_same_pair_yields_one_conversation() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let integration = integration.clone();
        handles.push(tokio::spawn(async move {
            receive(
                &service,
                &integration,
                inbound("cust-race", &format!("msg {i}"), Some(&format!("race-{i}"))),
            )
            .await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let conversation_id = outcomes[0].conversation.id.clone();
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.conversation.id == conversation_id));
    let created = outcomes
        .iter()
        .filter(|outcome| outcome.kind == ReceiveOutcomeKind::Created)
        .count();
    assert_eq!(created, 1);

    let all = conversation::list_conversations(
        &service.repository,
        org,
        None,
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(all.items.len(), 1);

    let messages = message::list_conversation_messages(
        &service.repository,
        conversation_id,
        PaginationRequest::first_page(20),
    )
    .await
    .unwrap();
    assert_eq!(messages.items.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inbound_distinct_customers_get_distinct_conversations() {
    let (_db, service, _adapter) = setup().await;
    let org = WrappedUuidV4::new();
    let integration = connect_channel(&service, &org, IntegrationSettings::default()).await;

    let first = {
        let service = service.clone();
        let integration = integration.clone();
        tokio::spawn(async move {
            receive(&service, &integration, inbound("cust-a", "hi", Some("a-1"))).await
        })
    };
    let second = {
        let service = service.clone();
        let integration = integration.clone();
        tokio::spawn(async move {
            receive(&service, &integration, inbound("cust-b", "hi", Some("b-1"))).await
        })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();

    assert_eq!(first.kind, ReceiveOutcomeKind::Created);
    assert_eq!(second.kind, ReceiveOutcomeKind::Created);
    assert_ne!(first.conversation.id, second.conversation.id);

    let all = conversation::list_conversations(
        &service.repository,
        org,
        None,
        PaginationRequest::first_page(10),
    )
    .await
    .unwrap();
    assert_eq!(all.items.len(), 2);
}
