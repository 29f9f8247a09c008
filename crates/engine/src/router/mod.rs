//! Router layer for the conversation engine
//! Contains HTTP endpoints for webhooks, conversations, messages,
//! integrations, the unified inbox, and the event stream

pub mod conversation;
pub mod events;
pub mod inbox;
pub mod integration;
pub mod message;
pub mod webhook;

use std::sync::Arc;
use utoipa::openapi::OpenApi as OpenApiDoc;
use utoipa_axum::router::OpenApiRouter;

use crate::service::EngineService;

pub const PATH_PREFIX: &str = "/api";
pub const API_VERSION_1: &str = "v1";
pub const SERVICE_ROUTE_KEY: &str = "engine";

/// Create the combined engine router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    let webhook_router = webhook::create_router();
    let conversation_router = conversation::create_router();
    let message_router = message::create_router();
    let integration_router = integration::create_router();
    let inbox_router = inbox::create_router();
    let events_router = events::create_router();

    OpenApiRouter::new()
        .merge(webhook_router)
        .merge(conversation_router)
        .merge(message_router)
        .merge(integration_router)
        .merge(inbox_router)
        .merge(events_router)
}

/// Get the combined OpenAPI spec for the engine crate
pub fn get_openapi_spec() -> OpenApiDoc {
    let (_, webhook_spec) = webhook::create_router().split_for_parts();
    let (_, conversation_spec) = conversation::create_router().split_for_parts();
    let (_, message_spec) = message::create_router().split_for_parts();
    let (_, integration_spec) = integration::create_router().split_for_parts();
    let (_, inbox_spec) = inbox::create_router().split_for_parts();
    let (_, events_spec) = events::create_router().split_for_parts();

    let mut spec = webhook_spec;
    spec.merge(conversation_spec);
    spec.merge(message_spec);
    spec.merge(integration_spec);
    spec.merge(inbox_spec);
    spec.merge(events_spec);
    spec
}
