//! Server-sent event stream
//!
//! Exposes the in-process event bus over SSE. Clients pick a scope with
//! query parameters; a conversation filter takes precedence over an
//! organization filter, and neither means the full firehose.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use shared::openapi::API_VERSION_TAG;
use tracing::trace;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};
use crate::logic::event::Scope;
use crate::service::EngineService;
use shared::primitives::WrappedUuidV4;

/// Create the events router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    OpenApiRouter::new().routes(routes!(route_stream_events))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct EventStreamQuery {
    pub organization_id: Option<WrappedUuidV4>,
    pub conversation_id: Option<WrappedUuidV4>,
}

impl EventStreamQuery {
    fn scope(self) -> Scope {
        if let Some(conversation_id) = self.conversation_id {
            Scope::Conversation { conversation_id }
        } else if let Some(organization_id) = self.organization_id {
            Scope::Organization { organization_id }
        } else {
            Scope::All
        }
    }
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/events/stream", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(EventStreamQuery),
    responses(
        (status = 200, description = "SSE stream of conversation events", content_type = "text/event-stream"),
    ),
    summary = "Stream events",
    description = "Subscribe to conversation events as server-sent events. Pass conversation_id to follow a single conversation, organization_id for everything in an organization, or neither for all events",
    operation_id = "stream-events",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_stream_events(
    State(ctx): State<Arc<EngineService>>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let scope = query.scope();
    trace!(scope = ?scope, "Opening event stream");

    let subscription = ctx.event_bus.subscribe(scope);
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        loop {
            let event = subscription.recv().await?;
            // A serialization failure drops the event rather than the stream.
            match SseEvent::default().json_data(&event) {
                Ok(sse) => return Some((Ok(sse), subscription)),
                Err(_) => continue,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
