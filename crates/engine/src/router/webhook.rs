//! Webhook ingestion endpoint
//!
//! Providers deliver raw payloads here; the URL carries the channel and the
//! integration that owns the subscription. The body stays untouched until the
//! channel adapter has verified the signature over the exact bytes received.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use http::HeaderMap;
use shared::openapi::API_VERSION_TAG;
use tracing::trace;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};
use crate::gateway::{ingest, IngestOutcome};
use crate::logic::channel::{ChannelKind, RawWebhook};
use crate::service::EngineService;
use shared::{error::CommonError, openapi::JsonResponse, primitives::WrappedUuidV4};

/// Signature headers checked in order. Meta-style channels sign with an HMAC
/// hex digest in `x-hub-signature-256`; the others use `x-signature`.
const SIGNATURE_HEADERS: [&str; 2] = ["x-hub-signature-256", "x-signature"];

/// Create the webhook router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    OpenApiRouter::new().routes(routes!(route_ingest_webhook))
}

fn extract_signature(headers: &HeaderMap) -> Option<String> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/webhook/{{channel}}/{{integration_id}}", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("channel" = String, Path, description = "Channel kind, e.g. whatsapp"),
        ("integration_id" = WrappedUuidV4, Path, description = "Integration ID"),
    ),
    request_body = String,
    responses(
        (status = 200, description = "Webhook processed", body = IngestOutcome),
        (status = 400, description = "Malformed Payload", body = CommonError),
        (status = 401, description = "Invalid Signature", body = CommonError),
        (status = 404, description = "Unknown Channel or Integration", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Ingest webhook",
    description = "Ingest a raw provider webhook delivery. Retried deliveries are acknowledged without creating duplicate messages",
    operation_id = "ingest-webhook",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_ingest_webhook(
    State(ctx): State<Arc<EngineService>>,
    Path((channel, integration_id)): Path<(String, WrappedUuidV4)>,
    headers: HeaderMap,
    body: String,
) -> JsonResponse<IngestOutcome, CommonError> {
    trace!(channel, integration_id = %integration_id, "Ingesting webhook");

    let channel = match ChannelKind::from_str(&channel) {
        Ok(channel) => channel,
        Err(e) => {
            return JsonResponse::new_error(CommonError::NotFound {
                msg: format!("unknown channel: {channel}"),
                lookup_id: channel,
                source: Some(e),
            });
        }
    };

    let raw = RawWebhook {
        signature: extract_signature(&headers),
        body,
    };

    let res = ingest(&ctx, channel, integration_id, raw).await;
    trace!(success = res.is_ok(), "Ingesting webhook completed");
    JsonResponse::from(res)
}
