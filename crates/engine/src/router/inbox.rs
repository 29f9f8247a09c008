//! Unified inbox HTTP endpoints

use axum::extract::{Query, State};
use serde::Deserialize;
use shared::openapi::API_VERSION_TAG;
use std::sync::Arc;
use tracing::trace;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};
use crate::logic::inbox::{
    get_inbox_counts, get_inbox_summary, InboxCounts, InboxSummary, DEFAULT_LATEST_MESSAGES,
};
use crate::service::EngineService;
use shared::{error::CommonError, openapi::JsonResponse, primitives::WrappedUuidV4};

/// Create the inbox router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    OpenApiRouter::new()
        .routes(routes!(route_inbox_counts))
        .routes(routes!(route_inbox_summary))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct InboxQuery {
    pub organization_id: WrappedUuidV4,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct InboxSummaryQuery {
    pub organization_id: WrappedUuidV4,
    /// How many recent messages to include, newest first.
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/inbox/counts", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(InboxQuery),
    responses(
        (status = 200, description = "Inbox counts", body = InboxCounts),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Inbox counts",
    description = "Badge counts for an organization's unified inbox, computed from the store",
    operation_id = "get-inbox-counts",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_inbox_counts(
    State(ctx): State<Arc<EngineService>>,
    Query(query): Query<InboxQuery>,
) -> JsonResponse<InboxCounts, CommonError> {
    trace!(organization_id = %query.organization_id, "Getting inbox counts");
    let res = get_inbox_counts(&ctx.repository, query.organization_id).await;
    trace!(success = res.is_ok(), "Getting inbox counts completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/inbox/summary", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(InboxSummaryQuery),
    responses(
        (status = 200, description = "Inbox summary", body = InboxSummary),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Inbox summary",
    description = "Counts plus the most recent messages across every channel",
    operation_id = "get-inbox-summary",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_inbox_summary(
    State(ctx): State<Arc<EngineService>>,
    Query(query): Query<InboxSummaryQuery>,
) -> JsonResponse<InboxSummary, CommonError> {
    trace!(organization_id = %query.organization_id, "Getting inbox summary");
    let limit = query.limit.unwrap_or(DEFAULT_LATEST_MESSAGES);
    let res = get_inbox_summary(&ctx.repository, query.organization_id, limit).await;
    trace!(success = res.is_ok(), "Getting inbox summary completed");
    JsonResponse::from(res)
}
