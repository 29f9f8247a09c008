//! Channel integration HTTP endpoints

use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use shared::openapi::API_VERSION_TAG;
use std::sync::Arc;
use tracing::trace;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};
use crate::logic::integration::{
    create_integration, deactivate_integration, get_integration, list_integrations,
    update_integration, CreateIntegrationRequest, CreateIntegrationResponse,
    DeactivateIntegrationResponse, GetIntegrationResponse, ListIntegrationsResponse,
    UpdateIntegrationRequest, UpdateIntegrationResponse,
};
use crate::service::EngineService;
use shared::{
    error::CommonError,
    openapi::JsonResponse,
    primitives::{PaginationRequest, WrappedUuidV4},
};

/// Create the integration router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    OpenApiRouter::new()
        .routes(routes!(route_list_integrations))
        .routes(routes!(route_create_integration))
        .routes(routes!(route_get_integration))
        .routes(routes!(route_update_integration))
        .routes(routes!(route_deactivate_integration))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct ListIntegrationsQuery {
    pub organization_id: WrappedUuidV4,
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/integration", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(ListIntegrationsQuery, PaginationRequest),
    responses(
        (status = 200, description = "List integrations", body = ListIntegrationsResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List integrations",
    description = "List an organization's channel integrations",
    operation_id = "list-integrations",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_list_integrations(
    State(ctx): State<Arc<EngineService>>,
    Query(query): Query<ListIntegrationsQuery>,
    Query(pagination): Query<PaginationRequest>,
) -> JsonResponse<ListIntegrationsResponse, CommonError> {
    trace!(organization_id = %query.organization_id, "Listing integrations");
    let res = list_integrations(&ctx.repository, query.organization_id, pagination).await;
    trace!(success = res.is_ok(), "Listing integrations completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/integration", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    request_body = CreateIntegrationRequest,
    responses(
        (status = 200, description = "Create integration", body = CreateIntegrationResponse),
        (status = 400, description = "Invalid Credentials", body = CommonError),
        (status = 409, description = "Integration Exists", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Create integration",
    description = "Connect a channel for an organization. Credentials are validated against the adapter's configuration schema",
    operation_id = "create-integration",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_create_integration(
    State(ctx): State<Arc<EngineService>>,
    Json(request): Json<CreateIntegrationRequest>,
) -> JsonResponse<CreateIntegrationResponse, CommonError> {
    trace!(organization_id = %request.organization_id, channel = %request.channel, "Creating integration");
    let res = create_integration(&ctx.repository, &ctx.event_bus, &ctx.adapters, request).await;
    trace!(success = res.is_ok(), "Creating integration completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/integration/{{integration_id}}", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("integration_id" = WrappedUuidV4, Path, description = "Integration ID"),
    ),
    responses(
        (status = 200, description = "Get integration", body = GetIntegrationResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Get integration",
    description = "Retrieve an integration by its ID",
    operation_id = "get-integration",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_get_integration(
    State(ctx): State<Arc<EngineService>>,
    Path(integration_id): Path<WrappedUuidV4>,
) -> JsonResponse<GetIntegrationResponse, CommonError> {
    trace!(integration_id = %integration_id, "Getting integration");
    let res = get_integration(&ctx.repository, integration_id).await;
    trace!(success = res.is_ok(), "Getting integration completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    put,
    path = format!("{}/{}/{}/integration/{{integration_id}}", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("integration_id" = WrappedUuidV4, Path, description = "Integration ID"),
    ),
    request_body = UpdateIntegrationRequest,
    responses(
        (status = 200, description = "Update integration", body = UpdateIntegrationResponse),
        (status = 400, description = "Invalid Credentials", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Update integration",
    description = "Update credentials, settings, or active state on an integration",
    operation_id = "update-integration",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_update_integration(
    State(ctx): State<Arc<EngineService>>,
    Path(integration_id): Path<WrappedUuidV4>,
    Json(request): Json<UpdateIntegrationRequest>,
) -> JsonResponse<UpdateIntegrationResponse, CommonError> {
    trace!(integration_id = %integration_id, "Updating integration");
    let res = update_integration(
        &ctx.repository,
        &ctx.event_bus,
        &ctx.adapters,
        integration_id,
        request,
    )
    .await;
    trace!(success = res.is_ok(), "Updating integration completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/integration/{{integration_id}}/deactivate", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("integration_id" = WrappedUuidV4, Path, description = "Integration ID"),
    ),
    responses(
        (status = 200, description = "Deactivate integration", body = DeactivateIntegrationResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Deactivate integration",
    description = "Stop accepting webhooks and sends for an integration. Idempotent",
    operation_id = "deactivate-integration",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_deactivate_integration(
    State(ctx): State<Arc<EngineService>>,
    Path(integration_id): Path<WrappedUuidV4>,
) -> JsonResponse<DeactivateIntegrationResponse, CommonError> {
    trace!(integration_id = %integration_id, "Deactivating integration");
    let res = deactivate_integration(&ctx.repository, &ctx.event_bus, integration_id).await;
    trace!(success = res.is_ok(), "Deactivating integration completed");
    JsonResponse::from(res)
}
