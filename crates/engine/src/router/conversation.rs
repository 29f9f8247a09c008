//! Conversation HTTP endpoints

use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use shared::openapi::API_VERSION_TAG;
use std::sync::Arc;
use tracing::trace;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};
use crate::logic::conversation::{
    add_tags, assign_conversation, get_conversation, list_conversations, resolve_conversation,
    set_priority, AddTagsRequest, AssignConversationRequest, Conversation, ConversationStatus,
    GetConversationResponse, ListConversationsResponse, SetPriorityRequest,
};
use crate::logic::message::{mark_conversation_read, MarkReadResponse};
use crate::service::EngineService;
use shared::{
    error::CommonError,
    openapi::JsonResponse,
    primitives::{PaginationRequest, WrappedUuidV4},
};

/// Create the conversation router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    OpenApiRouter::new()
        .routes(routes!(route_list_conversations))
        .routes(routes!(route_get_conversation))
        .routes(routes!(route_assign_conversation))
        .routes(routes!(route_resolve_conversation))
        .routes(routes!(route_add_tags))
        .routes(routes!(route_set_priority))
        .routes(routes!(route_mark_read))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct ListConversationsQuery {
    pub organization_id: WrappedUuidV4,
    pub status: Option<ConversationStatus>,
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/conversation", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(ListConversationsQuery, PaginationRequest),
    responses(
        (status = 200, description = "List conversations", body = ListConversationsResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List conversations",
    description = "List an organization's conversations, optionally filtered by status, most recently active first",
    operation_id = "list-conversations",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_list_conversations(
    State(ctx): State<Arc<EngineService>>,
    Query(query): Query<ListConversationsQuery>,
    Query(pagination): Query<PaginationRequest>,
) -> JsonResponse<ListConversationsResponse, CommonError> {
    trace!(organization_id = %query.organization_id, "Listing conversations");
    let res = list_conversations(
        &ctx.repository,
        query.organization_id,
        query.status,
        pagination,
    )
    .await;
    trace!(success = res.is_ok(), "Listing conversations completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Get conversation", body = GetConversationResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Get conversation",
    description = "Retrieve a conversation by its ID",
    operation_id = "get-conversation",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_get_conversation(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
) -> JsonResponse<GetConversationResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Getting conversation");
    let res = get_conversation(&ctx.repository, conversation_id).await;
    trace!(success = res.is_ok(), "Getting conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/assign", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = AssignConversationRequest,
    responses(
        (status = 200, description = "Assign conversation", body = Conversation),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Conversation Closed", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Assign conversation",
    description = "Assign a conversation to an operator, activating it if still pending",
    operation_id = "assign-conversation",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_assign_conversation(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<AssignConversationRequest>,
) -> JsonResponse<Conversation, CommonError> {
    trace!(conversation_id = %conversation_id, agent_id = %request.agent_id, "Assigning conversation");
    let res = assign_conversation(&ctx.repository, &ctx.event_bus, conversation_id, request).await;
    trace!(success = res.is_ok(), "Assigning conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/resolve", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Resolve conversation", body = Conversation),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Not Open", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Resolve conversation",
    description = "Mark an open conversation as handled",
    operation_id = "resolve-conversation",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_resolve_conversation(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
) -> JsonResponse<Conversation, CommonError> {
    trace!(conversation_id = %conversation_id, "Resolving conversation");
    let res = resolve_conversation(&ctx.repository, &ctx.event_bus, conversation_id).await;
    trace!(success = res.is_ok(), "Resolving conversation completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/tags", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = AddTagsRequest,
    responses(
        (status = 200, description = "Add tags", body = Conversation),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Conversation Closed", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Add tags",
    description = "Add tags to a conversation; tags behave as a set",
    operation_id = "add-conversation-tags",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_add_tags(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<AddTagsRequest>,
) -> JsonResponse<Conversation, CommonError> {
    trace!(conversation_id = %conversation_id, "Adding tags");
    let res = add_tags(&ctx.repository, &ctx.event_bus, conversation_id, request).await;
    trace!(success = res.is_ok(), "Adding tags completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/priority", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = SetPriorityRequest,
    responses(
        (status = 200, description = "Set priority", body = Conversation),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Conversation Closed", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Set priority",
    description = "Change a conversation's priority",
    operation_id = "set-conversation-priority",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_set_priority(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<SetPriorityRequest>,
) -> JsonResponse<Conversation, CommonError> {
    trace!(conversation_id = %conversation_id, priority = %request.priority, "Setting priority");
    let res = set_priority(&ctx.repository, &ctx.event_bus, conversation_id, request).await;
    trace!(success = res.is_ok(), "Setting priority completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/read", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Mark conversation read", body = MarkReadResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Mark read",
    description = "Mark all unread inbound messages in a conversation as read",
    operation_id = "mark-conversation-read",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_mark_read(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
) -> JsonResponse<MarkReadResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Marking conversation read");
    let res = mark_conversation_read(&ctx.repository, &ctx.event_bus, conversation_id).await;
    trace!(success = res.is_ok(), "Marking conversation read completed");
    JsonResponse::from(res)
}
