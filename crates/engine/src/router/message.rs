//! Message HTTP endpoints

use axum::extract::{Json, Path, Query, State};
use shared::openapi::API_VERSION_TAG;
use std::sync::Arc;
use tracing::trace;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};
use crate::dispatch;
use crate::logic::message::{
    get_message, list_conversation_messages, ChannelMessage, GetMessageResponse,
    ListMessagesResponse, SendMessageRequest,
};
use crate::service::EngineService;
use shared::{
    error::CommonError,
    openapi::JsonResponse,
    primitives::{PaginationRequest, WrappedUuidV4},
};

/// Create the message router
pub fn create_router() -> OpenApiRouter<Arc<EngineService>> {
    OpenApiRouter::new()
        .routes(routes!(route_list_conversation_messages))
        .routes(routes!(route_send_message))
        .routes(routes!(route_get_message))
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/message", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
        PaginationRequest,
    ),
    responses(
        (status = 200, description = "List messages", body = ListMessagesResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Conversation Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List messages",
    description = "List a conversation's messages in chronological order",
    operation_id = "list-conversation-messages",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_list_conversation_messages(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
    Query(pagination): Query<PaginationRequest>,
) -> JsonResponse<ListMessagesResponse, CommonError> {
    trace!(conversation_id = %conversation_id, "Listing conversation messages");
    let res = list_conversation_messages(&ctx.repository, conversation_id, pagination).await;
    trace!(success = res.is_ok(), "Listing conversation messages completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/conversation/{{conversation_id}}/message", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("conversation_id" = WrappedUuidV4, Path, description = "Conversation ID"),
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Send message; check the returned delivery status", body = ChannelMessage),
        (status = 400, description = "Conversation Closed", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 409, description = "Integration Deactivated", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Send message",
    description = "Send an operator reply through the conversation's owning channel. The response carries the final delivery status; a failed delivery is recorded state, not an HTTP error",
    operation_id = "send-message",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_send_message(
    State(ctx): State<Arc<EngineService>>,
    Path(conversation_id): Path<WrappedUuidV4>,
    Json(request): Json<SendMessageRequest>,
) -> JsonResponse<ChannelMessage, CommonError> {
    trace!(conversation_id = %conversation_id, "Sending message");
    let res = dispatch::send(&ctx, conversation_id, request).await;
    trace!(success = res.is_ok(), "Sending message completed");
    JsonResponse::from(res)
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/message/{{message_id}}", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("message_id" = WrappedUuidV4, Path, description = "Message ID"),
    ),
    responses(
        (status = 200, description = "Get message", body = GetMessageResponse),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Get message",
    description = "Retrieve a message by its ID, including delivery attempts and last error",
    operation_id = "get-message",
    security(
        (),
        ("api_key" = []),
        ("bearer_token" = [])
    )
)]
async fn route_get_message(
    State(ctx): State<Arc<EngineService>>,
    Path(message_id): Path<WrappedUuidV4>,
) -> JsonResponse<GetMessageResponse, CommonError> {
    trace!(message_id = %message_id, "Getting message");
    let res = get_message(&ctx.repository, message_id).await;
    trace!(success = res.is_ok(), "Getting message completed");
    JsonResponse::from(res)
}
