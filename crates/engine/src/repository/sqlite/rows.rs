//! Row conversions from libsql rows to domain types
//!
//! Column order must match the SELECT lists in the repository queries.
//! Columns come back as the primitive types libsql decodes natively and are
//! parsed into domain types here.

use std::str::FromStr;

use serde_json::Value;
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};

use crate::logic::{
    channel::ChannelKind,
    conversation::{Conversation, ConversationStatus, Priority},
    integration::{ChannelIntegration, IntegrationSettings},
    message::{ChannelMessage, DeliveryStatus},
};

fn repository_error(context: &str, e: impl Into<anyhow::Error>) -> CommonError {
    let e = e.into();
    CommonError::Repository {
        msg: format!("{context}: {e}"),
        source: Some(e),
    }
}

fn text_column(row: &libsql::Row, idx: i32, context: &str) -> Result<String, CommonError> {
    row.get::<String>(idx)
        .map_err(|e| repository_error(context, e))
}

fn opt_text_column(
    row: &libsql::Row,
    idx: i32,
    context: &str,
) -> Result<Option<String>, CommonError> {
    row.get::<Option<String>>(idx)
        .map_err(|e| repository_error(context, e))
}

fn bool_column(row: &libsql::Row, idx: i32, context: &str) -> Result<bool, CommonError> {
    Ok(row
        .get::<i64>(idx)
        .map_err(|e| repository_error(context, e))?
        != 0)
}

fn uuid_column(row: &libsql::Row, idx: i32, context: &str) -> Result<WrappedUuidV4, CommonError> {
    WrappedUuidV4::try_from(text_column(row, idx, context)?)
        .map_err(|e| repository_error(context, e))
}

fn opt_uuid_column(
    row: &libsql::Row,
    idx: i32,
    context: &str,
) -> Result<Option<WrappedUuidV4>, CommonError> {
    opt_text_column(row, idx, context)?
        .map(|raw| WrappedUuidV4::try_from(raw).map_err(|e| repository_error(context, e)))
        .transpose()
}

fn datetime_column(
    row: &libsql::Row,
    idx: i32,
    context: &str,
) -> Result<WrappedChronoDateTime, CommonError> {
    WrappedChronoDateTime::try_from(text_column(row, idx, context)?)
        .map_err(|e| repository_error(context, e))
}

fn opt_datetime_column(
    row: &libsql::Row,
    idx: i32,
    context: &str,
) -> Result<Option<WrappedChronoDateTime>, CommonError> {
    opt_text_column(row, idx, context)?
        .map(|raw| WrappedChronoDateTime::try_from(raw).map_err(|e| repository_error(context, e)))
        .transpose()
}

fn json_column(row: &libsql::Row, idx: i32, context: &str) -> Result<WrappedJsonValue, CommonError> {
    let raw = text_column(row, idx, context)?;
    serde_json::from_str::<Value>(&raw)
        .map(WrappedJsonValue::new)
        .map_err(|e| repository_error(context, e))
}

fn opt_json_column(
    row: &libsql::Row,
    idx: i32,
    context: &str,
) -> Result<Option<WrappedJsonValue>, CommonError> {
    opt_text_column(row, idx, context)?
        .map(|raw| {
            serde_json::from_str::<Value>(&raw)
                .map(WrappedJsonValue::new)
                .map_err(|e| repository_error(context, e))
        })
        .transpose()
}

fn parsed_column<T>(row: &libsql::Row, idx: i32, context: &str) -> Result<T, CommonError>
where
    T: FromStr<Err = anyhow::Error>,
{
    T::from_str(&text_column(row, idx, context)?).map_err(|e| repository_error(context, e))
}

fn parse_tags(tags: WrappedJsonValue) -> Result<Vec<String>, CommonError> {
    match tags.into_inner() {
        Value::Array(values) => values
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(CommonError::Repository {
                    msg: format!("expected string tag, got {other}"),
                    source: None,
                }),
            })
            .collect(),
        other => Err(CommonError::Repository {
            msg: format!("expected tags array, got {other}"),
            source: None,
        }),
    }
}

/// Columns: id, organization_id, customer_id, channel, status, priority,
/// assigned_agent_id, tags, created_at, updated_at, resolved_at
pub(super) fn conversation_from_row(row: &libsql::Row) -> Result<Conversation, CommonError> {
    Ok(Conversation {
        id: uuid_column(row, 0, "conversation id")?,
        organization_id: uuid_column(row, 1, "conversation organization_id")?,
        customer_id: text_column(row, 2, "conversation customer_id")?,
        channel: parsed_column::<ChannelKind>(row, 3, "conversation channel")?,
        status: parsed_column::<ConversationStatus>(row, 4, "conversation status")?,
        priority: parsed_column::<Priority>(row, 5, "conversation priority")?,
        assigned_agent_id: opt_uuid_column(row, 6, "conversation assigned_agent_id")?,
        tags: parse_tags(json_column(row, 7, "conversation tags")?)?,
        created_at: datetime_column(row, 8, "conversation created_at")?,
        updated_at: datetime_column(row, 9, "conversation updated_at")?,
        resolved_at: opt_datetime_column(row, 10, "conversation resolved_at")?,
    })
}

/// Columns: id, conversation_id, channel, body, is_incoming, status,
/// external_id, provider_metadata, attempts, last_error, created_at
pub(super) fn message_from_row(row: &libsql::Row) -> Result<ChannelMessage, CommonError> {
    Ok(ChannelMessage {
        id: uuid_column(row, 0, "message id")?,
        conversation_id: uuid_column(row, 1, "message conversation_id")?,
        channel: parsed_column::<ChannelKind>(row, 2, "message channel")?,
        body: text_column(row, 3, "message body")?,
        is_incoming: bool_column(row, 4, "message is_incoming")?,
        status: parsed_column::<DeliveryStatus>(row, 5, "message status")?,
        external_id: opt_text_column(row, 6, "message external_id")?,
        provider_metadata: opt_json_column(row, 7, "message provider_metadata")?,
        attempts: row
            .get::<i64>(8)
            .map_err(|e| repository_error("message attempts", e))?,
        last_error: opt_text_column(row, 9, "message last_error")?,
        created_at: datetime_column(row, 10, "message created_at")?,
    })
}

/// Columns: id, organization_id, channel, credentials, settings, is_active,
/// last_sync_at, created_at, updated_at
pub(super) fn integration_from_row(row: &libsql::Row) -> Result<ChannelIntegration, CommonError> {
    let settings_json = json_column(row, 4, "integration settings")?;
    let settings: IntegrationSettings = serde_json::from_value(settings_json.into_inner())
        .map_err(|e| repository_error("integration settings", e))?;

    Ok(ChannelIntegration {
        id: uuid_column(row, 0, "integration id")?,
        organization_id: uuid_column(row, 1, "integration organization_id")?,
        channel: parsed_column::<ChannelKind>(row, 2, "integration channel")?,
        credentials: json_column(row, 3, "integration credentials")?,
        settings,
        is_active: bool_column(row, 5, "integration is_active")?,
        last_sync_at: opt_datetime_column(row, 6, "integration last_sync_at")?,
        created_at: datetime_column(row, 7, "integration created_at")?,
        updated_at: datetime_column(row, 8, "integration updated_at")?,
    })
}
