use std::{fmt, str::FromStr};

use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::{
    IntoParams, PartialSchema, ToSchema,
    openapi::{ObjectBuilder, Type},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(transparent)]
pub struct WrappedUuidV4(uuid::Uuid);

impl Default for WrappedUuidV4 {
    fn default() -> Self {
        Self::new()
    }
}

impl WrappedUuidV4 {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn get_inner(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for WrappedUuidV4 {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

impl fmt::Display for WrappedUuidV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for WrappedUuidV4 {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(uuid::Uuid::parse_str(&value)?))
    }
}

impl From<WrappedUuidV4> for libsql::Value {
    fn from(val: WrappedUuidV4) -> Self {
        libsql::Value::Text(val.to_string())
    }
}

impl From<&WrappedUuidV4> for libsql::Value {
    fn from(val: &WrappedUuidV4) -> Self {
        libsql::Value::Text(val.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(transparent)]
pub struct WrappedJsonValue(serde_json::Value);

impl WrappedJsonValue {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn get_inner(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for WrappedJsonValue {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<WrappedJsonValue> for serde_json::Value {
    fn from(value: WrappedJsonValue) -> Self {
        value.0
    }
}

impl From<WrappedJsonValue> for libsql::Value {
    fn from(value: WrappedJsonValue) -> Self {
        libsql::Value::Text(value.0.to_string())
    }
}

impl From<&WrappedJsonValue> for libsql::Value {
    fn from(value: &WrappedJsonValue) -> Self {
        libsql::Value::Text(value.0.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(transparent)]
pub struct WrappedChronoDateTime(chrono::DateTime<chrono::Utc>);

impl WrappedChronoDateTime {
    pub fn new(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self(value)
    }

    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    pub fn get_inner(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

fn parse_datetime(value: &str) -> Result<chrono::DateTime<chrono::Utc>, anyhow::Error> {
    // SQLite datetime format first, then RFC3339
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(value).map(|dt| dt.into()))
        .map_err(|_e| anyhow::anyhow!("invalid datetime value"))
}

impl TryFrom<&str> for WrappedChronoDateTime {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Self(parse_datetime(value)?))
    }
}

impl TryFrom<String> for WrappedChronoDateTime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl fmt::Display for WrappedChronoDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for WrappedChronoDateTime {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self(value)
    }
}

impl From<WrappedChronoDateTime> for libsql::Value {
    fn from(value: WrappedChronoDateTime) -> Self {
        // SQLite's expected datetime format rather than RFC3339
        libsql::Value::Text(value.0.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

impl From<&WrappedChronoDateTime> for libsql::Value {
    fn from(value: &WrappedChronoDateTime) -> Self {
        libsql::Value::Text(value.0.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

// Pagination types

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct PaginationRequest {
    pub page_size: i64,
    pub next_page_token: Option<String>,
}

impl PaginationRequest {
    pub fn first_page(page_size: i64) -> Self {
        Self {
            page_size,
            next_page_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedResponse<T: ToSchema + Serialize> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T: ToSchema + Serialize> ToSchema for PaginatedResponse<T> {
    fn name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Owned(format!("{}PaginatedResponse", T::name()))
    }

    fn schemas(
        schemas: &mut Vec<(
            String,
            utoipa::openapi::RefOr<utoipa::openapi::schema::Schema>,
        )>,
    ) {
        schemas.push((T::name().to_string(), T::schema()));
        T::schemas(schemas);
        schemas.push((format!("{}PaginatedResponse", T::name()), Self::schema()));
    }
}

impl<T: ToSchema + Serialize> PartialSchema for PaginatedResponse<T> {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        utoipa::openapi::RefOr::T(utoipa::openapi::schema::Schema::Object(
            ObjectBuilder::new()
                .schema_type(Type::Object)
                .property(
                    "items",
                    utoipa::openapi::ArrayBuilder::new()
                        .schema_type(utoipa::openapi::schema::Type::Array)
                        .items(utoipa::openapi::schema::Ref::from_schema_name(T::name())),
                )
                .property(
                    "next_page_token",
                    utoipa::openapi::ObjectBuilder::new()
                        .schema_type(utoipa::openapi::schema::Type::String),
                )
                .required("items")
                .required("next_page_token")
                .build(),
        ))
    }
}

/// Decode a base64-encoded pagination token back to its composite key parts
pub fn decode_pagination_token(token: &str) -> anyhow::Result<Vec<String>> {
    let decoded_bytes = base64::engine::general_purpose::STANDARD.decode(token)?;
    let decoded_str = String::from_utf8(decoded_bytes)?;
    Ok(decoded_str.split("__").map(|s| s.to_string()).collect())
}

impl<T: ToSchema + Serialize> PaginatedResponse<T> {
    /// Create a paginated response from a list fetched with `page_size + 1`.
    ///
    /// The extra row signals that a next page exists; it is dropped from the
    /// output and the last remaining item's composite key becomes the token.
    pub fn from_items_with_extra<F>(
        mut items: Vec<T>,
        pagination: &PaginationRequest,
        get_id: F,
    ) -> Self
    where
        F: FnOnce(&T) -> Vec<String>,
    {
        let has_more = items.len() as i64 > pagination.page_size;
        if has_more {
            items.pop();
        }

        let next_page_token = if has_more && !items.is_empty() {
            items.last().map(|item| {
                let key_parts = get_id(item);
                let composite_key = key_parts.join("__");
                base64::engine::general_purpose::STANDARD.encode(composite_key.as_bytes())
            })
        } else {
            None
        };

        Self {
            items,
            next_page_token,
        }
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;

        #[test]
        fn test_uuid_roundtrip_through_libsql_value() {
            let id = WrappedUuidV4::new();
            let val: libsql::Value = id.clone().into();
            let libsql::Value::Text(stored) = val else {
                panic!("uuid must be stored as text");
            };
            assert_eq!(WrappedUuidV4::try_from(stored).unwrap(), id);
        }

        #[test]
        fn test_datetime_parses_sqlite_and_rfc3339() {
            assert!(WrappedChronoDateTime::try_from("2026-08-29 10:30:00.123").is_ok());
            assert!(WrappedChronoDateTime::try_from("2026-08-29T10:30:00+00:00").is_ok());
            assert!(WrappedChronoDateTime::try_from("not a date").is_err());
        }

        #[test]
        fn test_pagination_token_roundtrip() {
            #[derive(Serialize, ToSchema)]
            struct Item {
                key: String,
            }

            let items = vec![
                Item { key: "a".into() },
                Item { key: "b".into() },
                Item { key: "c".into() },
            ];
            let pagination = PaginationRequest::first_page(2);
            let page =
                PaginatedResponse::from_items_with_extra(items, &pagination, |item| {
                    vec![item.key.clone()]
                });

            assert_eq!(page.items.len(), 2);
            let token = page.next_page_token.expect("expected a next page token");
            let parts = decode_pagination_token(&token).unwrap();
            assert_eq!(parts, vec!["b".to_string()]);
        }

        #[test]
        fn test_pagination_no_extra_means_no_token() {
            #[derive(Serialize, ToSchema)]
            struct Item {
                key: String,
            }

            let items = vec![Item { key: "a".into() }];
            let pagination = PaginationRequest::first_page(2);
            let page =
                PaginatedResponse::from_items_with_extra(items, &pagination, |item| {
                    vec![item.key.clone()]
                });

            assert_eq!(page.items.len(), 1);
            assert!(page.next_page_token.is_none());
        }
    }
}
