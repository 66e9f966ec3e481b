use async_trait::async_trait;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

use crate::error::StoreError;
use crate::store::{Filter, RecordStore};

/// PostgreSQL SQLSTATE for unique_violation.
const UNIQUE_VIOLATION_CODE: &str = "23505";

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(config.store_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        match HeaderValue::from_str(&self.anon_key) {
            Ok(value) => {
                headers.insert("apikey", value);
            }
            Err(_) => warn!("Supabase anon key is not a valid header value"),
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, StoreError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, StoreError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token);
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await.map_err(|e| {
            error!("Store request to {} failed: {}", url, e);
            StoreError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(classify_failure(status, error_text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

fn classify_failure(status: StatusCode, body: String) -> StoreError {
    let is_unique_violation = status == StatusCode::CONFLICT
        || serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("code").and_then(Value::as_str).map(|c| c == UNIQUE_VIOLATION_CODE))
            .unwrap_or(false);

    if is_unique_violation {
        StoreError::UniqueViolation(body)
    } else if status.is_server_error() {
        StoreError::Unavailable(format!("{}: {}", status, body))
    } else {
        StoreError::Rejected { status: status.as_u16(), message: body }
    }
}

/// Render a scalar the way PostgREST expects it in a filter operand.
fn operand(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn list_operand(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => operand(other),
    }
}

fn condition(filter: &Filter) -> String {
    match filter {
        Filter::Eq(column, value) => format!("{}.eq.{}", column, operand(value)),
        Filter::Neq(column, value) => format!("{}.neq.{}", column, operand(value)),
        Filter::IsNull(column) => format!("{}.is.null", column),
        Filter::In(column, values) => format!(
            "{}.in.({})",
            column,
            values.iter().map(list_operand).collect::<Vec<_>>().join(",")
        ),
        Filter::Contains(column, needle) => format!("{}.ilike.*{}*", column, needle),
        Filter::AnyOf(filters) => format!(
            "or({})",
            filters.iter().map(condition).collect::<Vec<_>>().join(",")
        ),
    }
}

/// Translate a filter into a PostgREST query-string pair.
pub fn query_pair(filter: &Filter) -> (String, String) {
    match filter {
        Filter::AnyOf(filters) => (
            "or".to_string(),
            format!("({})", filters.iter().map(condition).collect::<Vec<_>>().join(",")),
        ),
        other => {
            let rendered = condition(other);
            // "<column>.<op>.<operand>" -> ("<column>", "<op>.<operand>")
            match rendered.split_once('.') {
                Some((column, rest)) => (column.to_string(), rest.to_string()),
                None => (rendered, String::new()),
            }
        }
    }
}

pub fn table_path(table: &str, filters: &[Filter]) -> String {
    let query = filters
        .iter()
        .map(query_pair)
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value)))
        .collect::<Vec<_>>()
        .join("&");

    if query.is_empty() {
        format!("/rest/v1/{}", table)
    } else {
        format!("/rest/v1/{}?{}", table, query)
    }
}

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

/// [`RecordStore`] backed by Supabase's PostgREST API.
///
/// The "one active appointment per slot" guarantee relies on a partial
/// unique index in the database, e.g.
/// `create unique index on appointments (date, time) where status <> 'cancelled';`
pub struct SupabaseRecordStore {
    client: SupabaseClient,
}

impl SupabaseRecordStore {
    pub fn new(config: &AppConfig) -> Self {
        Self { client: SupabaseClient::new(config) }
    }
}

#[async_trait]
impl RecordStore for SupabaseRecordStore {
    async fn query(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        let path = table_path(table, filters);
        self.client.request(Method::GET, &path, None, None).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let path = table_path(table, &[]);
        let mut rows: Vec<Value> = self.client.request_with_headers(
            Method::POST,
            &path,
            None,
            Some(row),
            Some(representation_headers()),
        ).await?;

        if rows.is_empty() {
            return Err(StoreError::Decode(format!("Insert into {} returned no rows", table)));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let path = table_path(table, filters);
        self.client.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(patch),
            Some(representation_headers()),
        ).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_simple_filters() {
        assert_eq!(
            query_pair(&Filter::eq("date", "2024-06-10")),
            ("date".to_string(), "eq.2024-06-10".to_string())
        );
        assert_eq!(
            query_pair(&Filter::neq("status", "cancelled")),
            ("status".to_string(), "neq.cancelled".to_string())
        );
        assert_eq!(
            query_pair(&Filter::is_null("insurer_id")),
            ("insurer_id".to_string(), "is.null".to_string())
        );
    }

    #[test]
    fn renders_in_and_or() {
        assert_eq!(
            query_pair(&Filter::is_in("id", [json!(1), json!(2)])),
            ("id".to_string(), "in.(1,2)".to_string())
        );
        assert_eq!(
            query_pair(&Filter::any_of(vec![Filter::eq("insurer_id", 3), Filter::is_null("insurer_id")])),
            ("or".to_string(), "(insurer_id.eq.3,insurer_id.is.null)".to_string())
        );
    }

    #[test]
    fn table_path_encodes_operands() {
        let path = table_path("appointments", &[Filter::eq("time", "09:00:00")]);
        assert_eq!(path, "/rest/v1/appointments?time=eq.09%3A00%3A00");
    }

    #[test]
    fn conflict_status_is_unique_violation() {
        let err = classify_failure(StatusCode::CONFLICT, "duplicate".to_string());
        assert!(err.is_unique_violation());

        let err = classify_failure(
            StatusCode::BAD_REQUEST,
            json!({ "code": "23505", "message": "duplicate key" }).to_string(),
        );
        assert!(err.is_unique_violation());
    }

    #[test]
    fn server_errors_are_unavailable() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, String::new());
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
