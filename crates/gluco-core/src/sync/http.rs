//! HTTP implementation of the backend contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ReadingCategory, RemoteId, RemoteReading};
use crate::sync::remote::{RemoteCreate, RemoteError, RemoteService};
use crate::sync::timestamp::RemoteClock;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// reqwest client for the glucose endpoints
#[derive(Clone)]
pub struct HttpRemoteService {
    base_url: String,
    token: Option<String>,
    clock: RemoteClock,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteService")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteService {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        clock: RemoteClock,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            token: normalize_text_option(token),
            clock,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        let payload = response.json::<Value>().await?;
        check_business_failure(&payload)?;
        Ok(payload)
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteReading>, RemoteError> {
        let payload = self.send(self.request(reqwest::Method::GET, path)).await?;
        Ok(parse_readings(&payload, &self.clock))
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn create_reading(&self, reading: &RemoteCreate) -> Result<RemoteId, RemoteError> {
        let body = CreateBody {
            value: reading.value,
            category: reading.category.as_str(),
            date: reading.timestamp.map(|timestamp| self.clock.format(timestamp)),
            notes: reading.note.as_deref(),
        };
        let payload = self
            .send(self.request(reqwest::Method::POST, "/glucose/create").json(&body))
            .await?;

        extract_remote_id(&payload).ok_or_else(|| {
            RemoteError::InvalidPayload(format!(
                "create response did not include an id: {}",
                compact_text(&payload.to_string())
            ))
        })
    }

    async fn list_mine(&self) -> Result<Vec<RemoteReading>, RemoteError> {
        self.list("/glucose/mine").await
    }

    async fn list_latest(&self) -> Result<Vec<RemoteReading>, RemoteError> {
        self.list("/glucose/mine/latest").await
    }
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    value: f64,
    category: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(alias = "reading_id")]
    id: i64,
    value: f64,
    #[serde(alias = "timestamp", alias = "created_at")]
    date: String,
    #[serde(default, alias = "note")]
    notes: Option<String>,
    #[serde(default, alias = "type")]
    category: Option<String>,
}

impl WireReading {
    fn into_remote(self, clock: &RemoteClock) -> Result<RemoteReading, RemoteError> {
        Ok(RemoteReading {
            remote_id: self.id,
            value: self.value,
            timestamp: clock.parse(&self.date)?,
            note: normalize_text_option(self.notes),
            category: self
                .category
                .as_deref()
                .map_or(ReadingCategory::Other, ReadingCategory::from_tag),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
    detail: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.detail).or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// `{"success": false, ...}` bodies are business rejections even on 2xx
fn check_business_failure(payload: &Value) -> Result<(), RemoteError> {
    if payload.get("success").and_then(Value::as_bool) == Some(false) {
        let message = ["message", "detail", "error"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .unwrap_or("request was not accepted");
        return Err(RemoteError::Rejected(message.to_string()));
    }
    Ok(())
}

fn extract_remote_id(payload: &Value) -> Option<RemoteId> {
    let direct = |value: &Value| {
        ["id", "reading_id", "remote_id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_i64))
    };

    direct(payload).or_else(|| {
        ["data", "reading"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(direct))
    })
}

/// Records from a list payload; malformed entries are skipped
fn parse_readings(payload: &Value, clock: &RemoteClock) -> Vec<RemoteReading> {
    let items: Vec<Value> = match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match ["data", "readings"]
            .iter()
            .find_map(|key| map.get(*key))
        {
            Some(Value::Array(items)) => items.clone(),
            Some(item @ Value::Object(_)) => vec![item.clone()],
            _ if map.contains_key("id") => vec![payload.clone()],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            let parsed = serde_json::from_value::<WireReading>(item)
                .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
                .and_then(|wire| wire.into_remote(clock));
            match parsed {
                Ok(reading) => Some(reading),
                Err(error) => {
                    tracing::warn!("Skipping malformed server reading: {error}");
                    None
                }
            }
        })
        .collect()
}

fn normalize_base_url(raw: String) -> Result<String, RemoteError> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("API base URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" http://localhost:8005/ ".to_string()).unwrap(),
            "http://localhost:8005"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let service = HttpRemoteService::new(
            "http://localhost:8005",
            Some("secret".to_string()),
            RemoteClock::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{service:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn extracts_remote_id_from_known_shapes() {
        assert_eq!(extract_remote_id(&json!({"id": 42})), Some(42));
        assert_eq!(extract_remote_id(&json!({"success": true, "data": {"id": 7}})), Some(7));
        assert_eq!(extract_remote_id(&json!({"reading": {"reading_id": 9}})), Some(9));
        assert_eq!(extract_remote_id(&json!({"ok": true})), None);
    }

    #[test]
    fn business_failure_is_rejected() {
        let payload = json!({"success": false, "message": "value out of range"});
        assert_eq!(
            check_business_failure(&payload),
            Err(RemoteError::Rejected("value out of range".to_string()))
        );
        assert!(check_business_failure(&json!({"success": true})).is_ok());
    }

    #[test]
    fn parses_reading_lists() {
        let clock = RemoteClock::from_offset_minutes(-180);
        let payload = json!({
            "data": [
                {"id": 1, "value": 110.0, "date": "16/01/2025 02:00:00", "notes": " fasting "},
                {"id": 2, "value": 150, "date": "2025-01-16T05:00:00Z", "category": "after_meal"},
                {"id": 3, "value": "bad", "date": "16/01/2025 02:00:00"}
            ]
        });

        let readings = parse_readings(&payload, &clock);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].remote_id, 1);
        assert_eq!(readings[0].timestamp, readings[1].timestamp);
        assert_eq!(readings[0].note.as_deref(), Some("fasting"));
        assert_eq!(readings[0].category, ReadingCategory::Other);
        assert_eq!(readings[1].category, ReadingCategory::AfterMeal);
    }

    #[test]
    fn latest_accepts_a_single_object() {
        let clock = RemoteClock::default();
        let payload = json!({"id": 5, "value": 98.0, "date": "01/02/2025 08:30:00"});
        assert_eq!(parse_readings(&payload, &clock).len(), 1);
    }

    #[test]
    fn parse_api_error_prefers_message() {
        assert_eq!(
            parse_api_error(StatusCode::UNAUTHORIZED, r#"{"detail": "Not authenticated"}"#),
            "Not authenticated (401)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
