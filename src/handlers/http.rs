//! Built-in `http_call` action handler
//!
//! Sends one HTTP request and returns `{statusCode, headers, body}` with
//! the body parsed as JSON when possible, raw text otherwise. An
//! `expectedStatusCode` mismatch is a handler failure carrying the actual
//! status, so retry policies can match it with `retryOn`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::common::{Error, Result};
use crate::engine::{ActionHandler, ContextSnapshot, HandlerError};

pub struct HttpCallHandler {
    client: reqwest::Client,
}

impl HttpCallHandler {
    /// Create a handler with a per-request timeout in seconds
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ActionHandler for HttpCallHandler {
    async fn execute(
        &self,
        params: &Value,
        _ctx: &ContextSnapshot,
    ) -> std::result::Result<Value, HandlerError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::new("'url' is required for http_call"))?;

        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| HandlerError::new(format!("invalid HTTP method '{method}'")))?;

        debug!(%method, url, "http_call");
        let mut request = self.client.request(method, url);

        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        if let Some(body) = params.get("body") {
            if !body.is_null() {
                request = request.json(body);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::new(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), Value::String(value.to_string()));
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| HandlerError::with_status(format!("failed to read body: {e}"), status))?;

        // Parse JSON when possible, keep raw text otherwise
        let body = if text.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if let Some(expected) = params.get("expectedStatusCode").and_then(Value::as_u64) {
            if u64::from(status) != expected {
                return Err(HandlerError::with_status(
                    format!("expected status {expected}, got {status}"),
                    status,
                ));
            }
        }

        Ok(json!({
            "statusCode": status,
            "headers": headers,
            "body": body
        }))
    }
}
