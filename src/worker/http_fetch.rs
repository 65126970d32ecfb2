//! `http_fetch` executor: GET a URL and return its JSON body.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ExecutionError;
use crate::task::DEFAULT_KIND;
use crate::worker::executor::TaskExecutor;

/// Fetches a URL and wraps the decoded JSON body.
///
/// Accepted payloads: `"https://host/path"` or `{"url": "https://host/path"}`.
/// The result is `{"message", "result", "status"}` where `status` is the
/// response status line, e.g. `"200 OK"`.
pub struct HttpFetchExecutor {
    client: reqwest::Client,
}

impl HttpFetchExecutor {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the target URL out of the payload.
fn payload_url(payload: &Value) -> Result<&str, ExecutionError> {
    match payload {
        Value::String(url) => Ok(url.as_str()),
        Value::Object(map) => map.get("url").and_then(Value::as_str).ok_or_else(|| {
            ExecutionError::InvalidPayload("object payload needs a string 'url' field".into())
        }),
        other => Err(ExecutionError::InvalidPayload(format!(
            "expected a URL string, got {other}"
        ))),
    }
}

fn parse_url(raw: &str) -> Result<Url, ExecutionError> {
    let url = Url::parse(raw).map_err(|e| ExecutionError::Request(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ExecutionError::Request(format!(
            "{raw}: unsupported scheme '{scheme}'"
        ))),
    }
}

#[async_trait]
impl TaskExecutor for HttpFetchExecutor {
    fn kind(&self) -> &str {
        DEFAULT_KIND
    }

    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        let raw = payload_url(payload)?;
        let url = parse_url(raw)?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(ExecutionError::HttpStatus {
                status: status.to_string(),
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ExecutionError::Decode(e.to_string()))?;
        debug!(url = %raw, status = %status, "Fetched URL");

        Ok(json!({
            "message": format!("Request executed successfully for URL {raw}"),
            "result": body,
            "status": status.to_string(),
        }))
    }
}
