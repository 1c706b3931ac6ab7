//! HTTP transport for node commands.
//!
//! Posts the node's JSON command envelope to the primary endpoint and falls
//! back to the secondary one when the primary can't be reached.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{NodeError, NodeSource};

/// Command envelope understood by the node's CLI server.
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    method: &'a str,
    subcommand: Option<Vec<&'a str>>,
    arguments: &'a Value,
    id: &'a str,
}

/// Build the shared HTTP client used for node calls and price pages.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, NodeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(5)
        .build()
        .map_err(|e| NodeError::Transport(format!("failed to create HTTP client: {e}")))
}

/// [`NodeSource`] speaking JSON over HTTP.
pub struct HttpNodeClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(client: reqwest::Client, url: String, fallback_url: Option<String>, timeout: Duration) -> Self {
        let mut endpoints = vec![url];
        endpoints.extend(fallback_url);
        Self {
            client,
            endpoints,
            timeout,
        }
    }

    async fn post(&self, url: &str, body: &CommandRequest<'_>) -> Result<Value, NodeError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(NodeError::Status(response.status().as_u16()));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| NodeError::Malformed(format!("invalid JSON from {url}: {e}")))?;

        unwrap_reply(reply)
    }
}

/// Pull `result` out of a reply, surfacing a non-empty `errors` member.
fn unwrap_reply(mut reply: Value) -> Result<Value, NodeError> {
    if let Some(errors) = reply.get("errors")
        && !errors.is_null()
        && errors.as_array().is_none_or(|list| !list.is_empty())
    {
        return Err(NodeError::Remote(errors.to_string()));
    }
    Ok(reply.get_mut("result").map(Value::take).unwrap_or(Value::Null))
}

#[async_trait]
impl NodeSource for HttpNodeClient {
    async fn call(&self, method: &str, subcommand: Option<&str>, arguments: Value) -> Result<Value, NodeError> {
        let body = CommandRequest {
            method,
            subcommand: subcommand.map(|s| s.split_whitespace().collect()),
            arguments: &arguments,
            id: "1",
        };

        let mut last_err = NodeError::Transport("no endpoints configured".to_string());
        for url in &self.endpoints {
            match self.post(url, &body).await {
                Ok(result) => {
                    debug!(method, ?subcommand, url = %url, "node call ok");
                    return Ok(result);
                }
                Err(e) if e.is_connection() => {
                    warn!(method, url = %url, error = %e, "node endpoint unreachable, trying next");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

/// Fetch a page as text (token price scraping).
pub async fn get_text(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<String, NodeError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| NodeError::from_reqwest(e, timeout))?;

    if !response.status().is_success() {
        return Err(NodeError::Status(response.status().as_u16()));
    }

    response.text().await.map_err(|e| NodeError::from_reqwest(e, timeout))
}
