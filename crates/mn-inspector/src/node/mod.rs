//! Node access: the command transport and typed query helpers on top of it.
//!
//! The rest of the crate only talks to [`NodeSource`]; how a command reaches
//! the node (HTTP endpoint, fallback RPC, scripted double in tests) is the
//! implementor's business.

pub mod http;
pub mod queries;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the node (or to a price page).
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("endpoint returned HTTP {0}")]
    Status(u16),
    #[error("node reported an error: {0}")]
    Remote(String),
    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl NodeError {
    /// Classify a reqwest failure; `timeout` is the client's configured limit.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            NodeError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            NodeError::Status(status.as_u16())
        } else {
            NodeError::Transport(err.to_string())
        }
    }

    /// Worth retrying on another endpoint?
    pub fn is_connection(&self) -> bool {
        matches!(self, NodeError::Transport(_) | NodeError::Timeout(_))
    }
}

/// Something that answers node commands.
///
/// `subcommand` is the space-separated sub-command (`"list signed"`), and the
/// returned value is the reply's `result` member (`Value::Null` when absent).
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn call(&self, method: &str, subcommand: Option<&str>, arguments: Value) -> Result<Value, NodeError>;
}

/// Outcome of one guarded fetch.
///
/// `Ready` with an empty payload means the node answered "nothing";
/// `Failed` means we don't know (error or timeout, already logged).
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Ready(T),
    Failed,
}

impl<T> Fetched<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Fetched::Ready(value) => Some(value),
            Fetched::Failed => None,
        }
    }

    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Fetched::Ready(value) => Some(value),
            Fetched::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Fetched::Failed)
    }
}

impl<T> Fetched<Option<T>> {
    /// Collapse "not available" and "failed" into one absent value.
    pub fn flatten(self) -> Option<T> {
        self.ready().flatten()
    }
}
