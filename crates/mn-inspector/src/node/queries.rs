//! Typed queries over [`NodeSource`].
//!
//! Each helper sends one command and digs the interesting part out of the
//! reply. An empty reply is a successful empty answer; a reply with the wrong
//! shape is [`NodeError::Malformed`].

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::{NodeError, NodeSource};
use crate::config::{NetworkConfig, PriceSource};

/// Token ticker -> coins
pub type Balances = BTreeMap<String, f64>;

static PROFIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"profit is ([\d.]+)").expect("valid regex"));
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid regex"));

/// Sync state of one network as seen by our node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub synced: bool,
    pub node_address: Option<String>,
    pub current_state: String,
    pub target_state: String,
}

/// Our masternode's entry in the stake list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub stake_value: Option<String>,
    pub effective_value: Option<String>,
    pub relative_weight: Option<String>,
    pub tx_hash: Option<String>,
    pub sovereign_reward_wallet_address: Option<String>,
    pub sovereign_tax: Option<String>,
    pub total_active_masternodes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocollectStatus {
    pub active: bool,
    pub rewards: f64,
}

fn main_chain(network: &str) -> Value {
    json!({ "net": network, "chain": "main" })
}

/// `result[0]`, or `None` for an empty reply.
fn first_result(result: &Value) -> Option<&Value> {
    match result {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

/// Block lists end with a `{"limit": ...}` marker entry; drop it.
fn strip_limit_entry(mut items: Vec<Value>) -> Vec<Value> {
    if items
        .last()
        .and_then(Value::as_object)
        .is_some_and(|last| last.contains_key("limit"))
    {
        items.pop();
    }
    items
}

/// Number or numeric string.
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Render a reply as text for replies that are human-oriented.
fn reply_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(reply_text).collect::<Vec<_>>().join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub async fn block_count(node: &dyn NodeSource, network: &str) -> Result<u64, NodeError> {
    let result = node.call("block", Some("count"), main_chain(network)).await?;
    let count = first_result(&result)
        .and_then(Value::as_object)
        .and_then(|counts| counts.get("main").or_else(|| counts.values().next()))
        .and_then(lenient_u64)
        .ok_or_else(|| NodeError::Malformed(format!("unexpected block count reply: {result}")))?;
    debug!(network, count, "fetched block count");
    Ok(count)
}

/// Blocks created on the network since the start of `today`.
pub async fn blocks_today(node: &dyn NodeSource, network: &str, today: NaiveDate) -> Result<u64, NodeError> {
    let mut args = main_chain(network);
    args["from_date"] = json!(today.format("%y%m%d").to_string());
    let result = node.call("block", Some("list"), args).await?;
    let blocks = match first_result(&result) {
        Some(Value::Array(items)) => strip_limit_entry(items.clone()),
        Some(other) => return Err(NodeError::Malformed(format!("unexpected block list: {other}"))),
        None => Vec::new(),
    };
    Ok(blocks.len() as u64)
}

/// Blocks we signed (or were first to sign), newest first.
pub async fn signed_blocks(
    node: &dyn NodeSource,
    network: &NetworkConfig,
    first_signed: bool,
) -> Result<Vec<Value>, NodeError> {
    let mut args = main_chain(&network.name);
    let (key, signer) = network
        .signer_arg()
        .ok_or_else(|| NodeError::Malformed(format!("{}: no signer configured", network.name)))?;
    args[key] = json!(signer);

    let subcommand = if first_signed { "list first_signed" } else { "list signed" };
    let result = node.call("block", Some(subcommand), args).await?;
    match first_result(&result) {
        Some(Value::Array(items)) => {
            let blocks = strip_limit_entry(items.clone());
            debug!(network = %network.name, first_signed, count = blocks.len(), "fetched signed blocks");
            Ok(blocks)
        }
        Some(other) => Err(NodeError::Malformed(format!("unexpected block list: {other}"))),
        None => Ok(Vec::new()),
    }
}

/// Full transaction history of `address`, newest first.
pub async fn tx_history(node: &dyn NodeSource, network: &str, address: &str) -> Result<Vec<Value>, NodeError> {
    let args = json!({ "net": network, "addr": address, "limit": null });
    let result = node.call("tx_history", None, args).await?;
    match first_result(&result) {
        Some(Value::Array(items)) => {
            debug!(network, address, count = items.len(), "fetched tx history");
            Ok(items.clone())
        }
        Some(other) => Err(NodeError::Malformed(format!("unexpected tx history: {other}"))),
        None => Ok(Vec::new()),
    }
}

pub async fn wallet_balance(node: &dyn NodeSource, network: &str, address: &str) -> Result<Balances, NodeError> {
    let args = json!({ "net": network, "addr": address });
    let result = node.call("wallet", Some("info"), args).await?;
    let Some(info) = first_result(&result).and_then(first_result) else {
        return Ok(Balances::new());
    };

    let balances = info
        .get("tokens")
        .and_then(Value::as_array)
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(|t| {
                    let ticker = t.get("token")?.get("ticker")?.as_str()?;
                    let coins = lenient_f64(t.get("coins")?)?;
                    Some((ticker.to_string(), coins))
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(balances)
}

pub async fn network_status(
    node: &dyn NodeSource,
    network: &str,
    node_address: Option<&str>,
) -> Result<NetworkStatus, NodeError> {
    let result = node.call("net", Some("get status"), json!({ "net": network })).await?;
    let status = first_result(&result)
        .and_then(|r| r.get("status"))
        .ok_or_else(|| NodeError::Malformed(format!("unexpected status reply: {result}")))?;

    let progress = |chain: &str, key: &str| {
        status
            .get("processed")
            .and_then(|p| p.get(chain))
            .and_then(|c| c.get(key))
            .and_then(lenient_u64)
            .unwrap_or(0)
    };
    let state = |key: &str| {
        status
            .get("states")
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .unwrap_or("N/A")
            .to_string()
    };

    let (zero_current, zero_total) = (progress("zerochain", "current"), progress("zerochain", "in network"));
    let (main_current, main_total) = (progress("main", "current"), progress("main", "in network"));
    debug!(network, zero_current, zero_total, main_current, main_total, "sync check");

    Ok(NetworkStatus {
        synced: zero_current >= zero_total && main_current >= main_total && zero_total > 0 && main_total > 0,
        node_address: node_address.map(str::to_string),
        current_state: state("current"),
        target_state: state("target"),
    })
}

pub async fn node_info(
    node: &dyn NodeSource,
    network: &str,
    node_address: Option<&str>,
) -> Result<NodeInfo, NodeError> {
    let result = node.call("srv_stake", Some("list keys"), json!({ "net": network })).await?;
    let Some(Value::Array(entries)) = first_result(&result) else {
        return Ok(NodeInfo::default());
    };

    let mut info = NodeInfo::default();
    for entry in entries {
        if entry.get("active").and_then(Value::as_str) == Some("true") {
            info.total_active_masternodes += 1;
        }
        let ours = node_address.is_some_and(|addr| entry.get("node_addr").and_then(Value::as_str) == Some(addr));
        if ours {
            info.stake_value = lenient_string(entry.get("stake_value"));
            info.effective_value = lenient_string(entry.get("effective_value"));
            info.relative_weight = lenient_string(entry.get("related_weight"));
            info.tx_hash = lenient_string(entry.get("tx_hash"));
            if let Some(sovereign) = lenient_string(entry.get("sovereign_addr")).filter(|a| a != "null") {
                info.sovereign_reward_wallet_address = Some(sovereign);
                info.sovereign_tax = lenient_string(entry.get("sovereign_tax"));
            }
        }
    }
    Ok(info)
}

pub async fn autocollect_status(node: &dyn NodeSource, network: &str) -> Result<AutocollectStatus, NodeError> {
    let result = node.call("block", Some("autocollect status"), main_chain(network)).await?;
    let text = reply_text(&result);
    let rewards = PROFIT_RE
        .captures_iter(&text)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .sum();
    Ok(AutocollectStatus {
        active: text.contains("is active"),
        rewards,
    })
}

pub async fn block_reward(node: &dyn NodeSource, network: &str) -> Result<Option<f64>, NodeError> {
    let result = node.call("block", Some("reward show"), main_chain(network)).await?;
    let text = reply_text(&result);
    Ok(NUMBER_RE.captures(&text).and_then(|c| c[1].parse().ok()))
}

pub async fn node_version(node: &dyn NodeSource) -> Result<Option<String>, NodeError> {
    let result = node.call("version", None, json!({})).await?;
    let text = reply_text(&result);
    Ok(Some(text.trim().to_string()).filter(|v| !v.is_empty()))
}

/// Size of the chain cell file, when one is configured and present.
pub async fn chain_size(path: Option<&Path>) -> Result<Option<u64>, NodeError> {
    let Some(path) = path else {
        return Ok(None);
    };
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "chain cell file not found");
            Ok(None)
        }
        Err(e) => Err(NodeError::Transport(format!("{}: {e}", path.display()))),
    }
}

/// Scrape the token price, when a source is configured.
pub async fn token_price(
    client: &reqwest::Client,
    source: Option<&PriceSource>,
    timeout: Duration,
) -> Result<Option<f64>, NodeError> {
    let Some(source) = source else {
        return Ok(None);
    };
    let page = super::http::get_text(client, &source.url, timeout).await?;
    let price = source
        .pattern
        .captures(&page)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| NodeError::Malformed(format!("price not found in {}", source.url)))?;
    Ok(Some(price))
}
