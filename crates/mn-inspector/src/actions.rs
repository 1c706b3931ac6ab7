//! Name-based access to cached and live per-network values.
//!
//! Cached names come from the statically declared snapshot fields; live
//! names are answered by asking the node (or the registry) on every request.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::NetworkRegistry;
use crate::fetch::FetchOrchestrator;
use crate::node::Fetched;
use crate::snapshot::field_names;
use crate::store::CacheStore;

/// Expands to every available action
pub const ALL: &str = "all";
/// Lists action names instead of resolving them
pub const HELP: &str = "help";

/// Actions never served from the cache.
pub const LIVE_ACTIONS: &[&str] = &[
    "autocollect_status",
    "network_status",
    "reward_wallet_address",
    "sovereign_reward_wallet_address",
];

pub const SYSTEM_ACTIONS: &[&str] = &["active_networks", "current_node_version", "node_address"];

/// What one network contributes to a query response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NetworkReply {
    Unsupported(String),
    Help(Vec<String>),
    Values(BTreeMap<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SystemReply {
    Help(Vec<String>),
    Values(BTreeMap<String, Value>),
}

fn to_value<T: Serialize>(fetched: Fetched<T>) -> Value {
    fetched
        .ready()
        .and_then(|value| serde_json::to_value(value).ok())
        .unwrap_or(Value::Null)
}

pub struct ActionRegistry {
    registry: Arc<NetworkRegistry>,
    cache: Arc<CacheStore>,
    fetcher: Arc<FetchOrchestrator>,
}

impl ActionRegistry {
    pub fn new(registry: Arc<NetworkRegistry>, cache: Arc<CacheStore>, fetcher: Arc<FetchOrchestrator>) -> Self {
        Self {
            registry,
            cache,
            fetcher,
        }
    }

    /// Every network action name, sorted. Doesn't depend on cache contents.
    pub fn action_names() -> Vec<String> {
        let mut names = field_names();
        names.extend(LIVE_ACTIONS.iter().map(|s| s.to_string()));
        names.sort();
        names.dedup();
        names
    }

    /// Names that `all` expands to for `network`: the fields its snapshot
    /// currently holds plus the live actions.
    pub fn available_for(&self, network: &str) -> Vec<String> {
        let mut names: Vec<String> = self.cache.fields(network).keys().cloned().collect();
        names.extend(LIVE_ACTIONS.iter().map(|s| s.to_string()));
        names.sort();
        names.dedup();
        names
    }

    /// Resolve `requested` for each of `networks`.
    pub async fn network_actions(&self, networks: &[String], requested: &[String]) -> BTreeMap<String, NetworkReply> {
        let mut replies = BTreeMap::new();
        for network in networks {
            let reply = if self.registry.get(network).is_none() {
                warn!(network = %network, "requested network is not configured");
                NetworkReply::Unsupported("unsupported network".to_string())
            } else if requested.iter().any(|a| a == HELP) {
                NetworkReply::Help(Self::action_names())
            } else {
                let names = if requested.iter().any(|a| a == ALL) {
                    self.available_for(network)
                } else {
                    requested.to_vec()
                };
                NetworkReply::Values(self.resolve(network, names).await)
            };
            replies.insert(network.clone(), reply);
        }
        replies
    }

    async fn resolve(&self, network: &str, names: Vec<String>) -> BTreeMap<String, Value> {
        let fields = self.cache.fields(network);
        let declared = field_names();

        let lookups = names.into_iter().map(|name| {
            let cached = fields.get(&name).cloned();
            let known = declared.contains(&name);
            async move {
                let value = if LIVE_ACTIONS.contains(&name.as_str()) {
                    self.live(network, &name).await
                } else if let Some(value) = cached {
                    value
                } else if known {
                    Value::Null
                } else {
                    Value::String(format!("unsupported network action: {name}"))
                };
                (name, value)
            }
        });
        join_all(lookups).await.into_iter().collect()
    }

    async fn live(&self, network: &str, action: &str) -> Value {
        match action {
            "autocollect_status" => to_value(self.fetcher.autocollect_status(network).await),
            "network_status" => to_value(self.fetcher.network_status(network).await),
            "reward_wallet_address" => self
                .registry
                .get(network)
                .map(|n| Value::from(n.wallet.clone()))
                .unwrap_or(Value::Null),
            "sovereign_reward_wallet_address" => self
                .registry
                .sovereign_address(network)
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Resolve node-wide actions.
    pub async fn system_actions(&self, requested: &[String]) -> SystemReply {
        if requested.iter().any(|a| a == HELP) {
            return SystemReply::Help(SYSTEM_ACTIONS.iter().map(|s| s.to_string()).collect());
        }
        let names: Vec<String> = if requested.iter().any(|a| a == ALL) {
            SYSTEM_ACTIONS.iter().map(|s| s.to_string()).collect()
        } else {
            requested.to_vec()
        };

        let mut values = BTreeMap::new();
        for name in names {
            let value = match name.as_str() {
                "current_node_version" => self.fetcher.node_version().await.flatten().map_or(Value::Null, Value::from),
                "active_networks" => Value::from(self.registry.names()),
                "node_address" => self.registry.node_address().map_or(Value::Null, Value::from),
                other => Value::String(format!("unknown system action: {other}")),
            };
            values.insert(name, value);
        }
        SystemReply::Values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_sorted_and_include_live_actions() {
        let names = ActionRegistry::action_names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        for live in LIVE_ACTIONS {
            assert!(names.iter().any(|n| n == live));
        }
        assert!(names.iter().any(|n| n == "signed_blocks_all_sums_daily"));
        assert!(names.iter().any(|n| n == "sovereign_wallet_total_rewards"));
    }

    #[test]
    fn unsupported_markers_serialize_as_plain_strings() {
        let reply = NetworkReply::Unsupported("unsupported network".into());
        assert_eq!(serde_json::to_value(reply).unwrap(), Value::from("unsupported network"));
    }
}
