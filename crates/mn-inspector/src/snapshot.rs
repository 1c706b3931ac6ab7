//! The committed per-network snapshot and its queryable field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::aggregate::{BlockStats, RewardStats};
use crate::node::queries::{Balances, NodeInfo};

/// Everything one refresh cycle computed for a network.
///
/// `None` means the value could not be computed this cycle (fetch failed or
/// nothing configured); an empty list yields a zeroed stat instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheEntry {
    pub block_count: u64,
    pub previous_block_count: u64,
    pub block_count_today: Option<u64>,
    pub chain_size: Option<u64>,
    pub current_block_reward: Option<f64>,
    pub token_price: Option<f64>,
    pub native_ticker: Option<String>,
    pub days_cutoff: u32,
    pub reward_wallet_balance: Option<Balances>,
    pub sovereign_wallet_balance: Option<Balances>,
    pub signed_blocks: Option<BlockStats>,
    pub first_signed_blocks: Option<BlockStats>,
    pub reward_wallet: Option<RewardStats>,
    pub sovereign_wallet: Option<RewardStats>,
    pub node_info: Option<NodeInfo>,
    pub last_updated: Option<DateTime<Utc>>,
}

// =============================================================================
// Field names
// =============================================================================

const SCALAR_FIELDS: &[&str] = &[
    "block_count",
    "block_count_today",
    "cache_last_updated",
    "chain_size",
    "current_block_reward",
    "days_cutoff",
    "native_ticker",
    "token_price",
];

const BLOCK_PREFIXES: &[&str] = &["signed_blocks", "first_signed_blocks"];

const BLOCK_SUFFIXES: &[&str] = &[
    "count",
    "latest",
    "earliest",
    "today",
    "today_amount",
    "yesterday",
    "yesterday_amount",
    "daily",
    "daily_amount",
    "all_sums_daily",
];

const WALLET_PREFIXES: &[&str] = &["reward_wallet", "sovereign_wallet"];

const WALLET_SUFFIXES: &[&str] = &[
    "balance",
    "total_rewards",
    "latest_reward",
    "earliest_reward",
    "today_rewards",
    "yesterday_rewards",
    "daily_rewards",
    "biggest_reward",
    "smallest_reward",
    "all_sums_daily",
];

// The sovereign wallet address is answered live, not from here.
const NODE_INFO_FIELDS: &[&str] = &[
    "effective_value",
    "relative_weight",
    "sovereign_tax",
    "stake_value",
    "total_active_masternodes",
    "tx_hash",
];

/// Every field name a [`CacheEntry`] can expose, whether or not a given entry
/// currently holds a value for it.
pub fn field_names() -> Vec<String> {
    let mut names: Vec<String> = SCALAR_FIELDS.iter().map(|s| s.to_string()).collect();
    names.extend(NODE_INFO_FIELDS.iter().map(|s| s.to_string()));
    for prefix in BLOCK_PREFIXES {
        names.extend(BLOCK_SUFFIXES.iter().map(|suffix| format!("{prefix}_{suffix}")));
    }
    for prefix in WALLET_PREFIXES {
        names.extend(WALLET_SUFFIXES.iter().map(|suffix| format!("{prefix}_{suffix}")));
    }
    names.sort();
    names
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn put<T: Serialize>(fields: &mut BTreeMap<String, Value>, name: impl Into<String>, value: &T) {
    fields.insert(name.into(), to_value(value));
}

fn block_fields(fields: &mut BTreeMap<String, Value>, prefix: &str, stats: &BlockStats) {
    put(fields, format!("{prefix}_count"), &stats.count);
    put(fields, format!("{prefix}_latest"), &stats.latest);
    put(fields, format!("{prefix}_earliest"), &stats.earliest);
    put(fields, format!("{prefix}_today"), &stats.today.items);
    put(fields, format!("{prefix}_today_amount"), &stats.today.count);
    put(fields, format!("{prefix}_yesterday"), &stats.yesterday.items);
    put(fields, format!("{prefix}_yesterday_amount"), &stats.yesterday.count);
    put(fields, format!("{prefix}_daily"), &stats.rolling_window.items);
    put(fields, format!("{prefix}_daily_amount"), &stats.rolling_window.count);
    let sums: Vec<Value> = stats
        .daily_buckets
        .iter()
        .map(|b| json!({ "date": b.date, "block_count": b.sum }))
        .collect();
    put(fields, format!("{prefix}_all_sums_daily"), &sums);
}

fn wallet_fields(fields: &mut BTreeMap<String, Value>, prefix: &str, stats: &RewardStats) {
    let window = &stats.window;
    put(fields, format!("{prefix}_total_rewards"), &stats.total_rewards);
    put(fields, format!("{prefix}_latest_reward"), &window.latest);
    put(fields, format!("{prefix}_earliest_reward"), &window.earliest);
    put(fields, format!("{prefix}_today_rewards"), &window.today.items);
    put(fields, format!("{prefix}_yesterday_rewards"), &window.yesterday.items);
    put(fields, format!("{prefix}_daily_rewards"), &window.rolling_window.items);
    put(fields, format!("{prefix}_biggest_reward"), &stats.biggest);
    put(fields, format!("{prefix}_smallest_reward"), &stats.smallest);
    let sums: Vec<Value> = window
        .daily_buckets
        .iter()
        .map(|b| json!({ "date": b.date, "total_rewards": b.sum }))
        .collect();
    put(fields, format!("{prefix}_all_sums_daily"), &sums);
}

impl CacheEntry {
    /// True until the first refresh (or restore) populates the entry.
    pub fn is_empty(&self) -> bool {
        self.last_updated.is_none()
    }

    /// The entry flattened to its queryable fields. Values that weren't
    /// computed are left out, so sovereign fields only show up for networks
    /// with a sovereign wallet.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        if self.is_empty() {
            return fields;
        }

        put(&mut fields, "block_count", &self.block_count);
        put(&mut fields, "days_cutoff", &self.days_cutoff);
        put(&mut fields, "cache_last_updated", &self.last_updated);
        let optional = [
            ("block_count_today", self.block_count_today.map(Value::from)),
            ("chain_size", self.chain_size.map(Value::from)),
            ("current_block_reward", self.current_block_reward.map(Value::from)),
            ("token_price", self.token_price.map(Value::from)),
            ("native_ticker", self.native_ticker.clone().map(Value::from)),
            ("reward_wallet_balance", self.reward_wallet_balance.as_ref().map(to_value)),
            ("sovereign_wallet_balance", self.sovereign_wallet_balance.as_ref().map(to_value)),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                fields.insert(name.to_string(), value);
            }
        }

        if let Some(stats) = &self.signed_blocks {
            block_fields(&mut fields, "signed_blocks", stats);
        }
        if let Some(stats) = &self.first_signed_blocks {
            block_fields(&mut fields, "first_signed_blocks", stats);
        }
        if let Some(stats) = &self.reward_wallet {
            wallet_fields(&mut fields, "reward_wallet", stats);
        }
        if let Some(stats) = &self.sovereign_wallet {
            wallet_fields(&mut fields, "sovereign_wallet", stats);
        }

        if let Some(info) = &self.node_info
            && let Value::Object(map) = to_value(info)
        {
            fields.extend(node_info_fields(map));
        }
        fields
    }
}

fn node_info_fields(map: Map<String, Value>) -> impl Iterator<Item = (String, Value)> {
    map.into_iter()
        .filter(|(key, value)| NODE_INFO_FIELDS.contains(&key.as_str()) && !value.is_null())
}
