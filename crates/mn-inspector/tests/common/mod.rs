//! Scripted node double and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mn_inspector::app::Inspector;
use mn_inspector::config::{Config, FileConfig};
use mn_inspector::db::SqliteSnapshots;
use mn_inspector::node::{NodeError, NodeSource};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const NODE_ADDRESS: &str = "AAAA::0000::0000::0001";

pub const CONFIG: &str = r#"
[node]
node_address = "AAAA::0000::0000::0001"
timeout_secs = 2

[cache]
block_count_threshold = 30
days_cutoff = 20

[[networks]]
name = "riemann"
wallet = "WALLET_R"
blocks_sign_cert = "riemann.master"
native_ticker = "tKEL"

[[networks]]
name = "raiden"
wallet = "WALLET_D"
cert_pkey_hash = "0xPKEY"
native_ticker = "tCELL"
"#;

/// What the fake node reports for one network.
#[derive(Debug, Clone, Default)]
pub struct NetState {
    pub synced: bool,
    pub block_count: u64,
    pub blocks_today: usize,
    pub signed: Vec<Value>,
    pub first_signed: Vec<Value>,
    /// Address -> newest-first history
    pub history: HashMap<String, Vec<Value>>,
    /// Sovereign wallet listed for our node in the stake list
    pub sovereign: Option<String>,
    /// Blow up while listing blocks
    pub panic_on_blocks: bool,
}

#[derive(Default)]
pub struct FakeNode {
    networks: Mutex<HashMap<String, NetState>>,
}

impl FakeNode {
    pub fn set(&self, network: &str, state: NetState) {
        self.networks.lock().unwrap().insert(network.to_string(), state);
    }

    pub fn update(&self, network: &str, f: impl FnOnce(&mut NetState)) {
        let mut networks = self.networks.lock().unwrap();
        f(networks.entry(network.to_string()).or_default());
    }

    fn state(&self, network: &str) -> Result<NetState, NodeError> {
        self.networks
            .lock()
            .unwrap()
            .get(network)
            .cloned()
            .ok_or_else(|| NodeError::Remote(format!("network {network} not found")))
    }
}

fn with_limit(mut items: Vec<Value>) -> Value {
    items.push(json!({ "limit": 1000 }));
    json!([items])
}

#[async_trait]
impl NodeSource for FakeNode {
    async fn call(&self, method: &str, subcommand: Option<&str>, arguments: Value) -> Result<Value, NodeError> {
        if method == "version" {
            return Ok(json!(["cellframe-node version 5.3-402"]));
        }
        let network = arguments["net"].as_str().unwrap_or_default();
        let state = self.state(network)?;

        let reply = match (method, subcommand) {
            ("net", Some("get status")) => {
                let (current, total) = if state.synced {
                    (state.block_count, state.block_count)
                } else {
                    (1, state.block_count.max(2))
                };
                json!([{ "status": {
                    "processed": {
                        "zerochain": { "current": 12, "in network": 12 },
                        "main": { "current": current, "in network": total }
                    },
                    "states": { "current": "NET_STATE_ONLINE", "target": "NET_STATE_ONLINE" }
                }}])
            }
            ("block", Some("count")) => json!([{ "main": state.block_count }]),
            ("block", Some("list")) => {
                let today = (0..state.blocks_today).map(|i| json!({ "hash": format!("0xtoday{i}") }));
                with_limit(today.collect())
            }
            ("block", Some(list @ ("list signed" | "list first_signed"))) => {
                if state.panic_on_blocks {
                    panic!("block list exploded for {network}");
                }
                if list == "list signed" {
                    with_limit(state.signed)
                } else {
                    with_limit(state.first_signed)
                }
            }
            ("tx_history", None) => {
                let address = arguments["addr"].as_str().unwrap_or_default();
                json!([state.history.get(address).cloned().unwrap_or_default()])
            }
            ("wallet", Some("info")) => json!([[{
                "tokens": [{ "token": { "ticker": "CELL" }, "coins": "12.5" }]
            }]]),
            ("block", Some("reward show")) => json!(["Current block reward is 2.5"]),
            ("block", Some("autocollect status")) => {
                json!(["Autocollect status is active\nprofit is 1.5\nprofit is 2"])
            }
            ("srv_stake", Some("list keys")) => json!([[
                {
                    "node_addr": NODE_ADDRESS,
                    "active": "true",
                    "stake_value": "50000.0",
                    "effective_value": "52000.0",
                    "related_weight": "1.25",
                    "tx_hash": "0xSTAKE",
                    "sovereign_addr": state.sovereign.clone().unwrap_or_else(|| "null".to_string()),
                    "sovereign_tax": "10.0"
                },
                { "node_addr": "BBBB::0000::0000::0002", "active": "true" },
                { "node_addr": "CCCC::0000::0000::0003", "active": "false" }
            ]]),
            _ => return Err(NodeError::Remote(format!("unexpected command {method} {subcommand:?}"))),
        };
        Ok(reply)
    }
}

pub fn block_at(ts: DateTime<Utc>, hash: &str) -> Value {
    json!({ "hash": hash, "ts_create": ts.to_rfc2822() })
}

pub fn reward_at(ts: DateTime<Utc>, hash: &str, coins: &str) -> Value {
    json!({
        "hash": hash,
        "status": "ACCEPTED",
        "service": "block_reward",
        "tx_created": ts.to_rfc2822(),
        "data": [{ "tx_type": "recv", "recv_coins": coins, "token": "CELL", "source_address": "null" }]
    })
}

pub fn transfer_at(ts: DateTime<Utc>, hash: &str, coins: &str) -> Value {
    json!({
        "hash": hash,
        "status": "ACCEPTED",
        "service": "transfer",
        "tx_created": ts.to_rfc2822(),
        "data": [{ "tx_type": "recv", "recv_coins": coins, "token": "CELL" }]
    })
}

pub async fn inspector(node: Arc<FakeNode>, db: &Path, config: &str) -> Inspector {
    let config = Config::from_file(FileConfig::parse(config).unwrap());
    let snapshots = Arc::new(SqliteSnapshots::open(db).await.unwrap());
    Inspector::assemble(config, None, node, reqwest::Client::new(), snapshots).await
}
