//! Concurrent fetches against the node for one network.
//!
//! Every query goes through [`FetchOrchestrator::guarded`]: it waits for a
//! slot on the fetch pool, carries its own timeout, and turns any failure
//! into a logged [`Fetched::Failed`]. Nothing here returns an error.

use chrono::NaiveDate;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::node::queries::{self, AutocollectStatus, Balances, NetworkStatus, NodeInfo};
use crate::node::{Fetched, NodeError, NodeSource};
use crate::pool::WorkerPool;

/// Raw results of one network's fan-out.
#[derive(Debug, Clone)]
pub struct RawFetch {
    pub block_count: Fetched<u64>,
    pub blocks_today: Fetched<u64>,
    pub first_signed_blocks: Fetched<Vec<Value>>,
    pub signed_blocks: Fetched<Vec<Value>>,
    pub wallet_history: Fetched<Vec<Value>>,
    /// `None` when the network has no sovereign wallet
    pub sovereign_history: Option<Fetched<Vec<Value>>>,
    pub block_reward: Fetched<Option<f64>>,
    pub chain_size: Fetched<Option<u64>>,
    pub token_price: Fetched<Option<f64>>,
    pub wallet_balance: Fetched<Balances>,
    pub sovereign_balance: Option<Fetched<Balances>>,
}

pub struct FetchOrchestrator {
    node: Arc<dyn NodeSource>,
    http: reqwest::Client,
    pool: WorkerPool,
    /// Per HTTP request (price pages)
    request_timeout: Duration,
    /// Per guarded fetch, fallback attempts included
    timeout: Duration,
    node_address: Option<String>,
}

impl FetchOrchestrator {
    pub fn new(
        node: Arc<dyn NodeSource>,
        http: reqwest::Client,
        pool: WorkerPool,
        request_timeout: Duration,
        timeout: Duration,
        node_address: Option<String>,
    ) -> Self {
        Self {
            node,
            http,
            pool,
            request_timeout,
            timeout,
            node_address,
        }
    }

    async fn guarded<T, F>(&self, network: &str, field: &'static str, fut: F) -> Fetched<T>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        match self.pool.run(tokio::time::timeout(self.timeout, fut)).await {
            Ok(Ok(value)) => Fetched::Ready(value),
            Ok(Err(e)) => {
                warn!(network, field, error = %e, "fetch failed");
                Fetched::Failed
            }
            Err(_) => {
                warn!(network, field, timeout_secs = self.timeout.as_secs(), "fetch timed out");
                Fetched::Failed
            }
        }
    }

    pub async fn network_status(&self, network: &str) -> Fetched<NetworkStatus> {
        let query = queries::network_status(self.node.as_ref(), network, self.node_address.as_deref());
        self.guarded(network, "network_status", query).await
    }

    pub async fn block_count(&self, network: &str) -> Fetched<u64> {
        self.guarded(network, "block_count", queries::block_count(self.node.as_ref(), network))
            .await
    }

    pub async fn node_info(&self, network: &str) -> Fetched<NodeInfo> {
        let query = queries::node_info(self.node.as_ref(), network, self.node_address.as_deref());
        self.guarded(network, "node_info", query).await
    }

    pub async fn autocollect_status(&self, network: &str) -> Fetched<AutocollectStatus> {
        let query = queries::autocollect_status(self.node.as_ref(), network);
        self.guarded(network, "autocollect_status", query).await
    }

    pub async fn node_version(&self) -> Fetched<Option<String>> {
        self.guarded("-", "node_version", queries::node_version(self.node.as_ref()))
            .await
    }

    /// Issue every per-network query at once and wait for all of them.
    pub async fn fetch_all(&self, network: &NetworkConfig, sovereign: Option<&str>, today: NaiveDate) -> RawFetch {
        let name = network.name.as_str();
        let node = self.node.as_ref();

        let sovereign_history = async {
            match sovereign {
                Some(address) => Some(
                    self.guarded(name, "sovereign_history", queries::tx_history(node, name, address))
                        .await,
                ),
                None => None,
            }
        };
        let sovereign_balance = async {
            match sovereign {
                Some(address) => Some(
                    self.guarded(name, "sovereign_balance", queries::wallet_balance(node, name, address))
                        .await,
                ),
                None => None,
            }
        };

        let (
            block_count,
            blocks_today,
            first_signed_blocks,
            signed_blocks,
            wallet_history,
            sovereign_history,
            block_reward,
            chain_size,
            token_price,
            wallet_balance,
            sovereign_balance,
        ) = tokio::join!(
            self.guarded(name, "block_count", queries::block_count(node, name)),
            self.guarded(name, "block_count_today", queries::blocks_today(node, name, today)),
            self.guarded(name, "first_signed_blocks", queries::signed_blocks(node, network, true)),
            self.guarded(name, "signed_blocks", queries::signed_blocks(node, network, false)),
            self.guarded(name, "wallet_history", queries::tx_history(node, name, &network.wallet)),
            sovereign_history,
            self.guarded(name, "current_block_reward", queries::block_reward(node, name)),
            self.guarded(name, "chain_size", queries::chain_size(network.chain_path.as_deref())),
            self.guarded(
                name,
                "token_price",
                queries::token_price(&self.http, network.price.as_ref(), self.request_timeout)
            ),
            self.guarded(name, "wallet_balance", queries::wallet_balance(node, name, &network.wallet)),
            sovereign_balance,
        );

        debug!(network = name, sovereign = sovereign.is_some(), "fetch fan-out complete");
        RawFetch {
            block_count,
            blocks_today,
            first_signed_blocks,
            signed_blocks,
            wallet_history,
            sovereign_history,
            block_reward,
            chain_size,
            token_price,
            wallet_balance,
            sovereign_balance,
        }
    }
}
