//! Background refresh loop.
//!
//! One task walks the configured networks in order, decides per network
//! whether the cached snapshot is worth rebuilding, and commits the rebuilt
//! snapshot to the [`CacheStore`]. A network's failure (or panic) is logged
//! and never stops the loop.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::aggregate::{block_stats, history_stats};
use crate::config::{NetworkConfig, NetworkRegistry, SharedTunables, Tunables};
use crate::fetch::FetchOrchestrator;
use crate::node::Fetched;
use crate::pool::WorkerPool;
use crate::snapshot::CacheEntry;
use crate::store::CacheStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSynced,
    StatusUnavailable,
    BlockCountUnavailable,
    /// Too few new blocks and the snapshot isn't stale yet
    BelowThreshold,
    /// Stale, but the node has nothing we haven't seen
    NothingNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Skip(SkipReason),
    /// `forced` when staleness, not the block delta, triggered it
    Refresh { forced: bool },
}

/// Delta/staleness policy. `elapsed` is the age of the cached snapshot, or
/// `None` when nothing has been cached yet (never stale).
pub fn decide(block_diff: i64, elapsed: Option<Duration>, tunables: &Tunables) -> RefreshDecision {
    let stale = elapsed.is_some_and(|e| e >= tunables.force_refresh_interval);
    let below_threshold = block_diff < tunables.block_count_threshold;

    match (stale, below_threshold) {
        (true, _) if block_diff <= 0 => RefreshDecision::Skip(SkipReason::NothingNew),
        (true, forced) => RefreshDecision::Refresh { forced },
        (false, true) => RefreshDecision::Skip(SkipReason::BelowThreshold),
        (false, false) => RefreshDecision::Refresh { forced: false },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Skipped(SkipReason),
    Refreshed { forced: bool, block_count: u64 },
}

/// Age of a snapshot; clock skew into the future reads as zero.
fn snapshot_age(last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    last_updated.map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
}

pub struct Refresher {
    registry: Arc<NetworkRegistry>,
    cache: Arc<CacheStore>,
    fetcher: Arc<FetchOrchestrator>,
    compute: WorkerPool,
    tunables: SharedTunables,
    config_path: Option<PathBuf>,
}

impl Refresher {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        cache: Arc<CacheStore>,
        fetcher: Arc<FetchOrchestrator>,
        compute: WorkerPool,
        tunables: SharedTunables,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            registry,
            cache,
            fetcher,
            compute,
            tunables,
            config_path,
        }
    }

    /// Start the loop, unless there is nothing to refresh.
    pub fn spawn(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.registry.is_empty() {
            warn!("no networks configured, cache refresh disabled");
            return None;
        }
        info!(networks = ?self.registry.names(), "starting cache refresh loop");
        Some(tokio::spawn(async move { self.run().await }))
    }

    pub async fn run(&self) {
        loop {
            self.run_pass().await;
            tokio::time::sleep(self.tunables.current().refresh_interval).await;
        }
    }

    /// One pass over every network. Returns each network's outcome, `None`
    /// for networks whose cycle failed.
    pub async fn run_pass(&self) -> Vec<(String, Option<RefreshOutcome>)> {
        if let Some(path) = &self.config_path {
            self.tunables.reload_from(path);
        }

        let mut outcomes = Vec::with_capacity(self.registry.all().len());
        for network in self.registry.all() {
            let cycle = AssertUnwindSafe(self.refresh_network(network)).catch_unwind().await;
            let outcome = match cycle {
                Ok(Ok(outcome)) => Some(outcome),
                Ok(Err(e)) => {
                    error!(network = %network.name, error = %format!("{e:#}"), "refresh cycle failed");
                    None
                }
                Err(_) => {
                    error!(network = %network.name, "refresh cycle panicked");
                    None
                }
            };
            outcomes.push((network.name.clone(), outcome));
        }
        outcomes
    }

    /// Check, fetch, aggregate and commit one network.
    pub async fn refresh_network(&self, network: &NetworkConfig) -> Result<RefreshOutcome> {
        let name = network.name.as_str();
        let tunables = self.tunables.current();

        match self.fetcher.network_status(name).await {
            Fetched::Ready(status) if status.synced => {}
            Fetched::Ready(status) => {
                info!(network = name, state = %status.current_state, "not synced, skipping this cycle");
                return Ok(RefreshOutcome::Skipped(SkipReason::NotSynced));
            }
            Fetched::Failed => return Ok(RefreshOutcome::Skipped(SkipReason::StatusUnavailable)),
        }

        let Fetched::Ready(current_blocks) = self.fetcher.block_count(name).await else {
            return Ok(RefreshOutcome::Skipped(SkipReason::BlockCountUnavailable));
        };

        let cached = self.cache.get(name);
        let block_diff = current_blocks as i64 - cached.block_count as i64;
        let elapsed = snapshot_age(cached.last_updated, Utc::now());

        let forced = match decide(block_diff, elapsed, &tunables) {
            RefreshDecision::Refresh { forced } => forced,
            RefreshDecision::Skip(reason) => {
                info!(
                    network = name,
                    block_diff,
                    threshold = tunables.block_count_threshold,
                    elapsed_secs = elapsed.map(|e| e.as_secs()),
                    ?reason,
                    "skipping cache refresh"
                );
                return Ok(RefreshOutcome::Skipped(reason));
            }
        };
        if forced {
            info!(network = name, block_diff, elapsed_secs = elapsed.map(|e| e.as_secs()), "forcing cache refresh");
        }

        let started = Instant::now();
        info!(network = name, block_diff, "caching data");

        let node_info = self.fetcher.node_info(name).await;
        if let Some(address) = node_info.as_ready().and_then(|i| i.sovereign_reward_wallet_address.as_deref()) {
            self.registry.remember_sovereign(name, address);
        }
        let sovereign = self.registry.sovereign_address(name);

        let now = Utc::now();
        let raw = self.fetcher.fetch_all(network, sovereign.as_deref(), now.date_naive()).await;

        let cutoff = tunables.days_cutoff;
        let (signed_blocks, first_signed_blocks, reward_wallet, sovereign_wallet) = tokio::try_join!(
            self.reduce(raw.signed_blocks.ready(), now, cutoff, block_stats),
            self.reduce(raw.first_signed_blocks.ready(), now, cutoff, block_stats),
            self.reduce(raw.wallet_history.ready(), now, cutoff, history_stats),
            self.reduce(raw.sovereign_history.and_then(Fetched::ready), now, cutoff, history_stats),
        )
        .context("aggregation task failed")?;

        let entry = CacheEntry {
            block_count: raw.block_count.ready().unwrap_or(current_blocks),
            previous_block_count: cached.block_count,
            block_count_today: raw.blocks_today.ready(),
            chain_size: raw.chain_size.flatten(),
            current_block_reward: raw.block_reward.flatten(),
            token_price: raw.token_price.flatten(),
            native_ticker: network.native_ticker.clone(),
            days_cutoff: cutoff,
            reward_wallet_balance: raw.wallet_balance.ready(),
            sovereign_wallet_balance: raw.sovereign_balance.and_then(Fetched::ready),
            signed_blocks,
            first_signed_blocks,
            reward_wallet,
            sovereign_wallet,
            node_info: node_info.ready(),
            last_updated: Some(Utc::now()),
        };
        let block_count = entry.block_count;
        self.cache.commit(name, entry).await;

        info!(
            network = name,
            block_count,
            forced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cached data (memory + disk updated)"
        );
        Ok(RefreshOutcome::Refreshed { forced, block_count })
    }

    /// Run one reducer on the compute pool; a failed fetch stays absent.
    async fn reduce<R>(
        &self,
        raw: Option<Vec<Value>>,
        now: DateTime<Utc>,
        days_cutoff: u32,
        reducer: fn(&[Value], DateTime<Utc>, u32) -> R,
    ) -> Result<Option<R>, JoinError>
    where
        R: Send + 'static,
    {
        match raw {
            Some(list) => self
                .compute
                .run_blocking(move || reducer(&list, now, days_cutoff))
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}
