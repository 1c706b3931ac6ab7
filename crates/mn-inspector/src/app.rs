//! Process wiring: every long-lived object is built here once and handed out
//! by `Arc`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::ActionRegistry;
use crate::config::{Config, NetworkRegistry, SharedTunables};
use crate::db::SqliteSnapshots;
use crate::fetch::FetchOrchestrator;
use crate::node::NodeSource;
use crate::node::http::{HttpNodeClient, build_client};
use crate::pool::WorkerPool;
use crate::scheduler::Refresher;
use crate::store::{CacheStore, SnapshotStore};

pub struct Inspector {
    pub registry: Arc<NetworkRegistry>,
    pub cache: Arc<CacheStore>,
    pub fetcher: Arc<FetchOrchestrator>,
    pub actions: ActionRegistry,
    pub refresher: Arc<Refresher>,
}

impl Inspector {
    /// Build against the configured node and SQLite database.
    pub async fn open(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let timeout = config.node.request_timeout();
        let http = build_client(timeout).context("failed to build HTTP client")?;
        let node = Arc::new(HttpNodeClient::new(
            http.clone(),
            config.node.url.clone(),
            config.node.fallback_url.clone(),
            timeout,
        ));
        let snapshots = Arc::new(SqliteSnapshots::open(&config.database).await?);
        Ok(Self::assemble(config, config_path, node, http, snapshots).await)
    }

    /// Build from already constructed node and storage backends.
    pub async fn assemble(
        config: Config,
        config_path: Option<PathBuf>,
        node: Arc<dyn NodeSource>,
        http: reqwest::Client,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let request_timeout = config.node.request_timeout();
        let fetch_timeout = config.node.fetch_timeout();
        let registry = Arc::new(NetworkRegistry::new(config.networks, config.node.node_address.clone()));
        let cache = Arc::new(CacheStore::restore(&registry.names(), snapshots).await);
        let fetcher = Arc::new(FetchOrchestrator::new(
            node,
            http,
            WorkerPool::new(config.fetch_workers),
            request_timeout,
            fetch_timeout,
            config.node.node_address,
        ));
        let refresher = Arc::new(Refresher::new(
            registry.clone(),
            cache.clone(),
            fetcher.clone(),
            WorkerPool::new(config.compute_workers),
            SharedTunables::new(config.tunables),
            config_path,
        ));
        let actions = ActionRegistry::new(registry.clone(), cache.clone(), fetcher.clone());

        Self {
            registry,
            cache,
            fetcher,
            actions,
            refresher,
        }
    }
}
