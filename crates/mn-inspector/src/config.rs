//! Configuration for the inspector cache.
//!
//! Everything comes from one TOML file. Networks are listed explicitly under
//! `[[networks]]` and/or discovered from the node's own network config files.
//! The `[cache]` tunables can be re-read while running (see [`SharedTunables`]).

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub discovery: Option<DiscoverySection>,
    #[serde(default)]
    pub networks: Vec<NetworkSection>,
}

/// How to reach the node
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_node_url")]
    pub url: String,
    /// Tried when `url` is unreachable
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Our node's address, matched against stake lists
    #[serde(default)]
    pub node_address: Option<String>,
}

impl NodeSection {
    /// Limit for a single HTTP request to one endpoint.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Limit for one guarded fetch: every endpoint gets its full request
    /// timeout before the fetch gives up.
    pub fn fetch_timeout(&self) -> Duration {
        let endpoints = 1 + u32::from(self.fallback_url.is_some());
        self.request_timeout() * endpoints
    }
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            fallback_url: None,
            timeout_secs: default_timeout_secs(),
            node_address: None,
        }
    }
}

/// Cache storage and refresh tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_force_refresh_interval_secs")]
    pub force_refresh_interval_secs: u64,
    #[serde(default = "default_block_count_threshold")]
    pub block_count_threshold: i64,
    #[serde(default = "default_days_cutoff")]
    pub days_cutoff: u32,
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    #[serde(default = "default_compute_workers")]
    pub compute_workers: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            database: default_database(),
            refresh_interval_secs: default_refresh_interval_secs(),
            force_refresh_interval_secs: default_force_refresh_interval_secs(),
            block_count_threshold: default_block_count_threshold(),
            days_cutoff: default_days_cutoff(),
            fetch_workers: default_fetch_workers(),
            compute_workers: default_compute_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    /// Directory holding the node's `<network>.cfg` files
    pub node_config_dir: PathBuf,
}

/// One `[[networks]]` entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSection {
    pub name: String,
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub sovereign_address: Option<String>,
    #[serde(default)]
    pub blocks_sign_cert: Option<String>,
    #[serde(default)]
    pub cert_pkey_hash: Option<String>,
    #[serde(default)]
    pub native_ticker: Option<String>,
    #[serde(default)]
    pub chain_path: Option<PathBuf>,
    #[serde(default)]
    pub price_url: Option<String>,
    #[serde(default)]
    pub price_pattern: Option<String>,
}

fn default_node_url() -> String {
    "http://127.0.0.1:12345".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_database() -> PathBuf {
    PathBuf::from("./data/cache.sqlite")
}

fn default_refresh_interval_secs() -> u64 {
    10
}

fn default_force_refresh_interval_secs() -> u64 {
    3600
}

fn default_block_count_threshold() -> i64 {
    30
}

fn default_days_cutoff() -> u32 {
    20
}

fn default_fetch_workers() -> usize {
    8
}

fn default_compute_workers() -> usize {
    4
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Knobs the scheduler reads at the start of every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    pub refresh_interval: Duration,
    pub force_refresh_interval: Duration,
    pub block_count_threshold: i64,
    pub days_cutoff: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::from(&CacheSection::default())
    }
}

impl From<&CacheSection> for Tunables {
    fn from(cache: &CacheSection) -> Self {
        Self {
            refresh_interval: Duration::from_secs(cache.refresh_interval_secs),
            force_refresh_interval: Duration::from_secs(cache.force_refresh_interval_secs),
            block_count_threshold: cache.block_count_threshold,
            days_cutoff: cache.days_cutoff,
        }
    }
}

/// Shared, replaceable [`Tunables`].
#[derive(Debug, Clone, Default)]
pub struct SharedTunables(Arc<RwLock<Tunables>>);

impl SharedTunables {
    pub fn new(tunables: Tunables) -> Self {
        Self(Arc::new(RwLock::new(tunables)))
    }

    pub fn current(&self) -> Tunables {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn replace(&self, tunables: Tunables) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = tunables;
    }

    /// Re-read the `[cache]` section; keeps the current values on any error.
    pub fn reload_from(&self, path: &Path) {
        match FileConfig::load(path) {
            Ok(file) => {
                let fresh = Tunables::from(&file.cache);
                if fresh != self.current() {
                    info!(?fresh, "cache tunables reloaded");
                    self.replace(fresh);
                }
            }
            Err(e) => debug!(error = %format!("{e:#}"), "keeping previous tunables"),
        }
    }
}

/// Where to scrape a network's token price from.
#[derive(Debug, Clone)]
pub struct PriceSource {
    pub url: String,
    /// First capture group is the price
    pub pattern: Regex,
}

impl PriceSource {
    pub fn new(url: &str, pattern: &str) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            pattern: Regex::new(pattern).with_context(|| format!("Invalid price pattern: {pattern}"))?,
        })
    }

    /// Well-known price pages for the public networks.
    fn well_known(network: &str) -> Option<Self> {
        let (url, pattern) = match network.to_lowercase().as_str() {
            "backbone" => ("https://coinmarketcap.com/currencies/cellframe/", r"price today is \$([\d.]+)"),
            "kelvpn" => ("https://kelvpn.com/about-token", r"\$([\d.]+)"),
            _ => return None,
        };
        Self::new(url, pattern).ok()
    }
}

/// Default chain cell locations for the public networks.
fn well_known_chain_path(network: &str) -> Option<PathBuf> {
    let dir = match network {
        "Backbone" => "scorpion",
        "KelVPN" => "kelvpn",
        _ => return None,
    };
    Some(PathBuf::from(format!("/opt/cellframe-node/var/lib/network/{dir}/main/0.dchaincell")))
}

/// A validated network we cache data for.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
    /// Reward (fee) wallet
    pub wallet: String,
    /// Configured sovereign wallet; a discovered one lives in [`NetworkRegistry`]
    pub sovereign_address: Option<String>,
    pub blocks_sign_cert: Option<String>,
    pub cert_pkey_hash: Option<String>,
    pub native_ticker: Option<String>,
    pub chain_path: Option<PathBuf>,
    pub price: Option<PriceSource>,
}

impl NetworkConfig {
    /// Validate a `[[networks]]` entry.
    pub fn from_section(section: &NetworkSection) -> Result<Self> {
        let name = section.name.trim();
        anyhow::ensure!(!name.is_empty(), "network entry without a name");

        let wallet = section
            .wallet
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .with_context(|| format!("{name}: missing wallet address"))?;

        anyhow::ensure!(
            section.blocks_sign_cert.is_some() || section.cert_pkey_hash.is_some(),
            "{name}: needs blocks_sign_cert or cert_pkey_hash"
        );

        let price = match (&section.price_url, &section.price_pattern) {
            (Some(url), Some(pattern)) => Some(PriceSource::new(url, pattern)?),
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("{name}: price_url and price_pattern must be set together")
            }
            (None, None) => PriceSource::well_known(name),
        };

        Ok(Self {
            name: name.to_string(),
            wallet: wallet.to_string(),
            sovereign_address: section.sovereign_address.clone().filter(|a| !a.is_empty()),
            blocks_sign_cert: section.blocks_sign_cert.clone(),
            cert_pkey_hash: section.cert_pkey_hash.clone(),
            native_ticker: section.native_ticker.clone(),
            chain_path: section.chain_path.clone().or_else(|| well_known_chain_path(name)),
            price,
        })
    }

    /// Argument identifying our signer in block list queries (hash preferred).
    pub fn signer_arg(&self) -> Option<(&'static str, &str)> {
        match (&self.cert_pkey_hash, &self.blocks_sign_cert) {
            (Some(hash), _) => Some(("pkey_hash", hash.as_str())),
            (None, Some(cert)) => Some(("cert", cert.as_str())),
            (None, None) => None,
        }
    }
}

/// Main configuration struct with parsed values
#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeSection,
    pub database: PathBuf,
    pub tunables: Tunables,
    pub fetch_workers: usize,
    pub compute_workers: usize,
    pub log_format: String,
    pub networks: Vec<NetworkConfig>,
}

impl Config {
    /// Load and validate. Incomplete networks are reported once and dropped.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_file(FileConfig::load(path)?))
    }

    pub fn from_file(file: FileConfig) -> Self {
        let mut sections: BTreeMap<String, NetworkSection> = BTreeMap::new();

        if let Some(discovery) = &file.discovery {
            for section in discover_networks(&discovery.node_config_dir) {
                sections.insert(section.name.clone(), section);
            }
        }

        // Explicit entries override discovered ones field by field
        for section in &file.networks {
            let merged = match sections.remove(&section.name) {
                Some(found) => merge_sections(found, section.clone()),
                None => section.clone(),
            };
            sections.insert(merged.name.clone(), merged);
        }

        let mut networks = Vec::new();
        for section in sections.values() {
            match NetworkConfig::from_section(section) {
                Ok(network) => networks.push(network),
                Err(e) => warn!(network = %section.name, error = %format!("{e:#}"), "incomplete network config, not caching it"),
            }
        }

        Self {
            tunables: Tunables::from(&file.cache),
            database: file.cache.database.clone(),
            fetch_workers: file.cache.fetch_workers.max(1),
            compute_workers: file.cache.compute_workers.max(1),
            log_format: file.logging.format.clone(),
            node: file.node,
            networks,
        }
    }
}

fn merge_sections(discovered: NetworkSection, explicit: NetworkSection) -> NetworkSection {
    NetworkSection {
        name: explicit.name,
        wallet: explicit.wallet.or(discovered.wallet),
        sovereign_address: explicit.sovereign_address.or(discovered.sovereign_address),
        blocks_sign_cert: explicit.blocks_sign_cert.or(discovered.blocks_sign_cert),
        cert_pkey_hash: explicit.cert_pkey_hash.or(discovered.cert_pkey_hash),
        native_ticker: explicit.native_ticker.or(discovered.native_ticker),
        chain_path: explicit.chain_path.or(discovered.chain_path),
        price_url: explicit.price_url.or(discovered.price_url),
        price_pattern: explicit.price_pattern.or(discovered.price_pattern),
    }
}

// =============================================================================
// Node config discovery
// =============================================================================

/// Scan `<dir>/*.cfg` for networks where this node is a masternode.
///
/// A file qualifies when it has `node-role=master`; `blocks-sign-cert=` and a
/// 104-character `fee_addr=` fill in the signer and wallet.
pub fn discover_networks(dir: &Path) -> Vec<NetworkSection> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read node network configs");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cfg") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                if let Some(section) = parse_node_cfg(name, &content) {
                    debug!(network = name, "discovered masternode network");
                    found.push(section);
                } else {
                    info!(network = name, "node is (probably) not a masternode here");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read network config"),
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    found
}

fn parse_node_cfg(name: &str, content: &str) -> Option<NetworkSection> {
    let mut master = false;
    let mut section = NetworkSection {
        name: name.to_string(),
        ..Default::default()
    };

    for line in content.lines().map(str::trim) {
        if line == "node-role=master" {
            master = true;
        } else if let Some(cert) = line.strip_prefix("blocks-sign-cert=") {
            section.blocks_sign_cert = Some(cert.trim().to_string());
        } else if let Some(addr) = line.strip_prefix("fee_addr=")
            && let Some(wallet) = addr.get(..104)
        {
            section.wallet = Some(wallet.to_string());
        }
    }

    master.then_some(section)
}

// =============================================================================
// Network registry
// =============================================================================

/// The configured networks plus what we learn about them while running.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    networks: Vec<NetworkConfig>,
    node_address: Option<String>,
    discovered_sovereign: RwLock<HashMap<String, String>>,
}

impl NetworkRegistry {
    pub fn new(networks: Vec<NetworkConfig>, node_address: Option<String>) -> Self {
        Self {
            networks,
            node_address,
            discovered_sovereign: RwLock::new(HashMap::new()),
        }
    }

    pub fn all(&self) -> &[NetworkConfig] {
        &self.networks
    }

    pub fn get(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.networks.iter().map(|n| n.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn node_address(&self) -> Option<&str> {
        self.node_address.as_deref()
    }

    /// Configured sovereign wallet, else the one learned from the stake list.
    pub fn sovereign_address(&self, network: &str) -> Option<String> {
        if let Some(configured) = self.get(network).and_then(|n| n.sovereign_address.clone()) {
            return Some(configured);
        }
        self.discovered_sovereign
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .cloned()
    }

    pub fn remember_sovereign(&self, network: &str, address: &str) {
        let mut known = self.discovered_sovereign.write().unwrap_or_else(PoisonError::into_inner);
        if known.get(network).map(String::as_str) != Some(address) {
            info!(network, address, "sovereign reward wallet discovered");
            known.insert(network.to_string(), address.to_string());
        }
    }
}
