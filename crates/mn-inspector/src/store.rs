//! In-memory snapshot cache with write-through persistence.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info, warn};

use crate::snapshot::CacheEntry;

/// Durable storage for one snapshot per network.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, network: &str) -> Result<Option<CacheEntry>>;
    async fn save(&self, network: &str, entry: &CacheEntry) -> Result<()>;
}

/// Flattened, queryable view of one snapshot
pub type FieldMap = BTreeMap<String, Value>;

/// A snapshot and its field view, built together.
struct Cached {
    entry: Arc<CacheEntry>,
    fields: Arc<FieldMap>,
}

impl Cached {
    fn new(entry: Arc<CacheEntry>) -> Self {
        let fields = Arc::new(entry.fields());
        Self { entry, fields }
    }
}

/// Latest committed snapshot per network.
///
/// Entries are swapped whole, so a reader holding an `Arc` never sees a
/// half-written entry. The field view is flattened once per commit; lookups
/// only clone `Arc`s.
pub struct CacheStore {
    entries: RwLock<HashMap<String, Cached>>,
    persistence: Arc<dyn SnapshotStore>,
}

impl CacheStore {
    pub fn new(persistence: Arc<dyn SnapshotStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persistence,
        }
    }

    /// Load persisted snapshots for `networks`. Missing or unreadable
    /// snapshots start empty.
    pub async fn restore(networks: &[String], persistence: Arc<dyn SnapshotStore>) -> Self {
        let store = Self::new(persistence);
        for network in networks {
            let entry = match store.persistence.load(network).await {
                Ok(Some(entry)) => {
                    info!(network, block_count = entry.block_count, "restored cached snapshot");
                    entry
                }
                Ok(None) => {
                    info!(network, "no cached snapshot, starting cold");
                    CacheEntry::default()
                }
                Err(e) => {
                    warn!(network, error = %format!("{e:#}"), "cached snapshot unreadable, starting cold");
                    CacheEntry::default()
                }
            };
            store.put(network, Arc::new(entry));
        }
        store
    }

    fn put(&self, network: &str, entry: Arc<CacheEntry>) {
        let cached = Cached::new(entry);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(network.to_string(), cached);
    }

    /// Current snapshot; an unknown network reads as empty.
    pub fn get(&self, network: &str) -> Arc<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .map(|cached| cached.entry.clone())
            .unwrap_or_default()
    }

    /// Current field view; an unknown network has no fields.
    pub fn fields(&self, network: &str) -> Arc<FieldMap> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .map(|cached| cached.fields.clone())
            .unwrap_or_default()
    }

    /// Replace the network's snapshot, then write it through. A failed write
    /// is logged and the in-memory entry stays.
    pub async fn commit(&self, network: &str, entry: CacheEntry) {
        let entry = Arc::new(entry);
        self.put(network, entry.clone());

        if let Err(e) = self.persistence.save(network, &entry).await {
            error!(network, error = %format!("{e:#}"), "failed to persist snapshot");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory [`SnapshotStore`] that can be told to fail.
    #[derive(Default)]
    pub struct MemorySnapshots {
        pub rows: Mutex<HashMap<String, CacheEntry>>,
        pub fail_reads: bool,
        pub fail_writes: bool,
    }

    #[async_trait]
    impl SnapshotStore for MemorySnapshots {
        async fn load(&self, network: &str) -> Result<Option<CacheEntry>> {
            if self.fail_reads {
                anyhow::bail!("disk on fire");
            }
            Ok(self.rows.lock().unwrap().get(network).cloned())
        }

        async fn save(&self, network: &str, entry: &CacheEntry) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("disk full");
            }
            self.rows.lock().unwrap().insert(network.to_string(), entry.clone());
            Ok(())
        }
    }
}
