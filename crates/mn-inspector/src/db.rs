//! SQLite persistence for network snapshots.
//! One row per network, replaced on every commit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use tracing::info;

use crate::snapshot::CacheEntry;
use crate::store::SnapshotStore;

#[derive(Debug, Clone)]
pub struct SqliteSnapshots {
    pool: SqlitePool,
}

impl SqliteSnapshots {
    /// Open (creating if needed) the database and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("failed to open snapshot database {}", path.display()))?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .context("failed to run snapshot migrations")?;

        info!(path = %path.display(), "snapshot database ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshots {
    async fn load(&self, network: &str) -> Result<Option<CacheEntry>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data_json FROM network_snapshots WHERE network = ?")
            .bind(network)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read snapshot for {network}"))?;

        row.map(|(data_json,)| {
            serde_json::from_str(&data_json).with_context(|| format!("corrupt snapshot for {network}"))
        })
        .transpose()
    }

    async fn save(&self, network: &str, entry: &CacheEntry) -> Result<()> {
        let data_json = serde_json::to_string(entry)?;
        sqlx::query(
            "INSERT INTO network_snapshots (network, data_json, updated_at) VALUES (?, ?, datetime('now')) \
             ON CONFLICT(network) DO UPDATE SET data_json = excluded.data_json, updated_at = excluded.updated_at",
        )
        .bind(network)
        .bind(data_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save snapshot for {network}"))?;
        Ok(())
    }
}
