use std::collections::HashMap;
use std::time::Duration;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Result;
use crate::paths::Paths;
use crate::session::{TorrentSessionManager, TransferIntent};
use crate::state::StateStore;

/// Piece length the catalog torrent is always built with (§4.E, §6); the
/// catalog is small enough that a fixed, small piece size keeps propagation
/// fast without the per-model size-scaling `publish` does.
const CATALOG_PIECE_LENGTH: u32 = 256 * 1024;
const CATALOG_TORRENT_NAME: &str = "catalog";
const CATALOG_METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const CATALOG_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub infohash: String,
    pub size: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub added: i64,
}

/// `{version, sequence, updated, models}` (§3). The catalog's `sequence`
/// only ever increases (invariant 4, §8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub version: u32,
    pub sequence: u64,
    pub updated: i64,
    pub models: HashMap<String, CatalogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            version: 1,
            sequence: 0,
            updated: chrono::Utc::now().timestamp(),
            models: HashMap::new(),
        }
    }
}

impl Catalog {
    /// Merges `name -> entry`, keeping the later `added` timestamp; ties
    /// break on the lexicographically larger infohash (§4.E conflict
    /// resolution). Returns whether the merge changed anything.
    fn merge_entry(&mut self, name: &str, entry: CatalogEntry) -> bool {
        match self.models.get(name) {
            Some(existing) if !entry_wins(&entry, existing) => false,
            _ => {
                self.models.insert(name.to_string(), entry);
                true
            }
        }
    }

    /// Folds `other` into `self` entry-wise (§4.E). If anything changed,
    /// bumps `sequence` and `updated`.
    pub fn merge(&mut self, other: &Catalog) -> bool {
        let mut changed = false;
        for (name, entry) in &other.models {
            if self.merge_entry(name, entry.clone()) {
                changed = true;
            }
        }
        if changed {
            self.sequence += 1;
            self.updated = chrono::Utc::now().timestamp();
        }
        changed
    }

    /// `GetModels(pattern)`: empty or `"*"` matches everything; otherwise a
    /// case-sensitive glob match across the full `org/model` name (§4.E).
    pub fn get_models(&self, pattern: &str) -> Vec<(String, CatalogEntry)> {
        if pattern.is_empty() || pattern == "*" {
            let mut all: Vec<_> = self
                .models
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            all.sort_by(|a, b| a.0.cmp(&b.0));
            return all;
        }

        let Ok(glob) = Pattern::new(pattern) else {
            return Vec::new();
        };

        let mut matches: Vec<_> = self
            .models
            .iter()
            .filter(|(name, _)| glob.matches(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        matches
    }
}

/// `entry` wins over `incumbent` per §4.E's tie-break rules.
fn entry_wins(entry: &CatalogEntry, incumbent: &CatalogEntry) -> bool {
    match entry.added.cmp(&incumbent.added) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => entry.infohash > incumbent.infohash,
    }
}

/// Owns `catalog/catalog.json` and the `AddModel`/`Merge`/`GetModels`
/// surface described in §4.E. Building and seeding the small catalog
/// torrent, and republishing the BEP44 reference, are orchestrated by the
/// DHT manager (§4.F) which holds a reference to this type.
pub struct CatalogStore {
    paths: Paths,
    catalog: RwLock<Catalog>,
    torrent_infohash: RwLock<Option<String>>,
}

impl CatalogStore {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            catalog: RwLock::new(Catalog::default()),
            torrent_infohash: RwLock::new(None),
        }
    }

    pub async fn load_from_disk(paths: Paths) -> Result<Self> {
        let path = paths.catalog_file();
        let catalog = if path.exists() {
            let bytes = tokio::fs::read(&path).await?;
            serde_json::from_slice(&bytes)?
        } else {
            Catalog::default()
        };
        Ok(Self {
            paths,
            catalog: RwLock::new(catalog),
            torrent_infohash: RwLock::new(None),
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub async fn snapshot(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    /// The infohash of the catalog torrent this daemon has most recently
    /// built and seeded, if any (§4.E). `None` until the first
    /// `rebuild_and_seed_torrent` call, e.g. right after startup before any
    /// model has been added or refreshed.
    pub async fn current_torrent_infohash(&self) -> Option<String> {
        self.torrent_infohash.read().await.clone()
    }

    /// `AddModel(name, infohash, size)` (§4.E): merges the entry, bumps
    /// `sequence`, persists to disk. Rebuilding the catalog torrent and
    /// republishing the BEP44 reference are the DHT manager's job once this
    /// returns the new sequence number.
    pub async fn add_model(&self, name: &str, infohash: String, size: u64) -> Result<u64> {
        let entry = CatalogEntry {
            infohash,
            size,
            tags: Vec::new(),
            added: chrono::Utc::now().timestamp(),
        };

        let mut catalog = self.catalog.write().await;
        catalog.merge_entry(name, entry);
        catalog.sequence += 1;
        catalog.updated = chrono::Utc::now().timestamp();
        let sequence = catalog.sequence;
        let snapshot = catalog.clone();
        drop(catalog);

        self.persist(&snapshot).await?;
        Ok(sequence)
    }

    pub async fn merge(&self, other: &Catalog) -> Result<bool> {
        let mut catalog = self.catalog.write().await;
        let changed = catalog.merge(other);
        let snapshot = catalog.clone();
        drop(catalog);

        if changed {
            self.persist(&snapshot).await?;
        }
        Ok(changed)
    }

    pub async fn get_models(&self, pattern: &str) -> Vec<(String, CatalogEntry)> {
        self.catalog.read().await.get_models(pattern)
    }

    /// Replaces the in-memory catalog outright, used by `LoadOrFetch` once a
    /// fresher catalog torrent has been downloaded (§4.E).
    pub async fn replace(&self, catalog: Catalog) -> Result<()> {
        let snapshot = catalog.clone();
        *self.catalog.write().await = catalog;
        self.persist(&snapshot).await
    }

    async fn persist(&self, catalog: &Catalog) -> Result<()> {
        let path = self.paths.catalog_file();
        let json = serde_json::to_vec_pretty(catalog)?;
        crate::paths::atomic_write_json(&path, &json).await
    }

    /// Rebuilds the catalog torrent from the current in-memory catalog and
    /// seeds it, so the BEP44 reference the DHT manager republishes always
    /// points at real, fetchable content (§4.E, §6). Returns the new
    /// infohash; a no-op rebuild (content unchanged since the last call)
    /// still returns the existing infohash rather than reseeding.
    pub async fn rebuild_and_seed_torrent(
        &self,
        session: &TorrentSessionManager,
        state: &StateStore,
    ) -> Result<String> {
        let snapshot = self.snapshot().await;
        let publish_dir = self.paths.catalog_publish_dir();
        tokio::fs::create_dir_all(&publish_dir).await?;
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(publish_dir.join("catalog.json"), &json).await?;

        let torrent_path = self.paths.catalog_torrent_file(snapshot.sequence);
        let infohash = crate::torrent_file::create_torrent(
            &publish_dir,
            &torrent_path,
            CATALOG_TORRENT_NAME,
            CATALOG_PIECE_LENGTH,
        )?;

        let previous = self.torrent_infohash.read().await.clone();
        if previous.as_deref() == Some(infohash.as_str()) {
            return Ok(infohash);
        }

        session
            .add(&torrent_path, CATALOG_TORRENT_NAME, &publish_dir, TransferIntent::Seed, state)
            .await?;
        session.start_seeding(&infohash, state).await?;

        if let Some(previous) = previous {
            if let Err(e) = session.remove(&previous).await {
                warn!(infohash = %previous, error = %e, "failed to drop superseded catalog torrent");
            }
        }

        *self.torrent_infohash.write().await = Some(infohash.clone());
        Ok(infohash)
    }

    /// `LoadOrFetch(infohash)` (§4.E): no-op when `infohash` already matches
    /// the catalog torrent this daemon has loaded; otherwise fetches it over
    /// the swarm and merges its contents into the local catalog. Returns
    /// whether the merge changed anything.
    pub async fn load_or_fetch(
        &self,
        infohash: &str,
        session: &TorrentSessionManager,
        state: &StateStore,
    ) -> Result<bool> {
        if self.torrent_infohash.read().await.as_deref() == Some(infohash) {
            return Ok(false);
        }

        let fetch_dir = self.paths.catalog_fetch_dir();
        session
            .fetch_by_infohash(
                infohash,
                CATALOG_TORRENT_NAME,
                &fetch_dir,
                CATALOG_METADATA_TIMEOUT,
                CATALOG_DOWNLOAD_TIMEOUT,
                state,
            )
            .await?;

        let bytes = tokio::fs::read(fetch_dir.join("catalog.json")).await?;
        let fetched: Catalog = serde_json::from_slice(&bytes)?;
        let changed = self.merge(&fetched).await?;
        *self.torrent_infohash.write().await = Some(infohash.to_string());
        Ok(changed)
    }
}

pub fn catalog_torrent_path(paths: &Paths, sequence: u64) -> std::path::PathBuf {
    paths.catalog_torrent_file(sequence)
}
