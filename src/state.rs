use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Result;
use crate::transfer::Transfer;

/// A persisted torrent record, as stored in the session state (§3). The live
/// swarm handle itself is never serialized — only enough to re-add the
/// torrent on restart (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TorrentRecord {
    pub infohash: String,
    pub display_name: String,
    pub storage_root: String,
    pub seeding: bool,
    pub added_at: i64,
    pub completed_at: Option<i64>,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CumulativeStatistics {
    pub total_bytes_up: u64,
    pub total_bytes_down: u64,
    pub models_published: u64,
}

/// `{start time, list of torrent records, mapping id→transfer, cumulative
/// statistics}` (§3), plus the startup counter from §4.A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub start_time: i64,
    pub daemon_start_count: u64,
    pub torrents: Vec<TorrentRecord>,
    pub transfers: HashMap<String, Transfer>,
    pub stats: CumulativeStatistics,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            start_time: chrono::Utc::now().timestamp(),
            daemon_start_count: 0,
            torrents: Vec::new(),
            transfers: HashMap::new(),
            stats: CumulativeStatistics::default(),
        }
    }
}

const TRANSFER_RETENTION_SECS: i64 = 7 * 24 * 3600;

impl SessionState {
    /// Drops completed/cancelled transfers older than seven days (§3, §4.A).
    fn purge_old_transfers(&mut self) {
        let now = chrono::Utc::now().timestamp();
        self.transfers.retain(|_, t| {
            !t.is_terminal() || t.completed_at.map(|c| now - c < TRANSFER_RETENTION_SECS).unwrap_or(true)
        });
    }
}

/// Loads and atomically saves the single JSON state file (§4.A), serializing
/// access to itself through an internal lock (§5).
pub struct StateStore {
    path: std::path::PathBuf,
    state: RwLock<SessionState>,
}

impl StateStore {
    /// Loads state from `path`. Absence is tolerated (starts fresh);
    /// corruption is tolerated too — a fresh in-memory state is substituted
    /// and the corruption is logged as a recoverable error, never fatal.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut state = match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<SessionState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!("state file at {} is corrupt, starting fresh: {e}", path.display());
                    SessionState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionState::default(),
            Err(e) => return Err(e.into()),
        };

        state.daemon_start_count += 1;
        state.purge_old_transfers();

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn with_state_mut<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut SessionState) -> T,
    {
        let mut guard = self.state.write().await;
        f(&mut guard)
    }

    /// Atomic save: write to `state.json.tmp`, fsync it, rename over
    /// `state.json`, then fsync the parent directory so the rename itself is
    /// durable (§4.A).
    pub async fn save(&self) -> Result<()> {
        let state = self.state.read().await.clone();
        let json = serde_json::to_string_pretty(&state)?;
        crate::paths::atomic_write_json(&self.path, json.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_starts_fresh() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        let store = StateStore::load(&path).await.unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.daemon_start_count, 1);
        assert!(snapshot.torrents.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_modulo_start_count() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");

        let store = StateStore::load(&path).await.unwrap();
        store
            .with_state_mut(|s| {
                s.torrents.push(TorrentRecord {
                    infohash: "a".repeat(40),
                    display_name: "acme/widget".to_string(),
                    storage_root: "/tmp/widget".to_string(),
                    seeding: true,
                    added_at: 100,
                    completed_at: None,
                    bytes_up: 10,
                    bytes_down: 20,
                });
            })
            .await;
        store.save().await.unwrap();

        let reloaded = StateStore::load(&path).await.unwrap();
        let snapshot = reloaded.snapshot().await;
        assert_eq!(snapshot.daemon_start_count, 2);
        assert_eq!(snapshot.torrents.len(), 1);
        assert_eq!(snapshot.torrents[0].infohash, "a".repeat(40));
    }

    #[tokio::test]
    async fn corrupt_state_file_is_tolerated() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = StateStore::load(&path).await.unwrap();
        let snapshot = store.snapshot().await;
        assert!(snapshot.torrents.is_empty());
    }

    #[tokio::test]
    async fn old_completed_transfers_are_purged_on_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");

        let store = StateStore::load(&path).await.unwrap();
        store
            .with_state_mut(|s| {
                let mut t = Transfer::new_seed("acme/widget".to_string(), "b".repeat(40), 0);
                t.status = crate::transfer::TransferStatus::Completed;
                t.completed_at = Some(chrono::Utc::now().timestamp() - 8 * 24 * 3600);
                s.transfers.insert(t.id.clone(), t);
            })
            .await;
        store.save().await.unwrap();

        let reloaded = StateStore::load(&path).await.unwrap();
        assert!(reloaded.snapshot().await.transfers.is_empty());
    }
}
