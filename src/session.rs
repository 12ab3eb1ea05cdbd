use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session, SessionOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, SilmarilError};
use crate::state::{StateStore, TorrentRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferIntent {
    Seed,
    Download,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentStats {
    pub name: String,
    pub infohash: String,
    pub seeding: bool,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub peers: u32,
    pub seeders: u32,
    pub progress_percent: f64,
    pub download_rate_bps: f64,
    pub upload_rate_bps: f64,
}

struct Handle {
    managed: Arc<librqbit::ManagedTorrent>,
    display_name: String,
    storage_root: PathBuf,
    intent: TransferIntent,
    added_at: Instant,
}

/// A single swarm client shared by every torrent this daemon seeds or
/// downloads (§4.D). Each torrent binds its own storage root; there is no
/// global data directory.
pub struct TorrentSessionManager {
    session: Option<Arc<Session>>,
    handles: RwLock<HashMap<String, Handle>>,
}

const HANDSHAKE_TIMEOUT_SECS: u64 = 20;

impl TorrentSessionManager {
    pub async fn new(session_dir: &Path, config: &crate::config::SilmarilConfig) -> Result<Self> {
        tokio::fs::create_dir_all(session_dir).await?;

        let options = SessionOptions {
            disable_dht: false,
            disable_dht_persistence: false,
            persistence: None,
            handshake_timeout: Some(std::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)),
            enable_upnp_port_forwarding: false,
            ratelimits: librqbit::limits::LimitsConfig {
                download_bps: config.max_download_rate_bps.map(|v| v as u32).and_then(std::num::NonZeroU32::new),
                upload_bps: config.max_upload_rate_bps.map(|v| v as u32).and_then(std::num::NonZeroU32::new),
            },
            ..Default::default()
        };

        let session = Session::new_with_opts(session_dir.to_path_buf(), options)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(format!("failed to start torrent session: {e:#}")))?;

        Ok(Self {
            session: Some(session),
            handles: RwLock::new(HashMap::new()),
        })
    }

    /// For unit tests that never touch the network: a manager with no live
    /// session, whose methods return `NetworkTransient` instead of panicking.
    #[cfg(test)]
    pub fn new_in_memory_for_tests() -> Self {
        Self {
            session: None,
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn session(&self) -> Result<&Arc<Session>> {
        self.session
            .as_ref()
            .ok_or_else(|| SilmarilError::NetworkTransient("torrent session is not active".to_string()))
    }

    /// Add(torrent-file-path, display-name, storage-root, intent) (§4.D
    /// steps 1-5). Re-adding an already-managed infohash returns the
    /// existing handle rather than erroring.
    pub async fn add(
        &self,
        torrent_path: &Path,
        display_name: &str,
        storage_root: &Path,
        intent: TransferIntent,
        state: &StateStore,
    ) -> Result<String> {
        let bytes = tokio::fs::read(torrent_path).await?;
        let session = self.session()?;

        tokio::fs::create_dir_all(storage_root).await?;

        let mut opts = AddTorrentOptions::default();
        opts.output_folder = Some(storage_root.to_string_lossy().into_owned());
        opts.overwrite = true;
        opts.paused = false;

        let response = session
            .add_torrent(AddTorrent::from_bytes(bytes), Some(opts))
            .await
            .map_err(|e| SilmarilError::NetworkTransient(format!("failed to add torrent: {e:#}")))?;

        let managed = match response {
            AddTorrentResponse::Added(_, handle) | AddTorrentResponse::AlreadyManaged(_, handle) => handle,
            AddTorrentResponse::ListOnly(_) => {
                return Err(SilmarilError::BadState(
                    "torrent metadata-only add is not supported for managed torrents".to_string(),
                ));
            }
        };

        let infohash = hex::encode(managed.info_hash().0);

        session
            .unpause(&managed)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(format!("failed to start torrent: {e:#}")))?;

        self.handles.write().await.insert(
            infohash.clone(),
            Handle {
                managed,
                display_name: display_name.to_string(),
                storage_root: storage_root.to_path_buf(),
                intent,
                added_at: Instant::now(),
            },
        );

        let seeding = intent == TransferIntent::Seed;
        state
            .with_state_mut(|s| {
                if !s.torrents.iter().any(|t| t.infohash == infohash) {
                    s.torrents.push(TorrentRecord {
                        infohash: infohash.clone(),
                        display_name: display_name.to_string(),
                        storage_root: storage_root.to_string_lossy().into_owned(),
                        seeding,
                        added_at: chrono::Utc::now().timestamp(),
                        completed_at: None,
                        bytes_up: 0,
                        bytes_down: 0,
                    });
                }
            })
            .await;

        info!(infohash = %infohash, intent = ?intent, "added torrent to session");
        Ok(infohash)
    }

    /// `StartSeeding(infohash)`: flips the seeding flag and unpauses data
    /// upload (§4.D). Errors with `NotFound` if the torrent isn't loaded.
    pub async fn start_seeding(&self, infohash: &str, state: &StateStore) -> Result<()> {
        let handles = self.handles.read().await;
        let handle = handles
            .get(infohash)
            .ok_or_else(|| SilmarilError::NotFound(format!("torrent {infohash} not loaded")))?;
        self.session()?
            .unpause(&handle.managed)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(e.to_string()))?;
        drop(handles);

        state
            .with_state_mut(|s| {
                if let Some(record) = s.torrents.iter_mut().find(|t| t.infohash == infohash) {
                    record.seeding = true;
                }
            })
            .await;
        Ok(())
    }

    /// `StopSeeding(infohash)`: pauses the handle, disallowing further
    /// upload and download (§4.D).
    pub async fn stop_seeding(&self, infohash: &str, state: &StateStore) -> Result<()> {
        let handles = self.handles.read().await;
        let handle = handles
            .get(infohash)
            .ok_or_else(|| SilmarilError::NotFound(format!("torrent {infohash} not loaded")))?;
        self.session()?
            .pause(&handle.managed)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(e.to_string()))?;
        drop(handles);

        state
            .with_state_mut(|s| {
                if let Some(record) = s.torrents.iter_mut().find(|t| t.infohash == infohash) {
                    record.seeding = false;
                }
            })
            .await;
        Ok(())
    }

    pub async fn pause(&self, infohash: &str) -> Result<()> {
        let handles = self.handles.read().await;
        let handle = handles
            .get(infohash)
            .ok_or_else(|| SilmarilError::NotFound(format!("torrent {infohash} not loaded")))?;
        self.session()?
            .pause(&handle.managed)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(e.to_string()))
    }

    pub async fn resume(&self, infohash: &str) -> Result<()> {
        let handles = self.handles.read().await;
        let handle = handles
            .get(infohash)
            .ok_or_else(|| SilmarilError::NotFound(format!("torrent {infohash} not loaded")))?;
        self.session()?
            .unpause(&handle.managed)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(e.to_string()))
    }

    /// Removes the torrent from the swarm client entirely; the caller (the
    /// transfer manager) retains its own record (§4.G cancel semantics).
    pub async fn remove(&self, infohash: &str) -> Result<()> {
        let handle = self.handles.write().await.remove(infohash);
        if let Some(handle) = handle {
            let id = handle.managed.info_hash();
            let _ = self
                .session()?
                .delete(librqbit::api::TorrentIdOrHash::Hash(id), false)
                .await;
        }
        Ok(())
    }

    pub async fn stats(&self, infohash: &str) -> Result<TorrentStats> {
        let handles = self.handles.read().await;
        let handle = handles
            .get(infohash)
            .ok_or_else(|| SilmarilError::NotFound(format!("torrent {infohash} not loaded")))?;

        let stats = handle.managed.stats();
        let age_secs = handle.added_at.elapsed().as_secs_f64().max(1.0);
        let progress_percent = if stats.total_bytes > 0 {
            (stats.progress_bytes as f64 * 100.0) / stats.total_bytes as f64
        } else {
            0.0
        };
        let peers = stats
            .live
            .as_ref()
            .map(|l| l.snapshot.peer_stats.live)
            .unwrap_or(0) as u32;

        Ok(TorrentStats {
            name: handle.display_name.clone(),
            infohash: infohash.to_string(),
            seeding: handle.intent == TransferIntent::Seed,
            bytes_up: stats.uploaded_bytes,
            bytes_down: stats.progress_bytes,
            peers,
            seeders: peers,
            progress_percent,
            // Cumulative bytes divided by wall-clock age: an intentional
            // low-fidelity rate, not a windowed average (§4.D, §9).
            download_rate_bps: stats.progress_bytes as f64 / age_secs,
            upload_rate_bps: stats.uploaded_bytes as f64 / age_secs,
        })
    }

    pub async fn list_infohashes(&self) -> Vec<String> {
        self.handles.read().await.keys().cloned().collect()
    }

    /// `LoadOrFetch` support: pulls a torrent by bare infohash alone, over a
    /// magnet link, into `storage_root` (§4.E). Waits up to
    /// `metadata_timeout` for the swarm to resolve the torrent's metainfo and
    /// up to `download_timeout` for the payload to finish, then registers a
    /// `Download` handle.
    pub async fn fetch_by_infohash(
        &self,
        infohash: &str,
        display_name: &str,
        storage_root: &Path,
        metadata_timeout: Duration,
        download_timeout: Duration,
        state: &StateStore,
    ) -> Result<()> {
        let session = self.session()?;
        tokio::fs::create_dir_all(storage_root).await?;

        let magnet_uri = format!("magnet:?xt=urn:btih:{infohash}");
        let mut opts = AddTorrentOptions::default();
        opts.output_folder = Some(storage_root.to_string_lossy().into_owned());
        opts.overwrite = true;
        opts.paused = false;

        let response = session
            .add_torrent(AddTorrent::from_url(&magnet_uri), Some(opts))
            .await
            .map_err(|e| SilmarilError::NetworkTransient(format!("failed to add magnet: {e:#}")))?;

        let managed = match response {
            AddTorrentResponse::Added(_, handle) | AddTorrentResponse::AlreadyManaged(_, handle) => handle,
            AddTorrentResponse::ListOnly(_) => {
                return Err(SilmarilError::BadState(
                    "magnet metadata-only add is not supported for managed torrents".to_string(),
                ));
            }
        };

        tokio::time::timeout(metadata_timeout, async {
            loop {
                if managed.with_metadata(|_| ()).is_ok() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await
        .map_err(|_| SilmarilError::NetworkTransient(format!("timed out resolving metadata for {infohash}")))?;

        tokio::time::timeout(download_timeout, async {
            loop {
                if managed.stats().finished {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await
        .map_err(|_| SilmarilError::NetworkTransient(format!("timed out downloading {infohash}")))?;

        session
            .unpause(&managed)
            .await
            .map_err(|e| SilmarilError::NetworkTransient(format!("failed to start torrent: {e:#}")))?;

        self.handles.write().await.insert(
            infohash.to_string(),
            Handle {
                managed,
                display_name: display_name.to_string(),
                storage_root: storage_root.to_path_buf(),
                intent: TransferIntent::Download,
                added_at: Instant::now(),
            },
        );

        let now = chrono::Utc::now().timestamp();
        state
            .with_state_mut(|s| {
                if !s.torrents.iter().any(|t| t.infohash == infohash) {
                    s.torrents.push(TorrentRecord {
                        infohash: infohash.to_string(),
                        display_name: display_name.to_string(),
                        storage_root: storage_root.to_string_lossy().into_owned(),
                        seeding: false,
                        added_at: now,
                        completed_at: Some(now),
                        bytes_up: 0,
                        bytes_down: 0,
                    });
                }
            })
            .await;

        info!(infohash = %infohash, "fetched torrent by infohash");
        Ok(())
    }

    /// Restart recovery (§4.D): reload every persisted torrent record's
    /// metainfo from disk and re-add it. A record whose metainfo file is
    /// missing is retained in state but left unloaded; it does not halt
    /// startup.
    pub async fn restore_from_state(&self, state: &StateStore, paths: &crate::paths::Paths) {
        let records = state.snapshot().await.torrents;
        for record in records {
            let torrent_path = paths.torrents_dir().join(format!("{}.torrent", record.infohash));
            if !torrent_path.exists() {
                warn!(infohash = %record.infohash, "torrent metainfo missing on restart, leaving unloaded");
                continue;
            }
            let intent = if record.seeding {
                TransferIntent::Seed
            } else {
                TransferIntent::Download
            };
            let storage_root = PathBuf::from(&record.storage_root);
            if let Err(e) = self
                .add(&torrent_path, &record.display_name, &storage_root, intent, state)
                .await
            {
                warn!(infohash = %record.infohash, error = %e, "failed to restore torrent on restart");
            }
        }
    }

    /// Stop (final): captures cumulative bytes for every torrent into the
    /// state store, then drops the swarm client (§4.D).
    pub async fn shutdown(&self, state: &StateStore) {
        let handles = self.handles.read().await;
        for (infohash, handle) in handles.iter() {
            let stats = handle.managed.stats();
            let infohash = infohash.clone();
            let bytes_up = stats.uploaded_bytes;
            let bytes_down = stats.progress_bytes;
            state
                .with_state_mut(|s| {
                    if let Some(record) = s.torrents.iter_mut().find(|t| t.infohash == infohash) {
                        record.bytes_up = bytes_up;
                        record.bytes_down = bytes_down;
                    }
                })
                .await;
        }
        drop(handles);

        if let Some(session) = &self.session {
            session.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_on_missing_infohash_are_not_found() {
        let manager = TorrentSessionManager::new_in_memory_for_tests();
        let err = manager.pause("deadbeef").await.unwrap_err();
        assert!(matches!(err, SilmarilError::NotFound(_)));

        let err = manager.stats("deadbeef").await.unwrap_err();
        assert!(matches!(err, SilmarilError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_infohashes_starts_empty() {
        let manager = TorrentSessionManager::new_in_memory_for_tests();
        assert!(manager.list_infohashes().await.is_empty());
    }
}
