use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SilmarilError};
use crate::session::TorrentSessionManager;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Download,
    Upload,
    Seed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// A uniform record of a download, upload, or seed (§3, §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub transfer_type: TransferType,
    pub status: TransferStatus,
    pub model_name: String,
    pub infohash: String,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub progress_percent: f64,
    pub download_rate_bps: f64,
    pub upload_rate_bps: f64,
    pub peers: u32,
    pub seeders: u32,
    pub eta_secs: Option<u64>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub last_activity: i64,
    pub error_message: Option<String>,
}

impl Transfer {
    fn new(transfer_type: TransferType, model_name: String, infohash: String, total_bytes: u64) -> Self {
        let now = chrono::Utc::now().timestamp();
        let status = match transfer_type {
            TransferType::Download => TransferStatus::Pending,
            TransferType::Upload | TransferType::Seed => TransferStatus::Active,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            transfer_type,
            status,
            model_name,
            infohash,
            total_bytes,
            bytes_transferred: 0,
            progress_percent: 0.0,
            download_rate_bps: 0.0,
            upload_rate_bps: 0.0,
            peers: 0,
            seeders: 0,
            eta_secs: None,
            started_at: now,
            completed_at: None,
            last_activity: now,
            error_message: None,
        }
    }

    pub fn new_download(model_name: String, infohash: String, total_bytes: u64) -> Self {
        Self::new(TransferType::Download, model_name, infohash, total_bytes)
    }

    pub fn new_upload(model_name: String, infohash: String, total_bytes: u64) -> Self {
        Self::new(TransferType::Upload, model_name, infohash, total_bytes)
    }

    pub fn new_seed(model_name: String, infohash: String, total_bytes: u64) -> Self {
        Self::new(TransferType::Seed, model_name, infohash, total_bytes)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Completed | TransferStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Created { id: String },
    StatsUpdated { id: String },
    Completed { id: String },
    Failed { id: String, message: String },
    Cancelled { id: String },
}

/// Every active operation has exactly one transfer record (§4.G). Status
/// transitions check the current status inside the write-lock critical
/// section, never before entering it (§5).
pub struct TransferManager {
    transfers: RwLock<HashMap<String, Transfer>>,
    session: Arc<TorrentSessionManager>,
    events: Mutex<Vec<TransferEvent>>,
}

const MAX_BUFFERED_EVENTS: usize = 1024;
const STALE_AFTER_SECS: i64 = 24 * 3600;

impl TransferManager {
    pub fn new(session: Arc<TorrentSessionManager>) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            session,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn restore(session: Arc<TorrentSessionManager>, transfers: HashMap<String, Transfer>) -> Self {
        Self {
            transfers: RwLock::new(transfers),
            session,
            events: Mutex::new(Vec::new()),
        }
    }

    async fn emit(&self, event: TransferEvent) {
        let mut events = self.events.lock().await;
        if events.len() >= MAX_BUFFERED_EVENTS {
            events.remove(0);
        }
        events.push(event);
    }

    /// Bounded drain of lifecycle events for pollers that can't hold a
    /// subscription open.
    pub async fn drain_events(&self, max: usize) -> Vec<TransferEvent> {
        let mut events = self.events.lock().await;
        let take = max.min(events.len());
        events.drain(..take).collect()
    }

    pub async fn create_download(&self, model_name: String, infohash: String, total_bytes: u64) -> String {
        let transfer = Transfer::new_download(model_name, infohash, total_bytes);
        let id = transfer.id.clone();
        self.transfers.write().await.insert(id.clone(), transfer);
        self.emit(TransferEvent::Created { id: id.clone() }).await;
        id
    }

    pub async fn create_upload(&self, model_name: String, infohash: String, total_bytes: u64) -> String {
        let transfer = Transfer::new_upload(model_name, infohash, total_bytes);
        let id = transfer.id.clone();
        self.transfers.write().await.insert(id.clone(), transfer);
        self.emit(TransferEvent::Created { id: id.clone() }).await;
        id
    }

    pub async fn create_seed(&self, model_name: String, infohash: String, total_bytes: u64) -> String {
        let transfer = Transfer::new_seed(model_name, infohash, total_bytes);
        let id = transfer.id.clone();
        self.transfers.write().await.insert(id.clone(), transfer);
        self.emit(TransferEvent::Created { id: id.clone() }).await;
        id
    }

    pub async fn get(&self, id: &str) -> Result<Transfer> {
        self.transfers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SilmarilError::NotFound(format!("transfer {id} not found")))
    }

    pub async fn list(&self) -> Vec<Transfer> {
        self.transfers.read().await.values().cloned().collect()
    }

    /// Begins work on a `pending` download.
    pub async fn begin(&self, id: &str) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(id)
            .ok_or_else(|| SilmarilError::NotFound(format!("transfer {id} not found")))?;
        if transfer.status != TransferStatus::Pending {
            return Err(SilmarilError::BadState(format!(
                "transfer {id} is {:?}, expected Pending",
                transfer.status
            )));
        }
        transfer.status = TransferStatus::Active;
        Ok(())
    }

    /// `PauseTransfer`: only accepted from `active` (§4.G).
    pub async fn pause(&self, id: &str) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(id)
            .ok_or_else(|| SilmarilError::NotFound(format!("transfer {id} not found")))?;
        if transfer.status != TransferStatus::Active {
            return Err(SilmarilError::BadState(format!(
                "transfer {id} is {:?}, expected Active",
                transfer.status
            )));
        }
        self.session.pause(&transfer.infohash).await?;
        transfer.status = TransferStatus::Paused;
        Ok(())
    }

    /// `ResumeTransfer`: only accepted from `paused` (§4.G).
    pub async fn resume(&self, id: &str) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(id)
            .ok_or_else(|| SilmarilError::NotFound(format!("transfer {id} not found")))?;
        if transfer.status != TransferStatus::Paused {
            return Err(SilmarilError::BadState(format!(
                "transfer {id} is {:?}, expected Paused",
                transfer.status
            )));
        }
        self.session.resume(&transfer.infohash).await?;
        transfer.status = TransferStatus::Active;
        Ok(())
    }

    /// `CancelTransfer`: accepted from `active`, `paused`, or `pending`;
    /// removes the torrent from the session manager but retains the record
    /// (§4.G).
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let infohash = {
            let mut transfers = self.transfers.write().await;
            let transfer = transfers
                .get_mut(id)
                .ok_or_else(|| SilmarilError::NotFound(format!("transfer {id} not found")))?;
            if transfer.is_terminal() || transfer.status == TransferStatus::Failed {
                return Err(SilmarilError::BadState(format!(
                    "transfer {id} is {:?}, cannot cancel",
                    transfer.status
                )));
            }
            transfer.status = TransferStatus::Cancelled;
            transfer.completed_at = Some(chrono::Utc::now().timestamp());
            transfer.infohash.clone()
        };
        let _ = self.session.remove(&infohash).await;
        self.emit(TransferEvent::Cancelled { id: id.to_string() }).await;
        Ok(())
    }

    pub async fn fail(&self, id: &str, message: String) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(id)
            .ok_or_else(|| SilmarilError::NotFound(format!("transfer {id} not found")))?;
        transfer.status = TransferStatus::Failed;
        transfer.error_message = Some(message.clone());
        drop(transfers);
        self.emit(TransferEvent::Failed {
            id: id.to_string(),
            message,
        })
        .await;
        Ok(())
    }

    /// `UpdateStats()`: runs every 30 seconds, pulling live stats for every
    /// `active` transfer from the session manager (§4.G).
    pub async fn update_stats(&self) -> Result<()> {
        let active_ids: Vec<(String, String, TransferType)> = {
            let transfers = self.transfers.read().await;
            transfers
                .values()
                .filter(|t| t.status == TransferStatus::Active)
                .map(|t| (t.id.clone(), t.infohash.clone(), t.transfer_type))
                .collect()
        };

        for (id, infohash, transfer_type) in active_ids {
            let Ok(stats) = self.session.stats(&infohash).await else {
                continue;
            };

            let mut transfers = self.transfers.write().await;
            let Some(transfer) = transfers.get_mut(&id) else {
                continue;
            };

            transfer.bytes_transferred = stats.bytes_down.max(stats.bytes_up);
            transfer.download_rate_bps = stats.download_rate_bps;
            transfer.upload_rate_bps = stats.upload_rate_bps;
            transfer.peers = stats.peers;
            transfer.seeders = stats.seeders;
            transfer.progress_percent = stats.progress_percent;
            transfer.last_activity = chrono::Utc::now().timestamp();
            transfer.eta_secs = if stats.download_rate_bps > 0.0 && transfer.total_bytes > transfer.bytes_transferred {
                let remaining = transfer.total_bytes - transfer.bytes_transferred;
                Some((remaining as f64 / stats.download_rate_bps) as u64)
            } else {
                None
            };

            if transfer_type == TransferType::Download && transfer.progress_percent >= 100.0 {
                transfer.status = TransferStatus::Completed;
                transfer.completed_at = Some(chrono::Utc::now().timestamp());
                drop(transfers);
                self.emit(TransferEvent::Completed { id: id.clone() }).await;
            } else {
                drop(transfers);
                self.emit(TransferEvent::StatsUpdated { id: id.clone() }).await;
            }
        }

        Ok(())
    }

    /// Deletes completed/cancelled records older than `max_age_secs`.
    pub async fn cleanup_old_transfers(&self, max_age_secs: i64) {
        let now = chrono::Utc::now().timestamp();
        let mut transfers = self.transfers.write().await;
        transfers.retain(|_, t| {
            if !t.is_terminal() {
                return true;
            }
            match t.completed_at {
                Some(completed_at) => now - completed_at < max_age_secs,
                None => true,
            }
        });
    }

    /// Cancels any transfer whose `last_activity` exceeds 24 hours (§4.I
    /// stale-transfer GC worker).
    pub async fn cancel_stale_transfers(&self) {
        let now = chrono::Utc::now().timestamp();
        let stale_ids: Vec<String> = {
            let transfers = self.transfers.read().await;
            transfers
                .values()
                .filter(|t| !t.is_terminal() && now - t.last_activity > STALE_AFTER_SECS)
                .map(|t| t.id.clone())
                .collect()
        };

        for id in stale_ids {
            debug!("cancelling stale transfer {id}");
            let _ = self.cancel(&id).await;
        }
    }
}
