use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::CatalogStore;
use crate::config::SilmarilConfig;
use crate::dht::DhtManager;
use crate::error::{Result, SilmarilError};
use crate::paths::Paths;
use crate::publish::PublicationPipeline;
use crate::registry::ManifestRegistry;
use crate::session::TorrentSessionManager;
use crate::signing::SigningKeypair;
use crate::state::StateStore;
use crate::transfer::TransferManager;

const DHT_REFRESH_PERIOD: Duration = Duration::from_secs(30 * 60);
const CATALOG_REFRESH_PERIOD: Duration = Duration::from_secs(30 * 60);
const CATALOG_REFRESH_INITIAL_DELAY: Duration = Duration::from_secs(2 * 60);
const STATE_SNAPSHOT_PERIOD: Duration = Duration::from_secs(5 * 60);
const STALE_TRANSFER_GC_PERIOD: Duration = Duration::from_secs(3600);
const STATS_COLLECTION_PERIOD: Duration = Duration::from_secs(30);

/// An acquired, process-exclusive `daemon.lock` (§4.I). Deleting the lock
/// and PID files is the caller's responsibility on clean shutdown — this
/// type does not delete them on drop, since a crash should leave them
/// behind for the next startup's liveness probe.
pub struct DaemonLock {
    paths: Paths,
}

impl DaemonLock {
    /// Acquires the lock via O_CREAT|O_EXCL. If a stale lock is found (the
    /// recorded PID no longer exists), it is reclaimed; any other existing
    /// lock is reported as `LockHeld` (§9 decision).
    pub fn acquire(paths: Paths) -> Result<Self> {
        std::fs::create_dir_all(paths.daemon_dir())?;
        match try_create_lock_file(&paths) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_lock_stale(&paths) {
                    warn!("reclaiming stale daemon.lock from a crashed prior instance");
                    let _ = std::fs::remove_file(paths.lock_file());
                    let _ = std::fs::remove_file(paths.pid_file());
                    try_create_lock_file(&paths)?;
                } else {
                    return Err(SilmarilError::LockHeld);
                }
            }
            Err(e) => return Err(e.into()),
        }

        std::fs::write(paths.pid_file(), std::process::id().to_string())?;
        Ok(Self { paths })
    }

    pub fn release(&self) {
        let _ = std::fs::remove_file(self.paths.lock_file());
        let _ = std::fs::remove_file(self.paths.pid_file());
    }
}

fn try_create_lock_file(paths: &Paths) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(paths.lock_file())
        .map(|_| ())
}

#[cfg(unix)]
fn is_lock_stale(paths: &Paths) -> bool {
    let Ok(contents) = std::fs::read_to_string(paths.pid_file()) else {
        return true;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return true;
    };
    // SAFETY: signal 0 performs no action beyond existence/permission checks.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return false;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn is_lock_stale(_paths: &Paths) -> bool {
    false
}

/// Owns every manager and drives the background workers in §4.I. The
/// single process-wide `CancellationToken` is threaded through every
/// worker per §5.
pub struct Supervisor {
    paths: Paths,
    lock: DaemonLock,
    state: Arc<StateStore>,
    registry: Arc<ManifestRegistry>,
    session: Arc<TorrentSessionManager>,
    catalog: Arc<CatalogStore>,
    dht: Arc<DhtManager>,
    transfers: Arc<TransferManager>,
    pipeline: Arc<PublicationPipeline>,
    token: CancellationToken,
}

impl Supervisor {
    pub async fn start(config: SilmarilConfig) -> Result<Self> {
        let paths = Paths::from_config(&config);
        paths.ensure_layout()?;

        let lock = DaemonLock::acquire(paths.clone())?;

        let state = Arc::new(StateStore::load(&paths.state_file()).await?);
        let registry = Arc::new(ManifestRegistry::new(paths.clone()));
        registry.scan().await?;

        let signing = Arc::new(SigningKeypair::load_or_generate(&paths.keys_dir())?);

        let session = Arc::new(TorrentSessionManager::new(&paths.db_dir(), &config).await?);
        session.restore_from_state(&state, &paths).await;

        let catalog = Arc::new(CatalogStore::load_from_disk(paths.clone()).await?);
        let dht = Arc::new(DhtManager::new(&config, catalog.clone(), session.clone(), state.clone()).await?);
        let transfers = Arc::new(TransferManager::new(session.clone()));

        let pipeline = Arc::new(PublicationPipeline::new(
            paths.clone(),
            registry.clone(),
            session.clone(),
            catalog.clone(),
            Some(dht.clone()),
            transfers.clone(),
            state.clone(),
            Some(signing),
        ));

        let token = CancellationToken::new();

        info!("supervisor started");

        Ok(Self {
            paths,
            lock,
            state,
            registry,
            session,
            catalog,
            dht,
            transfers,
            pipeline,
            token,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn pipeline(&self) -> Arc<PublicationPipeline> {
        self.pipeline.clone()
    }

    pub fn transfers(&self) -> Arc<TransferManager> {
        self.transfers.clone()
    }

    pub fn dht(&self) -> Arc<DhtManager> {
        self.dht.clone()
    }

    pub fn catalog(&self) -> Arc<CatalogStore> {
        self.catalog.clone()
    }

    pub fn session(&self) -> Arc<TorrentSessionManager> {
        self.session.clone()
    }

    pub fn registry(&self) -> Arc<ManifestRegistry> {
        self.registry.clone()
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Runs every background worker until the cancellation token fires,
    /// then performs the orchestrated shutdown sequence (§4.I).
    pub async fn run(self) -> Result<()> {
        let token = self.token.clone();

        let workers = vec![
            tokio::spawn(dht_refresh_worker(self.dht.clone(), token.clone())),
            tokio::spawn(catalog_refresh_worker(
                self.session.clone(),
                self.catalog.clone(),
                self.dht.clone(),
                token.clone(),
            )),
            tokio::spawn(state_snapshot_worker(self.state.clone(), token.clone())),
            tokio::spawn(stale_transfer_gc_worker(self.transfers.clone(), token.clone())),
            tokio::spawn(stats_collection_worker(self.transfers.clone(), token.clone())),
        ];

        token.cancelled().await;
        info!("shutdown signal received, draining workers");

        for worker in workers {
            let _ = worker.await;
        }

        self.shutdown().await
    }

    async fn shutdown(self) -> Result<()> {
        if let Err(e) = self.state.save().await {
            warn!(error = %e, "failed to save state during shutdown");
        }
        self.session.shutdown(&self.state).await;
        self.dht.shutdown().await;
        self.lock.release();
        info!("supervisor shut down cleanly");
        Ok(())
    }
}

async fn dht_refresh_worker(dht: Arc<DhtManager>, token: CancellationToken) {
    let mut ticker = interval(DHT_REFRESH_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                dht.refresh_announcements().await;
            }
        }
    }
}

async fn catalog_refresh_worker(
    session: Arc<TorrentSessionManager>,
    catalog: Arc<CatalogStore>,
    dht: Arc<DhtManager>,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + CATALOG_REFRESH_INITIAL_DELAY, CATALOG_REFRESH_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let mut any = false;
                for infohash in session.list_infohashes().await {
                    if let Ok(stats) = session.stats(&infohash).await {
                        if stats.seeding {
                            if catalog.add_model(&stats.name, infohash, stats.bytes_down.max(stats.bytes_up)).await.is_ok() {
                                any = true;
                            }
                        }
                    }
                }
                if any {
                    dht.republish_catalog().await;
                }
            }
        }
    }
}

async fn state_snapshot_worker(state: Arc<StateStore>, token: CancellationToken) {
    let mut ticker = interval(STATE_SNAPSHOT_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = state.save().await {
                    warn!(error = %e, "periodic state snapshot failed");
                }
            }
        }
    }
}

async fn stale_transfer_gc_worker(transfers: Arc<TransferManager>, token: CancellationToken) {
    let mut ticker = interval(STALE_TRANSFER_GC_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                transfers.cancel_stale_transfers().await;
            }
        }
    }
}

async fn stats_collection_worker(transfers: Arc<TransferManager>, token: CancellationToken) {
    let mut ticker = interval(STATS_COLLECTION_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = transfers.update_stats().await {
                    warn!(error = %e, "periodic stats collection failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_second_acquire_fails_with_lock_held() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = SilmarilConfig::default();
        config.home = Some(temp.path().to_string_lossy().into_owned());
        let paths = Paths::from_config(&config);
        paths.ensure_layout().unwrap();

        let lock = DaemonLock::acquire(paths.clone()).unwrap();
        let err = DaemonLock::acquire(paths.clone()).unwrap_err();
        assert!(matches!(err, SilmarilError::LockHeld));

        lock.release();
        DaemonLock::acquire(paths).unwrap();
    }

    #[test]
    fn stale_lock_from_dead_pid_is_reclaimed() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = SilmarilConfig::default();
        config.home = Some(temp.path().to_string_lossy().into_owned());
        let paths = Paths::from_config(&config);
        paths.ensure_layout().unwrap();

        std::fs::write(paths.lock_file(), b"").unwrap();
        // PID 1 on most test sandboxes is init and alive, so use a PID
        // extremely unlikely to exist: i32::MAX.
        std::fs::write(paths.pid_file(), i32::MAX.to_string()).unwrap();

        let lock = DaemonLock::acquire(paths).unwrap();
        lock.release();
    }
}
