use std::path::{Path, PathBuf};

use crate::config::SilmarilConfig;

/// Deterministic directory layout rooted at one base directory (§4.A, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base: PathBuf,
}

impl Paths {
    pub fn from_config(config: &SilmarilConfig) -> Self {
        let base = match &config.home {
            Some(home) => PathBuf::from(home),
            None => directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".silmaril"))
                .unwrap_or_else(|| PathBuf::from(".silmaril")),
        };
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base.join("models")
    }

    pub fn torrents_dir(&self) -> PathBuf {
        self.base.join("torrents")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.base.join("registry")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base.join("db")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.base.join("keys")
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.base.join("catalog")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.base.join("daemon")
    }

    pub fn state_file(&self) -> PathBuf {
        self.daemon_dir().join("state.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.daemon_dir().join("daemon.lock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.daemon_dir().join("daemon.pid")
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.catalog_dir().join("catalog.json")
    }

    /// Staging directory a `LoadOrFetch` download lands in, kept separate
    /// from `catalog_dir()` so an in-flight fetch never clobbers the
    /// locally-authored `catalog.json` until it has been parsed and merged.
    pub fn catalog_fetch_dir(&self) -> PathBuf {
        self.catalog_dir().join("fetched")
    }

    /// Holds nothing but the single `catalog.json` a catalog-torrent build
    /// reads from. Kept apart from `catalog_dir()` itself, which also holds
    /// `catalog_fetch_dir()`'s contents — building straight from
    /// `catalog_dir()` would otherwise sweep a staged download in as bogus
    /// torrent payload.
    pub fn catalog_publish_dir(&self) -> PathBuf {
        self.catalog_dir().join("publish")
    }

    /// Lives under `torrents/`, not `catalog/`, so that building the catalog
    /// torrent from `catalog/` (whose only content file is `catalog.json`)
    /// never sweeps up a previous catalog torrent as a payload file.
    pub fn catalog_torrent_file(&self, sequence: u64) -> PathBuf {
        self.torrents_dir().join(format!("catalog_{sequence}.torrent"))
    }

    /// `ModelPath(name)` — composes the two name segments as native
    /// subdirectories under `models/`.
    pub fn model_path(&self, name: &str) -> PathBuf {
        let (org, model) = split_name(name);
        self.models_dir().join(org).join(model)
    }

    /// `TorrentPath(name)` — appends `.torrent` under `torrents/`. Used only
    /// as a scratch location while the publication pipeline builds a
    /// `.torrent` file and learns its info-hash; the canonical on-disk name
    /// once the info-hash is known is [`Paths::torrent_path_for_infohash`],
    /// which is what restart recovery looks up (§4.D).
    pub fn torrent_path(&self, name: &str) -> PathBuf {
        let (org, model) = split_name(name);
        self.torrents_dir().join(org).join(format!("{model}.torrent"))
    }

    /// `torrents/<infohash>.torrent` — the flat, infohash-keyed location
    /// restart recovery reads from (§4.D).
    pub fn torrent_path_for_infohash(&self, infohash: &str) -> PathBuf {
        self.torrents_dir().join(format!("{infohash}.torrent"))
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.model_path(name).join("silmaril-manifest.json")
    }

    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.models_dir(),
            self.torrents_dir(),
            self.registry_dir(),
            self.db_dir(),
            self.keys_dir(),
            self.catalog_dir(),
            self.daemon_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Splits a two-segment `organization/model` name. Panics are avoided by
/// treating a missing slash as an org-less model living directly under
/// `models/`.
fn split_name(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((org, model)) => (org, model),
        None => ("", name),
    }
}

/// Atomic save shared by every JSON store in this crate (`state.rs`,
/// `catalog.rs`): write to `<path>.tmp`, fsync it, rename over `path`, then
/// fsync the parent directory so the rename itself is durable (§4.A).
pub(crate) async fn atomic_write_json(path: &Path, bytes: &[u8]) -> crate::error::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    sync_file(&tmp_path).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    sync_parent_dir(path).await?;
    Ok(())
}

async fn sync_file(path: &Path) -> crate::error::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().read(true).open(&path)?;
        file.sync_all()
    })
    .await
    .map_err(|e| crate::error::SilmarilError::Fatal(format!("join error: {e}")))??;
    Ok(())
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> crate::error::Result<()> {
    let Some(dir) = path.parent().map(|p| p.to_path_buf()) else {
        return Ok(());
    };
    tokio::task::spawn_blocking(move || {
        let dir_file = std::fs::File::open(&dir)?;
        dir_file.sync_all()
    })
    .await
    .map_err(|e| crate::error::SilmarilError::Fatal(format!("join error: {e}")))??;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> crate::error::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_at(base: &Path) -> Paths {
        Paths {
            base: base.to_path_buf(),
        }
    }

    #[test]
    fn model_path_composes_two_segments() {
        let temp = tempfile::tempdir().unwrap();
        let paths = paths_at(temp.path());
        assert_eq!(
            paths.model_path("acme/widget-1b"),
            temp.path().join("models").join("acme").join("widget-1b")
        );
    }

    #[test]
    fn torrent_path_appends_extension() {
        let temp = tempfile::tempdir().unwrap();
        let paths = paths_at(temp.path());
        assert_eq!(
            paths.torrent_path("acme/widget-1b"),
            temp.path()
                .join("torrents")
                .join("acme")
                .join("widget-1b.torrent")
        );
    }

    #[test]
    fn torrent_path_for_infohash_is_flat_under_torrents_dir() {
        let temp = tempfile::tempdir().unwrap();
        let paths = paths_at(temp.path());
        assert_eq!(
            paths.torrent_path_for_infohash(&"a".repeat(40)),
            temp.path().join("torrents").join(format!("{}.torrent", "a".repeat(40)))
        );
    }

    #[test]
    fn ensure_layout_creates_all_children() {
        let temp = tempfile::tempdir().unwrap();
        let paths = paths_at(temp.path());
        paths.ensure_layout().unwrap();
        assert!(paths.models_dir().is_dir());
        assert!(paths.daemon_dir().is_dir());
        assert!(paths.keys_dir().is_dir());
    }
}
