use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::catalog::CatalogStore;
use crate::dht::DhtManager;
use crate::error::{Result, SilmarilError};
use crate::paths::Paths;
use crate::registry::ManifestRegistry;
use crate::session::{TorrentSessionManager, TransferIntent};
use crate::signing::SigningKeypair;
use crate::state::StateStore;
use crate::transfer::TransferManager;

pub struct PublishRequest {
    pub directory: std::path::PathBuf,
    pub name: String,
    pub license: String,
    pub version: String,
    pub inference_hints: Option<crate::manifest::InferenceHints>,
    pub piece_length: u32,
    pub skip_dht: bool,
    pub sign: bool,
}

pub struct PublishOutcome {
    pub infohash: String,
    pub transfer_id: String,
}

/// Orchestrates the registry, torrent-session manager, catalog, and DHT
/// manager through the ten-step publication sequence (§4.H). Owns no state
/// of its own.
pub struct PublicationPipeline {
    paths: Paths,
    registry: Arc<ManifestRegistry>,
    session: Arc<TorrentSessionManager>,
    catalog: Arc<CatalogStore>,
    dht: Option<Arc<DhtManager>>,
    transfers: Arc<TransferManager>,
    state: Arc<StateStore>,
    signing: Option<Arc<SigningKeypair>>,
}

impl PublicationPipeline {
    pub fn new(
        paths: Paths,
        registry: Arc<ManifestRegistry>,
        session: Arc<TorrentSessionManager>,
        catalog: Arc<CatalogStore>,
        dht: Option<Arc<DhtManager>>,
        transfers: Arc<TransferManager>,
        state: Arc<StateStore>,
        signing: Option<Arc<SigningKeypair>>,
    ) -> Self {
        Self {
            paths,
            registry,
            session,
            catalog,
            dht,
            transfers,
            state,
            signing,
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome> {
        // Step 1: verify the source directory.
        if !request.directory.is_dir() {
            return Err(SilmarilError::NotFound(format!(
                "{} is not a directory",
                request.directory.display()
            )));
        }

        // Step 2: move into canonical ModelPath(name) if not already there.
        let canonical_dir = self.paths.model_path(&request.name);
        if request.directory != canonical_dir {
            if canonical_dir.exists() {
                return Err(SilmarilError::AlreadyExists(format!(
                    "{} already exists",
                    canonical_dir.display()
                )));
            }
            copy_dir_recursive(&request.directory, &canonical_dir)?;
        }

        // Step 3: rescan, forcing a refresh if the manifest is still missing.
        self.registry.scan().await?;
        let mut manifest = match self.registry.get(&request.name).await {
            Ok(manifest) => manifest,
            Err(SilmarilError::NotFound(_)) => self.registry.refresh(&request.name).await?,
            Err(e) => return Err(e),
        };

        // Step 4: overwrite provided fields.
        manifest.license = request.license.clone();
        manifest.version = request.version.clone();
        if let Some(hints) = request.inference_hints.clone() {
            manifest.inference_hints = hints;
        }

        // Step 5: create the torrent file, then relocate it to its
        // infohash-keyed canonical path once the infohash is known — this is
        // the layout restart recovery reads back from (§4.D).
        let draft_path = self.paths.torrent_path(&request.name);
        let infohash = crate::torrent_file::create_torrent(
            &canonical_dir,
            &draft_path,
            &request.name,
            request.piece_length,
        )?;
        let torrent_path = self.paths.torrent_path_for_infohash(&infohash);
        if draft_path != torrent_path {
            if let Some(dir) = torrent_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::rename(&draft_path, &torrent_path)?;
        }
        manifest.magnet_uri = Some(format!("magnet:?xt=urn:btih:{infohash}"));

        // Step 6: persist the manifest, signing it first if requested.
        if request.sign {
            if let Some(signing) = &self.signing {
                manifest.signature = None;
                let canonical = manifest.canonical_bytes()?;
                manifest.signature = Some(signing.sign(&canonical));
            }
        }
        self.registry.save(manifest.clone()).await?;

        // Step 7: register with the session manager as a seed.
        self.session
            .add(&torrent_path, &request.name, &canonical_dir, TransferIntent::Seed, &self.state)
            .await?;

        // Step 8: flip seeding on.
        self.session.start_seeding(&infohash, &self.state).await?;

        // Step 9: announce to the DHT unless skipped.
        if !request.skip_dht {
            if let Some(dht) = &self.dht {
                dht.announce_model(request.name.clone(), infohash.clone(), manifest.total_size)
                    .await?;
            }
        }
        self.catalog
            .add_model(&request.name, infohash.clone(), manifest.total_size)
            .await?;

        // Step 10: create a seed transfer record.
        let transfer_id = self
            .transfers
            .create_seed(request.name.clone(), infohash.clone(), manifest.total_size)
            .await;

        info!(name = %request.name, infohash = %infohash, "published model");

        Ok(PublishOutcome { infohash, transfer_id })
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = entry.metadata()?.permissions().mode();
                std::fs::set_permissions(&dst_path, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_dir_recursive_preserves_tree_shape() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("a.bin"), b"hello").unwrap();
        std::fs::write(src.path().join("nested").join("b.bin"), b"world").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let dest_dir = dst.path().join("model");
        copy_dir_recursive(src.path(), &dest_dir).unwrap();

        assert_eq!(std::fs::read(dest_dir.join("a.bin")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dest_dir.join("nested").join("b.bin")).unwrap(), b"world");
    }
}
