use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{Result, SilmarilError};
use crate::manifest::{hash_file, InferenceHints, ManifestFile, ModelManifest};
use crate::paths::Paths;

/// Sidecar `config.json` fields opportunistically read HuggingFace-style
/// (§4.C). Absence, or absence of any individual field, is non-fatal.
#[derive(Debug, Deserialize, Default)]
struct HuggingFaceConfig {
    architectures: Option<Vec<String>>,
    model_type: Option<String>,
    #[serde(rename = "max_position_embeddings")]
    context_length: Option<u32>,
}

/// Owns the `models/` tree (§4.C): scans it, maintains a per-model manifest
/// cache, and re-hashes on demand.
pub struct ManifestRegistry {
    paths: Paths,
    cache: RwLock<HashMap<String, ModelManifest>>,
}

impl ManifestRegistry {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Walks `models/`, parsing `silmaril-manifest.json` where present and
    /// synthesizing a skeletal manifest otherwise. `.`-prefixed entries and
    /// `.git` subtrees are excluded from hashing and the file list.
    pub async fn scan(&self) -> Result<()> {
        let models_dir = self.paths.models_dir();
        if !models_dir.is_dir() {
            return Ok(());
        }

        let mut discovered = Vec::new();
        for org_entry in std::fs::read_dir(&models_dir)? {
            let org_entry = org_entry?;
            if !org_entry.file_type()?.is_dir() {
                continue;
            }
            let org = org_entry.file_name().to_string_lossy().into_owned();

            for model_entry in std::fs::read_dir(org_entry.path())? {
                let model_entry = model_entry?;
                if !model_entry.file_type()?.is_dir() {
                    continue;
                }
                let model = model_entry.file_name().to_string_lossy().into_owned();
                discovered.push(format!("{org}/{model}"));
            }
        }

        for name in discovered {
            let model_dir = self.paths.model_path(&name);
            let manifest_path = self.paths.manifest_path(&name);

            let manifest = if manifest_path.exists() {
                match std::fs::read(&manifest_path) {
                    Ok(bytes) => match serde_json::from_slice::<ModelManifest>(&bytes) {
                        Ok(manifest) => {
                            if let Err(e) = manifest.verify_integrity(&model_dir) {
                                warn!("manifest for {name} failed integrity check, skipping: {e}");
                                continue;
                            }
                            manifest
                        }
                        Err(e) => {
                            warn!("manifest for {name} is malformed, skipping: {e}");
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!("failed to read manifest for {name}: {e}");
                        continue;
                    }
                }
            } else {
                synthesize_manifest(&name, &model_dir)?
            };

            self.cache.write().await.insert(name, manifest);
        }

        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<ModelManifest> {
        self.cache
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SilmarilError::NotFound(format!("model {name} not found")))
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn save(&self, manifest: ModelManifest) -> Result<()> {
        let path = self.paths.manifest_path(&manifest.name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&path, json)?;
        self.cache.write().await.insert(manifest.name.clone(), manifest);
        Ok(())
    }

    /// Invariant 1 (§8): re-verifies `name`'s cached manifest against the
    /// bytes currently on disk. `Scan()` already applies this check itself
    /// before caching an on-disk manifest; this is the directly callable
    /// form for a caller that wants an explicit integrity check of a
    /// model already in the cache.
    pub async fn verify(&self, name: &str) -> Result<()> {
        let manifest = self.get(name).await?;
        manifest.verify_integrity(&self.paths.model_path(name))
    }

    /// Re-hashes every file of `name` and rewrites its manifest.
    pub async fn refresh(&self, name: &str) -> Result<ModelManifest> {
        let model_dir = self.paths.model_path(name);
        let mut manifest = synthesize_manifest(name, &model_dir)?;

        if let Ok(existing) = self.get(name).await {
            manifest.description = existing.description;
            manifest.license = existing.license;
            manifest.version = existing.version;
            manifest.inference_hints = existing.inference_hints;
            manifest.magnet_uri = existing.magnet_uri;
            manifest.signature = existing.signature;
        }

        self.save(manifest.clone()).await?;
        Ok(manifest)
    }
}

fn synthesize_manifest(name: &str, model_dir: &Path) -> Result<ModelManifest> {
    let mut manifest = ModelManifest::new(name.to_string(), "main".to_string());
    let mut files = Vec::new();
    let mut total_size = 0u64;

    collect_files(model_dir, model_dir, &mut files, &mut total_size)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));

    manifest.files = files;
    manifest.total_size = total_size;

    if let Ok(config_bytes) = std::fs::read(model_dir.join("config.json")) {
        if let Ok(hf_config) = serde_json::from_slice::<HuggingFaceConfig>(&config_bytes) {
            manifest.architecture = hf_config.architectures.and_then(|a| a.into_iter().next());
            manifest.model_type = hf_config.model_type;
            manifest.inference_hints = InferenceHints {
                context_length: hf_config.context_length,
                ..InferenceHints::default()
            };
        }
    }

    Ok(manifest)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<ManifestFile>,
    total_size: &mut u64,
) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name_str = file_name.to_string_lossy();

        if name_str.starts_with('.') {
            continue;
        }

        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files, total_size)?;
        } else {
            if name_str == "silmaril-manifest.json" {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let length = entry.metadata()?.len();
            let sha256 = hash_file(&path)?;
            *total_size += length;
            files.push(ManifestFile {
                path: relative,
                length,
                sha256,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SilmarilConfig;

    fn test_paths() -> (tempfile::TempDir, Paths) {
        let temp = tempfile::tempdir().unwrap();
        let mut config = SilmarilConfig::default();
        config.home = Some(temp.path().to_string_lossy().into_owned());
        let paths = Paths::from_config(&config);
        (temp, paths)
    }

    #[tokio::test]
    async fn scan_synthesizes_manifest_when_missing() {
        let (_temp, paths) = test_paths();
        let model_dir = paths.model_path("acme/widget-1b");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.bin"), vec![0x42u8; 1024]).unwrap();

        let registry = ManifestRegistry::new(paths);
        registry.scan().await.unwrap();

        let manifest = registry.get("acme/widget-1b").await.unwrap();
        assert_eq!(manifest.total_size, 1024);
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].path, "model.bin");
    }

    #[tokio::test]
    async fn scan_excludes_dotfiles_and_git_subtree() {
        let (_temp, paths) = test_paths();
        let model_dir = paths.model_path("acme/widget-1b");
        std::fs::create_dir_all(model_dir.join(".git")).unwrap();
        std::fs::write(model_dir.join(".git").join("HEAD"), b"ref").unwrap();
        std::fs::write(model_dir.join(".hidden"), b"x").unwrap();
        std::fs::write(model_dir.join("model.bin"), vec![0u8; 4]).unwrap();

        let registry = ManifestRegistry::new(paths);
        registry.scan().await.unwrap();

        let manifest = registry.get("acme/widget-1b").await.unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].path, "model.bin");
    }

    #[tokio::test]
    async fn list_returns_lexicographic_order() {
        let (_temp, paths) = test_paths();
        for name in ["zeta/model", "alpha/model"] {
            let dir = paths.model_path(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("f.bin"), b"x").unwrap();
        }

        let registry = ManifestRegistry::new(paths);
        registry.scan().await.unwrap();
        assert_eq!(registry.list().await, vec!["alpha/model", "zeta/model"]);
    }

    #[tokio::test]
    async fn get_missing_model_is_not_found() {
        let (_temp, paths) = test_paths();
        let registry = ManifestRegistry::new(paths);
        let err = registry.get("nope/nope").await.unwrap_err();
        assert!(matches!(err, SilmarilError::NotFound(_)));
    }

    #[tokio::test]
    async fn refresh_preserves_license_and_rehashes_files() {
        let (_temp, paths) = test_paths();
        let model_dir = paths.model_path("acme/widget-1b");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.bin"), vec![0x11u8; 8]).unwrap();

        let registry = ManifestRegistry::new(paths);
        registry.scan().await.unwrap();
        let mut manifest = registry.get("acme/widget-1b").await.unwrap();
        manifest.license = "apache-2.0".to_string();
        registry.save(manifest).await.unwrap();

        std::fs::write(model_dir.join("model.bin"), vec![0x22u8; 16]).unwrap();
        let refreshed = registry.refresh("acme/widget-1b").await.unwrap();

        assert_eq!(refreshed.license, "apache-2.0");
        assert_eq!(refreshed.total_size, 16);
    }

    #[tokio::test]
    async fn tampering_with_a_file_after_scan_fails_verify() {
        let (_temp, paths) = test_paths();
        let model_dir = paths.model_path("acme/widget-1b");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.bin"), vec![0x42u8; 64]).unwrap();

        let registry = ManifestRegistry::new(paths);
        registry.scan().await.unwrap();
        let manifest = registry.get("acme/widget-1b").await.unwrap();
        registry.save(manifest).await.unwrap();
        registry.verify("acme/widget-1b").await.unwrap();

        std::fs::write(model_dir.join("model.bin"), vec![0x43u8; 64]).unwrap();
        let err = registry.verify("acme/widget-1b").await.unwrap_err();
        assert!(matches!(err, SilmarilError::IntegrityError(_)));
    }

    #[tokio::test]
    async fn scan_skips_a_manifest_that_fails_integrity_check() {
        let (_temp, paths) = test_paths();
        let model_dir = paths.model_path("acme/widget-1b");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.bin"), vec![0x42u8; 64]).unwrap();

        let registry = ManifestRegistry::new(paths.clone());
        registry.scan().await.unwrap();
        let manifest = registry.get("acme/widget-1b").await.unwrap();
        registry.save(manifest).await.unwrap();

        std::fs::write(model_dir.join("model.bin"), vec![0x43u8; 64]).unwrap();

        let fresh = ManifestRegistry::new(paths);
        fresh.scan().await.unwrap();
        assert!(matches!(
            fresh.get("acme/widget-1b").await.unwrap_err(),
            SilmarilError::NotFound(_)
        ));
    }
}
