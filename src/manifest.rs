use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SilmarilError};

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestFile {
    pub path: String,
    pub length: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InferenceHints {
    pub min_ram_gb: Option<u32>,
    pub min_vram_gb: Option<u32>,
    pub context_length: Option<u32>,
}

/// The unit of publishable content (§3). The `signature` field is kept last
/// in declaration order so that, when present, it serializes last; canonical
/// bytes for signing/verification are produced with the field omitted
/// entirely (§4.B, §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub license: String,
    pub architecture: Option<String>,
    pub model_type: Option<String>,
    pub parameter_count: Option<u64>,
    pub inference_hints: InferenceHints,
    pub total_size: u64,
    pub files: Vec<ManifestFile>,
    pub magnet_uri: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ModelManifest {
    pub fn new(name: String, version: String) -> Self {
        Self {
            name,
            version,
            description: String::new(),
            license: String::new(),
            architecture: None,
            model_type: None,
            parameter_count: None,
            inference_hints: InferenceHints::default(),
            total_size: 0,
            files: Vec::new(),
            magnet_uri: None,
            created_at: chrono::Utc::now().timestamp(),
            signature: None,
        }
    }

    /// Canonical bytes used for both signing and verification: the manifest
    /// serialized with `signature` omitted (§4.B, §9).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut clone = self.clone();
        clone.signature = None;
        Ok(serde_json::to_vec(&clone)?)
    }

    /// Invariant 1 (§8): every file's recorded SHA-256 matches the on-disk
    /// bytes, and `total_size` equals the sum of listed file lengths.
    pub fn verify_integrity(&self, model_dir: &Path) -> Result<()> {
        let sum: u64 = self.files.iter().map(|f| f.length).sum();
        if sum != self.total_size {
            return Err(SilmarilError::IntegrityError(format!(
                "total_size {} does not match sum of file lengths {}",
                self.total_size, sum
            )));
        }

        for file in &self.files {
            let full_path = model_dir.join(&file.path);
            let actual = hash_file(&full_path)?;
            if actual != file.sha256 {
                return Err(SilmarilError::IntegrityError(format!(
                    "{} hash mismatch: expected {}, got {actual}",
                    file.path, file.sha256
                )));
            }
        }

        Ok(())
    }
}

/// Streams a file through SHA-256 with a fixed-size heap buffer; never
/// buffers the whole file (§4.C).
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> ModelManifest {
        let mut m = ModelManifest::new("acme/widget-1b".to_string(), "main".to_string());
        m.license = "apache-2.0".to_string();
        m.total_size = 10;
        m.files.push(ManifestFile {
            path: "model.bin".to_string(),
            length: 10,
            sha256: "deadbeef".repeat(8),
        });
        m
    }

    #[test]
    fn canonical_bytes_omit_signature_field() {
        let mut m = sample_manifest();
        m.signature = Some("sig".to_string());
        let bytes = m.canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("signature"));
    }

    #[test]
    fn verify_integrity_detects_total_size_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let mut m = sample_manifest();
        m.total_size = 999;
        std::fs::write(temp.path().join("model.bin"), vec![0u8; 10]).unwrap();
        assert!(m.verify_integrity(temp.path()).is_err());
    }

    #[test]
    fn verify_integrity_detects_hash_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let m = sample_manifest();
        std::fs::write(temp.path().join("model.bin"), vec![0x42u8; 10]).unwrap();
        let err = m.verify_integrity(temp.path()).unwrap_err();
        assert!(matches!(err, SilmarilError::IntegrityError(_)));
    }

    #[test]
    fn verify_integrity_succeeds_on_matching_bytes() {
        let temp = tempfile::tempdir().unwrap();
        let data = vec![0x42u8; 10];
        std::fs::write(temp.path().join("model.bin"), &data).unwrap();

        let mut m = sample_manifest();
        m.files[0].sha256 = hash_file(&temp.path().join("model.bin")).unwrap();
        m.verify_integrity(temp.path()).unwrap();
    }

    #[test]
    fn hash_file_matches_known_sha256() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
