use std::path::Path;

use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::warn;

use crate::error::{Result, SilmarilError};

const KEY_BITS: usize = 2048;

/// Long-lived manifest-signing keypair (§4.B). Distinct from the well-known
/// ed25519-style catalog key used by the DHT manager (§4.E/§4.F) — this one
/// signs individual manifests and is generated per daemon instance.
pub struct SigningKeypair {
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
}

impl SigningKeypair {
    /// Loads the keypair from `keys/private.pem` / `keys/public.pem`,
    /// autogenerating (with a warning) if the private key file is missing.
    /// A malformed PEM is `Fatal`.
    pub fn load_or_generate(keys_dir: &Path) -> Result<Self> {
        let private_path = keys_dir.join("private.pem");
        let public_path = keys_dir.join("public.pem");

        if !private_path.exists() {
            warn!(
                "no signing key found at {}, generating a new one",
                private_path.display()
            );
            return Self::generate_and_persist(keys_dir, &private_path, &public_path);
        }

        let pem = std::fs::read_to_string(&private_path)?;
        let private_key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| SilmarilError::Fatal(format!("malformed signing key PEM: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            signing_key: SigningKey::new(private_key),
            verifying_key: VerifyingKey::new(public_key),
        })
    }

    fn generate_and_persist(
        keys_dir: &Path,
        private_path: &Path,
        public_path: &Path,
    ) -> Result<Self> {
        std::fs::create_dir_all(keys_dir)?;
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| SilmarilError::Fatal(format!("failed to generate signing key: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| SilmarilError::Fatal(format!("failed to encode private key: {e}")))?;
        let public_pem = public_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| SilmarilError::Fatal(format!("failed to encode public key: {e}")))?;

        std::fs::write(private_path, private_pem.as_str())?;
        std::fs::write(public_path, &public_pem)?;
        set_owner_only_permissions(keys_dir)?;

        Ok(Self {
            signing_key: SigningKey::new(private_key),
            verifying_key: VerifyingKey::new(public_key),
        })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.verifying_key.as_ref().clone()
    }

    /// Signs `canonical_bytes` (the manifest serialized with the signature
    /// field omitted — see §4.B) and returns the base64-encoded detached
    /// signature.
    pub fn sign(&self, canonical_bytes: &[u8]) -> String {
        let mut rng = rand::rngs::OsRng;
        let signature = self.signing_key.sign_with_rng(&mut rng, canonical_bytes);
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }
}

/// Verifies a base64-encoded detached signature over `canonical_bytes` under
/// `public_key_pem` (PKCS#1 PEM). Returns `Ok(())` on success,
/// `SignatureMismatch` on any verification failure — including a malformed
/// signature or public key, since callers treat that identically to a
/// mismatch (§4.B: "fail with SignatureMismatch, not fatal at the core
/// level").
pub fn verify(canonical_bytes: &[u8], signature_b64: &str, public_key_pem: &str) -> Result<()> {
    let public_key = RsaPublicKey::from_pkcs1_pem(public_key_pem)
        .map_err(|e| SilmarilError::SignatureMismatch(format!("invalid public key: {e}")))?;
    let verifying_key: VerifyingKey<Sha256> = VerifyingKey::new(public_key);

    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| SilmarilError::SignatureMismatch(format!("invalid base64 signature: {e}")))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| SilmarilError::SignatureMismatch(format!("malformed signature: {e}")))?;

    verifying_key
        .verify(canonical_bytes, &signature)
        .map_err(|e| SilmarilError::SignatureMismatch(e.to_string()))
}

pub fn public_key_to_pem(public_key: &RsaPublicKey) -> Result<String> {
    public_key
        .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
        .map(|p| p.to_string())
        .map_err(|e| SilmarilError::Fatal(format!("failed to encode public key: {e}")))
}

#[cfg(unix)]
fn set_owner_only_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(dir)?.permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(dir, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let keypair = SigningKeypair::load_or_generate(temp.path()).unwrap();
        let public_pem = public_key_to_pem(&keypair.public_key()).unwrap();

        let bytes = b"canonical manifest bytes";
        let signature = keypair.sign(bytes);

        verify(bytes, &signature, &public_pem).unwrap();
    }

    #[test]
    fn mutating_bytes_after_signing_fails_verification() {
        let temp = tempfile::tempdir().unwrap();
        let keypair = SigningKeypair::load_or_generate(temp.path()).unwrap();
        let public_pem = public_key_to_pem(&keypair.public_key()).unwrap();

        let signature = keypair.sign(b"canonical manifest bytes");

        let result = verify(b"canonical manifest byteZ", &signature, &public_pem);
        assert!(result.is_err());
    }

    #[test]
    fn load_or_generate_persists_key_files() {
        let temp = tempfile::tempdir().unwrap();
        let _keypair = SigningKeypair::load_or_generate(temp.path()).unwrap();
        assert!(temp.path().join("private.pem").exists());
        assert!(temp.path().join("public.pem").exists());
    }

    #[test]
    fn reloading_an_existing_key_is_stable() {
        let temp = tempfile::tempdir().unwrap();
        let first = SigningKeypair::load_or_generate(temp.path()).unwrap();
        let second = SigningKeypair::load_or_generate(temp.path()).unwrap();

        let bytes = b"stable across reloads";
        let signature = first.sign(bytes);
        let public_pem = public_key_to_pem(&second.public_key()).unwrap();
        verify(bytes, &signature, &public_pem).unwrap();
    }
}
