//! Operator signing keys: Ed25519 with PEM persistence.
//!
//! The beacon signs contribution receipts over the SHA-256 of the
//! contributed bytes (explicit pre-hash, so receipts stay small and the
//! signed message is fixed-width). Keys persist as unencrypted PKCS#8 PEM
//! (private) and SubjectPublicKeyInfo PEM (public); the public PEM is what
//! `/api/pubkey` serves verbatim.

use std::path::Path;

use anyhow::Context;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Generates a fresh Ed25519 signing key from the OS RNG.
pub fn generate() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Writes the key pair as `priv.key` (PKCS#8 PEM, unencrypted) and
/// `pub.key` (SPKI PEM).
pub fn save_keypair(
    key: &SigningKey,
    private_path: &Path,
    public_path: &Path,
) -> anyhow::Result<()> {
    let private_pem = key
        .to_pkcs8_pem(Default::default())
        .context("encode private key")?;
    std::fs::write(private_path, private_pem.as_bytes())
        .with_context(|| format!("write {}", private_path.display()))?;
    let public_pem = key
        .verifying_key()
        .to_public_key_pem(Default::default())
        .context("encode public key")?;
    std::fs::write(public_path, public_pem.as_bytes())
        .with_context(|| format!("write {}", public_path.display()))?;
    Ok(())
}

/// Loads the signing key from a PKCS#8 PEM file.
pub fn load_signing_key(path: &Path) -> anyhow::Result<SigningKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("read signing key {}", path.display()))?;
    SigningKey::from_pkcs8_pem(&pem).context("parse PKCS#8 private key")
}

/// Loads the public key PEM bytes (served verbatim) from disk.
pub fn load_public_pem(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read public key {}", path.display()))
}

/// Parses a SubjectPublicKeyInfo PEM into a verifying key.
pub fn parse_public_pem(pem: &[u8]) -> anyhow::Result<VerifyingKey> {
    let text = std::str::from_utf8(pem).context("public key PEM is not UTF-8")?;
    VerifyingKey::from_public_key_pem(text).context("parse SPKI public key")
}

/// Signs `SHA-256(data)`.
pub fn sign_prehashed(key: &SigningKey, data: &[u8]) -> Vec<u8> {
    let digest: [u8; 32] = Sha256::digest(data).into();
    key.sign(&digest).to_bytes().to_vec()
}

/// Verifies a receipt signature over `SHA-256(data)`.
pub fn verify_prehashed(key: &VerifyingKey, data: &[u8], signature: &[u8]) -> bool {
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    let digest: [u8; 32] = Sha256::digest(data).into();
    key.verify(&digest, &sig).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let key = generate();
        let vk = key.verifying_key();
        let sig = sign_prehashed(&key, b"peko");
        assert_eq!(sig.len(), 64);
        assert!(verify_prehashed(&vk, b"peko", &sig));
        assert!(!verify_prehashed(&vk, b"miko", &sig));
        assert!(!verify_prehashed(&vk, b"peko", &sig[..63]));
    }

    #[test]
    fn pem_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("randbeacon-keys-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let private_path = dir.join("priv.key");
        let public_path = dir.join("pub.key");

        let key = generate();
        save_keypair(&key, &private_path, &public_path).unwrap();

        let reloaded = load_signing_key(&private_path).unwrap();
        assert_eq!(reloaded.to_bytes(), key.to_bytes());

        let pem = load_public_pem(&public_path).unwrap();
        assert!(pem.starts_with(b"-----BEGIN PUBLIC KEY-----"));
        let vk = parse_public_pem(&pem).unwrap();
        let sig = sign_prehashed(&key, b"receipt");
        assert!(verify_prehashed(&vk, b"receipt", &sig));

        std::fs::remove_dir_all(&dir).ok();
    }
}
