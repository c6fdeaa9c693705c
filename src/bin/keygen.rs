//! One-shot key generator: writes the beacon's Ed25519 signing key pair as
//! PEM files (`priv.key` PKCS#8, `pub.key` SubjectPublicKeyInfo).
//!
//! Usage: keygen [private_path] [public_path] [--force]
//!
//! Refuses to overwrite existing keys unless --force is given — rotating
//! the key silently would orphan every receipt signed so far.

#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use randbeacon::keys;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let force = args.iter().any(|a| a == "--force");
    let mut paths = args.iter().filter(|a| !a.starts_with("--"));
    let private_path = PathBuf::from(paths.next().map(String::as_str).unwrap_or("priv.key"));
    let public_path = PathBuf::from(paths.next().map(String::as_str).unwrap_or("pub.key"));

    if !force && (private_path.exists() || public_path.exists()) {
        anyhow::bail!(
            "{} or {} already exists; pass --force to overwrite",
            private_path.display(),
            public_path.display()
        );
    }

    let key = keys::generate();
    keys::save_keypair(&key, &private_path, &public_path)?;
    eprintln!(
        "wrote {} (PKCS#8) and {} (SPKI)",
        private_path.display(),
        public_path.display()
    );
    Ok(())
}
