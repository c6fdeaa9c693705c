//! Runtime configuration.
//!
//! Everything is read from environment variables with fixed defaults, so a
//! bare `beacon_server` comes up with the design parameters and deployments
//! override per variable. The VDF parameters and aggregation seed are
//! *protocol* constants shared between the beacon and its verifying
//! clients: a client that disagrees on any of them cannot verify proofs.

use std::path::PathBuf;
use std::time::Duration;

/// Default seed the aggregate VDF discriminant is hashed from. Public and
/// immutable for the lifetime of a deployment: regenerating it invalidates
/// all previously published proofs.
pub const DEFAULT_AGGREGATION_SEED: &[u8] = b"randbeacon/aggregation-discriminant/v1";

/// Beacon runtime configuration.
#[derive(Clone, Debug)]
pub struct BeaconConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Seconds between rollovers.
    pub interval_seconds: u64,
    /// Aggregation window size W.
    pub window: usize,
    /// Form/scalar width of the aggregate VDF, in bits.
    pub vdf_bits: usize,
    /// Squarings per stage evaluation.
    pub vdf_iterations: u64,
    /// Seed of the aggregation discriminant.
    pub aggregation_seed: Vec<u8>,
    /// PKCS#8 PEM private key location.
    pub private_key_path: PathBuf,
    /// SPKI PEM public key location.
    pub public_key_path: PathBuf,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        BeaconConfig {
            listen: "127.0.0.1:5000".to_string(),
            interval_seconds: 3,
            window: 10,
            vdf_bits: 256,
            vdf_iterations: 1 << 10,
            aggregation_seed: DEFAULT_AGGREGATION_SEED.to_vec(),
            private_key_path: PathBuf::from("priv.key"),
            public_key_path: PathBuf::from("pub.key"),
        }
    }
}

impl BeaconConfig {
    /// Reads the configuration from the environment, falling back to the
    /// defaults above for unset variables. Malformed values are rejected
    /// rather than silently defaulted.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = BeaconConfig::default();
        if let Ok(v) = std::env::var("BEACON_LISTEN") {
            cfg.listen = v;
        }
        if let Ok(v) = std::env::var("BEACON_INTERVAL_SECS") {
            cfg.interval_seconds = v.parse()?;
        }
        if let Ok(v) = std::env::var("BEACON_WINDOW") {
            cfg.window = v.parse()?;
            anyhow::ensure!(cfg.window >= 1, "BEACON_WINDOW must be at least 1");
        }
        if let Ok(v) = std::env::var("BEACON_VDF_BITS") {
            cfg.vdf_bits = v.parse()?;
        }
        if let Ok(v) = std::env::var("BEACON_VDF_ITERS") {
            cfg.vdf_iterations = v.parse()?;
        }
        if let Ok(v) = std::env::var("BEACON_AGG_SEED") {
            cfg.aggregation_seed = v.into_bytes();
        }
        if let Ok(v) = std::env::var("BEACON_PRIV_KEY") {
            cfg.private_key_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BEACON_PUB_KEY") {
            cfg.public_key_path = PathBuf::from(v);
        }
        Ok(cfg)
    }

    /// Rollover period as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_parameters() {
        let cfg = BeaconConfig::default();
        assert_eq!(cfg.interval_seconds, 3);
        assert_eq!(cfg.window, 10);
        assert_eq!(cfg.vdf_bits, 256);
        assert_eq!(cfg.vdf_iterations, 1024);
        assert_eq!(cfg.interval(), Duration::from_secs(3));
    }
}
