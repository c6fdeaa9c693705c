//! CLI contributor: submit entropy to a beacon, then independently verify
//! a later stage's randomness against the receipt.
//!
//! Flags:
//!   --url <base>            beacon base URL (default http://127.0.0.1:5000)
//!   --randomness <hex>      contribution bytes (default: 32 random bytes)
//!   --target-offset <n>     stages to wait past the contribution (default 12)
//!
//! The aggregate VDF parameters are deployment constants and are read from
//! the same environment variables the server uses (BEACON_VDF_BITS,
//! BEACON_VDF_ITERS, BEACON_AGG_SEED).

#![forbid(unsafe_code)]

use std::env;

use rand::RngCore;

use randbeacon::client::{final_randomness, BeaconClient};
use randbeacon::config::BeaconConfig;
use randbeacon::vdf::AggregateVdf;

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let url = parse_flag(&args, "--url").unwrap_or_else(|| "http://127.0.0.1:5000".to_string());
    let target_offset: u64 = parse_flag(&args, "--target-offset")
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(12);
    let randomness = match parse_flag(&args, "--randomness") {
        Some(hex_str) => hex::decode(hex_str)?,
        None => {
            let mut bytes = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        }
    };

    let config = BeaconConfig::from_env()?;
    let avdf = AggregateVdf::new(
        config.vdf_bits,
        config.vdf_iterations,
        &config.aggregation_seed,
    );

    let client = BeaconClient::connect(&url, avdf).await?;
    let info = client.info().await?;
    eprintln!(
        "beacon at stage {} ({}, {} contributions), window {}",
        info.stage,
        info.phase,
        info.contributions,
        client.config().window_size
    );

    let contribution = client.contribute(&randomness).await?;
    eprintln!(
        "contributed {} at stage {} index {} (receipt signature verified)",
        hex::encode(&contribution.value),
        contribution.stage,
        contribution.data_index
    );

    let target = contribution.stage + target_offset;
    eprintln!("waiting for stage {target} to complete...");
    let y = client.verified_randomness(&contribution, target).await?;

    println!("stage {target} output     : {}", hex::encode(&y));
    println!("stage {target} randomness : {}", hex::encode(final_randomness(&y)));
    Ok(())
}
