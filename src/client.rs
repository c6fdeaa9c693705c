//! Client-side retrieval and independent verification.
//!
//! A contributor holds a receipt `(stage, data_index, signature)` and wants
//! the randomness of some later stage `t` without trusting the operator.
//! The client:
//!
//! 1. computes the covering set of aggregation windows — trailing windows
//!    ending at `t, t−W, t−2W, …` until the contribution stage is reached,
//!    reversed to chronological order;
//! 2. fetches every stage snapshot from one before the span start (the
//!    extra snapshot supplies the previous output that chains into the
//!    first challenge; the `-1` sentinel covers stage 0) through the span
//!    end;
//! 3. recomputes each stage's VDF challenge from the fetched accumulation
//!    values and outputs, verifies the contribution's accumulator witness
//!    against its stage, and verifies each window's aggregate proof;
//! 4. returns `y_t` — hash it with [`final_randomness`] for the published
//!    beacon value.
//!
//! The span verification itself ([`verify_span`]) is pure: it sees only
//! fetched snapshots, so it is exactly as strong against a lying server as
//! against a lying network.

use std::time::Duration;

use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::acc::Accumulator;
use crate::keys::{parse_public_pem, verify_prehashed};
use crate::merkle::{MerkleAccumulator, MerkleProof, NodeHash};
use crate::stage::Phase;
use crate::vdf::AggregateVdf;
use crate::wire::{BeaconConfigMsg, ContributeReply, ContributeRequest, InfoMsg, StageSnapshot};

/// A contribution as held by the contributor: the raw value plus the
/// operator's receipt.
#[derive(Clone, Debug)]
pub struct Contribution {
    pub value: Vec<u8>,
    pub stage: u64,
    pub data_index: u64,
    pub signature: Vec<u8>,
}

/// Client-side failures. Verification failures carry enough context to
/// name the offending stage or window.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("operator signature rejected")]
    Signature,
    #[error("accumulator verification failed for stage {stage}")]
    Accumulator { stage: u64 },
    #[error("aggregate vdf verification failed for window [{start}, {end}]")]
    VdfWindow { start: u64, end: u64 },
    #[error("stage span malformed: {0}")]
    SpanShape(String),
    #[error("stage {stage} snapshot is missing {field}")]
    MissingField { stage: i64, field: &'static str },
    #[error("stage {stage} carries a malformed group element")]
    MalformedForm { stage: i64 },
    #[error("server rejected request: {0}")]
    Api(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("public key: {0}")]
    PublicKey(#[from] anyhow::Error),
}

/// The aggregation windows covering `[contribution_stage, target_stage]`,
/// chronological. Each `(start, end)` is the trailing window proven by
/// stage `end`'s aggregate proof.
pub fn windows_covering(
    contribution_stage: u64,
    target_stage: u64,
    window: usize,
) -> Vec<(u64, u64)> {
    assert!(target_stage >= contribution_stage, "target precedes contribution");
    assert!(window >= 1, "window must be at least 1");
    let w = window as i64;
    let s = contribution_stage as i64;
    let mut end = target_stage as i64;
    let mut ranges = Vec::new();
    while end >= s {
        ranges.push(((end - w + 1).max(0) as u64, end as u64));
        end -= w;
    }
    ranges.reverse();
    ranges
}

/// SHA-256 of a stage output: the beacon's published randomness.
pub fn final_randomness(y: &[u8]) -> [u8; 32] {
    Sha256::digest(y).into()
}

fn require_bytes<'a>(
    snapshot: &'a StageSnapshot,
    field: &'static str,
    value: &'a Option<Vec<u8>>,
) -> Result<&'a [u8], ClientError> {
    value.as_deref().ok_or(ClientError::MissingField {
        stage: snapshot.stage,
        field,
    })
}

/// Verifies a contribution against a fetched span of stages and returns
/// the target stage's output `y_t`.
///
/// `snapshots` must hold stages `span_start − 1 ..= span_end` in order,
/// where the span is determined by [`windows_covering`]; the leading
/// element is only read for its output (the `-1` sentinel when the span
/// starts at stage 0).
pub fn verify_span(
    accumulator: &MerkleAccumulator,
    avdf: &AggregateVdf,
    window: usize,
    contribution: &Contribution,
    accproof: &MerkleProof,
    snapshots: &[StageSnapshot],
    target_stage: u64,
) -> Result<Vec<u8>, ClientError> {
    let ranges = windows_covering(contribution.stage, target_stage, window);
    let span_start = ranges[0].0;
    let span_end = ranges[ranges.len() - 1].1;

    let expected = (span_end - span_start + 2) as usize;
    if snapshots.len() != expected {
        return Err(ClientError::SpanShape(format!(
            "expected {expected} snapshots for span [{}, {}], got {}",
            span_start as i64 - 1,
            span_end,
            snapshots.len()
        )));
    }
    for (i, snap) in snapshots.iter().enumerate() {
        let want = span_start as i64 - 1 + i as i64;
        if snap.stage != want {
            return Err(ClientError::SpanShape(format!(
                "snapshot {i} reports stage {}, expected {want}",
                snap.stage
            )));
        }
    }
    let (extra, stages) = snapshots.split_first().expect("span is non-empty");

    // 1. The contribution is included in its stage's accumulator.
    let contributed = &stages[(contribution.stage - span_start) as usize];
    let accval_bytes = require_bytes(contributed, "accval", &contributed.accval)?;
    let accval: NodeHash = accval_bytes
        .try_into()
        .map_err(|_| ClientError::SpanShape("accumulation value has wrong length".into()))?;
    if !accumulator.verify(&accval, accproof, &contribution.value) {
        return Err(ClientError::Accumulator {
            stage: contribution.stage,
        });
    }

    // 2. Recompute the challenge chain from accumulation values and
    //    previous outputs.
    let mut challenges: Vec<Vec<u8>> = Vec::with_capacity(stages.len());
    for (i, snap) in stages.iter().enumerate() {
        let accval = require_bytes(snap, "accval", &snap.accval)?;
        let prev = if i == 0 { extra } else { &stages[i - 1] };
        let prev_y = require_bytes(prev, "vdfy", &prev.vdfy)?;
        let mut hasher = Sha256::new();
        hasher.update(accval);
        hasher.update(prev_y);
        challenges.push(hasher.finalize().to_vec());
    }
    let ys = stages
        .iter()
        .map(|snap| {
            let bytes = require_bytes(snap, "vdfy", &snap.vdfy)?;
            avdf.form_from_bytes(bytes)
                .ok_or(ClientError::MalformedForm { stage: snap.stage })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // 3. Each window's aggregate proof, carried by the window's end stage.
    for &(start, end) in &ranges {
        let lo = (start - span_start) as usize;
        let hi = (end - span_start) as usize;
        let carrier = &stages[hi];
        let proof_bytes = require_bytes(carrier, "vdfproof", &carrier.vdfproof)?;
        let proof = avdf
            .form_from_bytes(proof_bytes)
            .ok_or(ClientError::MalformedForm { stage: carrier.stage })?;
        if !avdf.verify(&challenges[lo..=hi], &ys[lo..=hi], &proof) {
            return Err(ClientError::VdfWindow { start, end });
        }
        debug!(start, end, "window verified");
    }

    let target = &stages[(target_stage - span_start) as usize];
    Ok(require_bytes(target, "vdfy", &target.vdfy)?.to_vec())
}

// ============================================================================
// HTTP client
// ============================================================================

/// HTTP client for a beacon server, carrying the protocol parameters the
/// wire does not (the aggregate VDF is a deployment constant).
pub struct BeaconClient {
    http: reqwest::Client,
    base: String,
    verifying_key: ed25519_dalek::VerifyingKey,
    config: BeaconConfigMsg,
    accumulator: MerkleAccumulator,
    avdf: AggregateVdf,
}

impl BeaconClient {
    /// Connects to a beacon: fetches the operator key and the beacon
    /// configuration.
    pub async fn connect(base_url: &str, avdf: AggregateVdf) -> Result<Self, ClientError> {
        let base = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::new();
        let pem = http
            .get(format!("{base}/api/pubkey"))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let verifying_key = parse_public_pem(&pem)?;
        let config: BeaconConfigMsg = rmp_serde::from_slice(
            &http
                .get(format!("{base}/api/beacon_config"))
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?,
        )?;
        Ok(BeaconClient {
            http,
            base,
            verifying_key,
            config,
            accumulator: MerkleAccumulator,
            avdf,
        })
    }

    /// The beacon configuration fetched at connect time.
    pub fn config(&self) -> &BeaconConfigMsg {
        &self.config
    }

    async fn get_msgpack<T: serde::de::DeserializeOwned>(
        &self,
        path: String,
    ) -> Result<T, ClientError> {
        let bytes = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// `GET /api/info`.
    pub async fn info(&self) -> Result<InfoMsg, ClientError> {
        self.get_msgpack("/api/info".to_string()).await
    }

    /// Contributes entropy; checks the receipt signature before returning.
    pub async fn contribute(&self, randomness: &[u8]) -> Result<Contribution, ClientError> {
        let body = ContributeRequest {
            randomness: base64::engine::general_purpose::STANDARD.encode(randomness),
        };
        let response = self
            .http
            .post(format!("{}/api/contribute", self.base))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Api(response.text().await.unwrap_or_default()));
        }
        let reply: ContributeReply = rmp_serde::from_slice(&response.bytes().await?)?;
        let contribution = Contribution {
            value: randomness.to_vec(),
            stage: reply.stage as u64,
            data_index: reply.data_index,
            signature: reply.signature,
        };
        if !verify_prehashed(&self.verifying_key, &contribution.value, &contribution.signature) {
            return Err(ClientError::Signature);
        }
        Ok(contribution)
    }

    /// `GET /api/stage/{index}`.
    pub async fn stage(&self, index: i64) -> Result<StageSnapshot, ClientError> {
        self.get_msgpack(format!("/api/stage/{index}")).await
    }

    /// `GET /api/stage?start=&end=` (inclusive).
    pub async fn stages(&self, start: i64, end: i64) -> Result<Vec<StageSnapshot>, ClientError> {
        self.get_msgpack(format!("/api/stage?start={start}&end={end}"))
            .await
    }

    /// Membership witness for a receipt.
    pub async fn acc_proof(&self, contribution: &Contribution) -> Result<MerkleProof, ClientError> {
        self.get_msgpack(format!(
            "/api/stage/{}/accproof/{}",
            contribution.stage, contribution.data_index
        ))
        .await
    }

    /// Polls until stage `index` reaches `phase`.
    pub async fn wait_for_phase(
        &self,
        index: i64,
        phase: Phase,
        poll: Duration,
    ) -> Result<StageSnapshot, ClientError> {
        loop {
            let snap = self.stage(index).await?;
            if snap.phase().is_some_and(|p| p >= phase) {
                return Ok(snap);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Retrieves and fully verifies the output of `target_stage` for a
    /// prior contribution, returning `y_target`.
    pub async fn verified_randomness(
        &self,
        contribution: &Contribution,
        target_stage: u64,
    ) -> Result<Vec<u8>, ClientError> {
        self.wait_for_phase(target_stage as i64, Phase::Done, Duration::from_secs(1))
            .await?;
        let window = self.config.window_size as usize;
        let ranges = windows_covering(contribution.stage, target_stage, window);
        let span_start = ranges[0].0 as i64;
        let span_end = ranges[ranges.len() - 1].1 as i64;
        let snapshots = self.stages(span_start - 1, span_end).await?;
        let accproof = self.acc_proof(contribution).await?;
        verify_span(
            &self.accumulator,
            &self.avdf,
            window,
            contribution,
            &accproof,
            &snapshots,
            target_stage,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
