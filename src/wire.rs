//! Wire types shared by the HTTP server and the client.
//!
//! Responses travel as MessagePack maps (structs pack with field names, so
//! either side can evolve independently); byte-valued fields are tagged
//! with `serde_bytes` to pack as `bin` rather than integer arrays. The
//! contribute request body is the one JSON payload, mirroring the POST
//! surface.

use serde::{Deserialize, Serialize};

use crate::stage::Phase;

/// `GET /api/beacon_config` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeaconConfigMsg {
    pub interval_seconds: u64,
    pub window_size: u64,
}

/// `GET /api/info` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoMsg {
    pub stage: i64,
    pub phase: String,
    pub contributions: u64,
}

/// `POST /api/contribute` request body (JSON).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContributeRequest {
    pub randomness: String,
}

/// `POST /api/contribute` response: the operator-signed receipt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContributeReply {
    pub stage: i64,
    pub data_index: u64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Error body for rejected requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub error: String,
}

/// One stage as seen over the wire. Optional fields appear once the
/// stage's phase has reached them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: i64,
    pub phase: String,
    pub contributions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub accval: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub vdfy: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub vdfproof: Option<Vec<u8>>,
}

impl StageSnapshot {
    /// The sentinel returned for index −1: a DONE stage with empty-bytes
    /// fields, so clients can chain uniformly at stage 0.
    pub fn sentinel() -> StageSnapshot {
        StageSnapshot {
            stage: -1,
            phase: Phase::Done.name().to_string(),
            contributions: 0,
            accval: Some(Vec::new()),
            vdfy: Some(Vec::new()),
            vdfproof: Some(Vec::new()),
        }
    }

    /// The placeholder for indices the beacon has not reached.
    pub fn out_of_range(stage: i64) -> StageSnapshot {
        StageSnapshot {
            stage,
            phase: "NONE".to_string(),
            contributions: 0,
            accval: None,
            vdfy: None,
            vdfproof: None,
        }
    }

    /// Parses the phase name; `None` for the out-of-range placeholder.
    pub fn phase(&self) -> Option<Phase> {
        Phase::from_name(&self.phase)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_msgpack_round_trip() {
        let snap = StageSnapshot {
            stage: 3,
            phase: Phase::Evaluation.name().to_string(),
            contributions: 5,
            accval: Some(vec![1, 2, 3]),
            vdfy: None,
            vdfproof: None,
        };
        let packed = rmp_serde::to_vec_named(&snap).unwrap();
        let back: StageSnapshot = rmp_serde::from_slice(&packed).unwrap();
        assert_eq!(back.stage, 3);
        assert_eq!(back.phase(), Some(Phase::Evaluation));
        assert_eq!(back.accval.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(back.vdfy, None);
    }

    #[test]
    fn sentinel_reads_as_done_with_empty_fields() {
        let s = StageSnapshot::sentinel();
        assert_eq!(s.stage, -1);
        assert_eq!(s.phase(), Some(Phase::Done));
        assert_eq!(s.vdfy.as_deref(), Some(&[][..]));
        assert_eq!(StageSnapshot::out_of_range(17).phase(), None);
    }

    #[test]
    fn byte_fields_pack_as_bin() {
        let reply = ContributeReply {
            stage: 0,
            data_index: 1,
            signature: vec![0xAA; 64],
        };
        let packed = rmp_serde::to_vec_named(&reply).unwrap();
        // msgpack bin8 header for a 64-byte payload.
        assert!(packed.windows(2).any(|w| w == [0xc4, 64]));
    }
}
