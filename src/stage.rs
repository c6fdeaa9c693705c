//! Per-round stage state machine.
//!
//! A stage moves through `CONTRIBUTION → EVALUATION → DONE`, one way and
//! write-once:
//!
//! - **CONTRIBUTION.** The intake collects raw contributions behind a
//!   mutex, seeded with a fixed dummy value so the accumulator never sees
//!   an empty list. [`Stage::stop_contribution`] closes the intake exactly
//!   once.
//! - **EVALUATION.** The closer snapshots the data, accumulates it, waits
//!   for the previous stage's final output (blocking — the chain is
//!   sequential by construction), derives
//!   `vdf_challenge = SHA-256(accval ∥ prev_y)`, publishes the snapshot
//!   and hands off to a dedicated VDF worker thread.
//! - **DONE.** The worker stores the evaluation output and the aggregate
//!   proof covering the stage's window, then signals completion.
//!
//! The phase field is the synchronisation point: every transition stores
//! with release ordering *after* its write-once payload is published, and
//! readers load with acquire before touching phase-gated fields. Reads
//! past the barrier are lock-free; reads before it fail fast with
//! [`StageError::WrongPhase`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::acc::Accumulator;
use crate::bqf::BinaryQf;
use crate::vdf::AggregateVdf;

/// Fixed dummy contribution occupying data index 0 of every stage.
pub const DUMMY_CONTRIBUTION: &[u8] = b"DUMMY VALUE";

/// Stage lifecycle phase. Strictly monotone per stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    Contribution = 1,
    Evaluation = 2,
    Done = 3,
}

impl Phase {
    /// Wire name of the phase.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Contribution => "CONTRIBUTION",
            Phase::Evaluation => "EVALUATION",
            Phase::Done => "DONE",
        }
    }

    /// Inverse of [`Phase::name`].
    pub fn from_name(name: &str) -> Option<Phase> {
        match name {
            "CONTRIBUTION" => Some(Phase::Contribution),
            "EVALUATION" => Some(Phase::Evaluation),
            "DONE" => Some(Phase::Done),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Contribution,
            2 => Phase::Evaluation,
            3 => Phase::Done,
            other => unreachable!("invalid phase encoding {other}"),
        }
    }
}

/// Errors surfaced by phase-gated stage operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("stage {stage} is in phase {}, operation requires {}", actual.name(), required.name())]
    WrongPhase {
        stage: u64,
        required: Phase,
        actual: Phase,
    },
    #[error("stage {stage} has {len} contributions, index {index} out of range")]
    DataIndex { stage: u64, index: usize, len: usize },
}

/// Parameters shared by all stages of a beacon: the accumulator instance
/// and the aggregate VDF.
pub struct StageParams<A> {
    pub accumulator: A,
    pub avdf: AggregateVdf,
}

struct Intake {
    data: Vec<Vec<u8>>,
    closed: bool,
}

/// Write-once evaluation snapshot.
struct Sealed<A: Accumulator> {
    data: Vec<Vec<u8>>,
    acc: A::Acc,
    accval_bytes: Vec<u8>,
    challenge: Vec<u8>,
}

/// Write-once evaluation outcome.
struct Outcome {
    y: BinaryQf,
    y_bytes: Vec<u8>,
    proof_bytes: Vec<u8>,
}

/// One beacon round.
pub struct Stage<A: Accumulator> {
    index: u64,
    params: Arc<StageParams<A>>,
    /// Window predecessors, oldest first; the last entry is the immediately
    /// preceding stage. Read-only shares into the beacon's stage store.
    prev: Vec<Arc<Stage<A>>>,
    phase: AtomicU8,
    intake: Mutex<Intake>,
    sealed: OnceLock<Sealed<A>>,
    outcome: OnceLock<Outcome>,
    completion: Mutex<bool>,
    completed: Condvar,
}

impl<A> Stage<A>
where
    A: Accumulator + Send + Sync + 'static,
    A::Acc: Send + Sync,
{
    /// Creates a fresh CONTRIBUTION stage.
    pub fn new(index: u64, params: Arc<StageParams<A>>, prev: Vec<Arc<Stage<A>>>) -> Arc<Self> {
        Arc::new(Stage {
            index,
            params,
            prev,
            phase: AtomicU8::new(Phase::Contribution as u8),
            intake: Mutex::new(Intake {
                data: vec![DUMMY_CONTRIBUTION.to_vec()],
                closed: false,
            }),
            sealed: OnceLock::new(),
            outcome: OnceLock::new(),
            completion: Mutex::new(false),
            completed: Condvar::new(),
        })
    }

    /// The stage's position in the beacon's chain.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Current phase, with acquire ordering: once this returns a phase,
    /// every field of that phase is visible.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn require(&self, required: Phase) -> Result<(), StageError> {
        let actual = self.phase();
        if actual >= required {
            Ok(())
        } else {
            Err(StageError::WrongPhase {
                stage: self.index,
                required,
                actual,
            })
        }
    }

    /// Appends a contribution, returning its data index.
    pub fn contribute(&self, x: &[u8]) -> Result<usize, StageError> {
        let mut intake = self.intake.lock().expect("intake poisoned");
        if intake.closed {
            return Err(StageError::WrongPhase {
                stage: self.index,
                required: Phase::Contribution,
                actual: Phase::Evaluation,
            });
        }
        intake.data.push(x.to_vec());
        Ok(intake.data.len() - 1)
    }

    /// Number of contributions accepted so far (dummy included).
    pub fn contribution_count(&self) -> usize {
        if let Some(sealed) = self.sealed.get() {
            sealed.data.len()
        } else {
            self.intake.lock().expect("intake poisoned").data.len()
        }
    }

    /// Closes the intake and starts the evaluation.
    ///
    /// Blocks until the previous stage is DONE (its final output chains
    /// into this stage's challenge), then spawns the VDF worker thread.
    pub fn stop_contribution(self: &Arc<Self>) -> Result<(), StageError> {
        let data = {
            let mut intake = self.intake.lock().expect("intake poisoned");
            if intake.closed {
                return Err(StageError::WrongPhase {
                    stage: self.index,
                    required: Phase::Contribution,
                    actual: self.phase(),
                });
            }
            intake.closed = true;
            intake.data.clone()
        };

        let acc = self.params.accumulator.accumulate(&data);
        let accval_bytes = self
            .params
            .accumulator
            .to_bytes(&self.params.accumulator.get_accval(&acc));

        let prev_y = match self.prev.last() {
            Some(prev) => {
                prev.wait_done();
                prev.final_y_bytes().expect("waited stage is DONE").to_vec()
            }
            None => Vec::new(),
        };

        let mut hasher = Sha256::new();
        hasher.update(&accval_bytes);
        hasher.update(&prev_y);
        let challenge = hasher.finalize().to_vec();

        let contributions = data.len();
        if self
            .sealed
            .set(Sealed {
                data,
                acc,
                accval_bytes,
                challenge,
            })
            .is_err()
        {
            unreachable!("stage {} sealed twice", self.index);
        }
        self.phase.store(Phase::Evaluation as u8, Ordering::Release);
        info!(stage = self.index, contributions, "contribution closed, evaluation started");

        let stage = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("vdf-stage-{}", self.index))
            .spawn(move || stage.run_vdf())
            .expect("spawn vdf worker");
        Ok(())
    }

    /// VDF worker body: evaluate, aggregate over the window, publish.
    fn run_vdf(&self) {
        let sealed = self.sealed.get().expect("worker runs after sealing");
        let avdf = &self.params.avdf;
        let y = avdf.eval_one(&sealed.challenge);
        debug!(stage = self.index, "vdf evaluation finished, aggregating window");

        // Window predecessors are DONE by the chain's construction: this
        // stage waited on its predecessor, which waited on its own, and so
        // on through every stage the window can reach.
        let mut challenges: Vec<Vec<u8>> = Vec::with_capacity(self.prev.len() + 1);
        let mut ys: Vec<BinaryQf> = Vec::with_capacity(self.prev.len() + 1);
        for stage in &self.prev {
            challenges.push(
                stage
                    .vdf_challenge()
                    .expect("window predecessor evaluated")
                    .to_vec(),
            );
            ys.push(stage.final_y_form().expect("window predecessor done").clone());
        }
        challenges.push(sealed.challenge.clone());
        ys.push(y.clone());

        let proof = avdf.aggregate(&challenges, &ys);
        let outcome = Outcome {
            y_bytes: avdf.form_to_bytes(&y),
            proof_bytes: avdf.form_to_bytes(&proof),
            y,
        };
        if self.outcome.set(outcome).is_err() {
            unreachable!("stage {} completed twice", self.index);
        }
        self.phase.store(Phase::Done as u8, Ordering::Release);
        {
            let mut done = self.completion.lock().expect("completion poisoned");
            *done = true;
            self.completed.notify_all();
        }
        info!(stage = self.index, window = challenges.len(), "stage done");
    }

    /// Blocks until the stage reaches DONE.
    pub fn wait_done(&self) {
        if self.phase() == Phase::Done {
            return;
        }
        let mut done = self.completion.lock().expect("completion poisoned");
        while !*done {
            done = self.completed.wait(done).expect("completion poisoned");
        }
    }

    fn sealed(&self) -> Result<&Sealed<A>, StageError> {
        self.require(Phase::Evaluation)?;
        Ok(self.sealed.get().expect("EVALUATION implies sealed"))
    }

    fn done(&self) -> Result<&Outcome, StageError> {
        self.require(Phase::Done)?;
        Ok(self.outcome.get().expect("DONE implies outcome"))
    }

    /// The accumulation value (requires EVALUATION).
    pub fn accval(&self) -> Result<A::Value, StageError> {
        Ok(self.params.accumulator.get_accval(&self.sealed()?.acc))
    }

    /// Byte encoding of the accumulation value (requires EVALUATION).
    pub fn accval_bytes(&self) -> Result<&[u8], StageError> {
        Ok(&self.sealed()?.accval_bytes)
    }

    /// Membership witness for a contribution (requires EVALUATION).
    pub fn acc_proof(&self, data_index: usize) -> Result<A::Witness, StageError> {
        let sealed = self.sealed()?;
        if data_index >= sealed.data.len() {
            return Err(StageError::DataIndex {
                stage: self.index,
                index: data_index,
                len: sealed.data.len(),
            });
        }
        Ok(self
            .params
            .accumulator
            .witgen(&sealed.acc, &sealed.data, data_index))
    }

    /// The VDF challenge chained from the previous stage (requires
    /// EVALUATION).
    pub fn vdf_challenge(&self) -> Result<&[u8], StageError> {
        Ok(&self.sealed()?.challenge)
    }

    /// The evaluation output as bytes (requires DONE).
    pub fn final_y_bytes(&self) -> Result<&[u8], StageError> {
        Ok(&self.done()?.y_bytes)
    }

    /// The evaluation output as a group element (requires DONE).
    pub fn final_y_form(&self) -> Result<&BinaryQf, StageError> {
        Ok(&self.done()?.y)
    }

    /// The aggregate proof covering this stage's window (requires DONE).
    pub fn vdf_proof_bytes(&self) -> Result<&[u8], StageError> {
        Ok(&self.done()?.proof_bytes)
    }

    /// The published randomness of the round: `SHA-256(y)`.
    pub fn final_randomness(&self) -> Result<[u8; 32], StageError> {
        Ok(Sha256::digest(self.final_y_bytes()?).into())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::MerkleAccumulator;

    fn test_params() -> Arc<StageParams<MerkleAccumulator>> {
        Arc::new(StageParams {
            accumulator: MerkleAccumulator,
            avdf: AggregateVdf::new(256, 8, b"stage tests"),
        })
    }

    #[test]
    fn phase_names_round_trip() {
        for phase in [Phase::Contribution, Phase::Evaluation, Phase::Done] {
            assert_eq!(Phase::from_name(phase.name()), Some(phase));
        }
        assert_eq!(Phase::from_name("NONE"), None);
        assert!(Phase::Contribution < Phase::Evaluation);
        assert!(Phase::Evaluation < Phase::Done);
    }

    #[test]
    fn single_stage_lifecycle() {
        let params = test_params();
        let stage = Stage::new(0, Arc::clone(&params), Vec::new());

        assert_eq!(stage.phase(), Phase::Contribution);
        assert_eq!(stage.contribution_count(), 1); // dummy
        assert_eq!(stage.contribute(b"peko").unwrap(), 1);
        assert_eq!(stage.contribute(b"miko").unwrap(), 2);

        // Phase-gated getters fail fast before their phase.
        assert!(matches!(
            stage.accval_bytes(),
            Err(StageError::WrongPhase { required: Phase::Evaluation, .. })
        ));
        assert!(matches!(
            stage.final_y_bytes(),
            Err(StageError::WrongPhase { required: Phase::Done, .. })
        ));

        stage.stop_contribution().unwrap();
        assert!(stage.phase() >= Phase::Evaluation);

        // Contributions after the close are rejected.
        assert!(matches!(
            stage.contribute(b"late"),
            Err(StageError::WrongPhase { .. })
        ));
        assert!(stage.stop_contribution().is_err());

        // The accumulator snapshot proves the accepted contributions.
        let accval = stage.accval().unwrap();
        let proof = stage.acc_proof(1).unwrap();
        assert!(params.accumulator.verify(&accval, &proof, b"peko"));
        assert!(!params.accumulator.verify(&accval, &proof, b"pekx"));
        assert!(matches!(
            stage.acc_proof(99),
            Err(StageError::DataIndex { len: 3, .. })
        ));

        stage.wait_done();
        assert_eq!(stage.phase(), Phase::Done);

        // The single-stage window proof verifies.
        let challenge = stage.vdf_challenge().unwrap().to_vec();
        let y = stage.final_y_form().unwrap().clone();
        let proof = params
            .avdf
            .form_from_bytes(stage.vdf_proof_bytes().unwrap())
            .unwrap();
        assert!(params.avdf.verify(&[challenge], &[y], &proof));

        let expected: [u8; 32] = Sha256::digest(stage.final_y_bytes().unwrap()).into();
        assert_eq!(stage.final_randomness().unwrap(), expected);
    }

    #[test]
    fn challenge_chains_from_previous_output() {
        let params = test_params();
        let first = Stage::new(0, Arc::clone(&params), Vec::new());
        first.stop_contribution().unwrap();
        first.wait_done();

        let second = Stage::new(1, Arc::clone(&params), vec![Arc::clone(&first)]);
        second.contribute(b"peko").unwrap();
        second.stop_contribution().unwrap();
        second.wait_done();

        let mut hasher = Sha256::new();
        hasher.update(second.accval_bytes().unwrap());
        hasher.update(first.final_y_bytes().unwrap());
        assert_eq!(second.vdf_challenge().unwrap(), hasher.finalize().as_slice());

        // Stage 0 chains from empty bytes.
        let mut hasher = Sha256::new();
        hasher.update(first.accval_bytes().unwrap());
        assert_eq!(first.vdf_challenge().unwrap(), hasher.finalize().as_slice());

        // The second stage's aggregate proof covers both rounds.
        let challenges = vec![
            first.vdf_challenge().unwrap().to_vec(),
            second.vdf_challenge().unwrap().to_vec(),
        ];
        let ys = vec![
            first.final_y_form().unwrap().clone(),
            second.final_y_form().unwrap().clone(),
        ];
        let proof = params
            .avdf
            .form_from_bytes(second.vdf_proof_bytes().unwrap())
            .unwrap();
        assert!(params.avdf.verify(&challenges, &ys, &proof));
    }

    #[test]
    fn phase_is_monotone_under_concurrent_readers() {
        let params = test_params();
        let stage = Stage::new(0, Arc::clone(&params), Vec::new());

        let observer = {
            let stage = Arc::clone(&stage);
            std::thread::spawn(move || {
                let mut last = Phase::Contribution;
                loop {
                    let now = stage.phase();
                    assert!(now >= last, "phase regressed: {last:?} -> {now:?}");
                    last = now;
                    if now == Phase::Done {
                        break;
                    }
                    std::thread::yield_now();
                }
            })
        };

        stage.contribute(b"peko").unwrap();
        stage.stop_contribution().unwrap();
        stage.wait_done();
        observer.join().unwrap();
    }
}
