//! The randomness beacon: stage store, sliding window, receipts,
//! scheduler.
//!
//! The beacon owns the ordered stage chain. `stages` is append-only and
//! stages are never relocated once pushed (they live behind `Arc`s), so
//! readers hold the store lock only long enough to clone a handle.
//! Rollover holds the write lock across stop-and-push, making it mutually
//! exclusive with contribution acceptance and with current-stage queries,
//! per the concurrency contract.
//!
//! Each new stage receives handles to the previous `W − 1` stages; its own
//! evaluation therefore aggregates at most `W` rounds including itself,
//! which is what lets one published proof cover a sliding window, and
//! which also pins the window's challenges in memory for as long as any
//! stage still proves over them.
//!
//! Contribution receipts are Ed25519 signatures over the SHA-256 of the
//! contributed bytes. A receipt binds the operator to having *seen* the
//! input; inclusion is proven separately by the accumulator witness.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::{debug, info, warn};

use crate::acc::Accumulator;
use crate::keys::sign_prehashed;
use crate::stage::{Stage, StageError, StageParams};
use crate::vdf::AggregateVdf;
use crate::wire::StageSnapshot;

/// An operator-signed contribution receipt.
#[derive(Clone, Debug)]
pub struct Receipt {
    pub stage: u64,
    pub data_index: u64,
    pub signature: Vec<u8>,
}

/// The beacon service state.
pub struct Beacon<A: Accumulator> {
    params: Arc<StageParams<A>>,
    stages: RwLock<Vec<Arc<Stage<A>>>>,
    window: usize,
    interval: Duration,
    signing_key: SigningKey,
}

impl<A> Beacon<A>
where
    A: Accumulator + Send + Sync + 'static,
    A::Acc: Send + Sync,
{
    /// Creates a beacon with stage 0 open for contributions.
    pub fn new(
        accumulator: A,
        avdf: AggregateVdf,
        window: usize,
        interval: Duration,
        signing_key: SigningKey,
    ) -> Arc<Self> {
        assert!(window >= 1, "window must cover at least the stage itself");
        let params = Arc::new(StageParams { accumulator, avdf });
        let genesis = Stage::new(0, Arc::clone(&params), Vec::new());
        Arc::new(Beacon {
            params,
            stages: RwLock::new(vec![genesis]),
            window,
            interval,
            signing_key,
        })
    }

    /// Aggregation window size W.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Seconds between scheduled rollovers.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The receipt verification key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Shared stage parameters (accumulator + aggregate VDF).
    pub fn params(&self) -> &Arc<StageParams<A>> {
        &self.params
    }

    /// Number of stages so far.
    pub fn stage_count(&self) -> u64 {
        self.stages.read().expect("stage store poisoned").len() as u64
    }

    /// Index of the current (CONTRIBUTION) stage.
    pub fn current_index(&self) -> u64 {
        self.stage_count() - 1
    }

    /// Handle to the current stage.
    pub fn current_stage(&self) -> Arc<Stage<A>> {
        let stages = self.stages.read().expect("stage store poisoned");
        Arc::clone(stages.last().expect("beacon always has a stage"))
    }

    /// Handle to stage `index`, if the beacon has reached it.
    pub fn stage(&self, index: u64) -> Option<Arc<Stage<A>>> {
        let stages = self.stages.read().expect("stage store poisoned");
        stages.get(index as usize).map(Arc::clone)
    }

    /// Records a contribution into the current stage and signs a receipt.
    pub fn contribute(&self, x: &[u8]) -> Result<Receipt, StageError> {
        let stage = self.current_stage();
        let data_index = stage.contribute(x)? as u64;
        debug!(
            stage = stage.index(),
            data_index,
            bytes = x.len(),
            "contribution received"
        );
        Ok(Receipt {
            stage: stage.index(),
            data_index,
            signature: sign_prehashed(&self.signing_key, x),
        })
    }

    /// Stops the current stage and opens the next one.
    ///
    /// Blocks while the previous stage's evaluation is still running (the
    /// stop waits on its DONE); contributions and current-stage queries
    /// are held out for the duration.
    pub fn rollover(&self) {
        let mut stages = self.stages.write().expect("stage store poisoned");
        let current = Arc::clone(stages.last().expect("beacon always has a stage"));
        info!(stage = current.index() + 1, "starting next stage");
        if let Err(err) = current.stop_contribution() {
            warn!(stage = current.index(), %err, "rollover found stage already stopped");
            return;
        }
        let prev_start = stages.len().saturating_sub(self.window.saturating_sub(1));
        let prev: Vec<Arc<Stage<A>>> = stages[prev_start..].iter().map(Arc::clone).collect();
        let next = Stage::new(stages.len() as u64, Arc::clone(&self.params), prev);
        stages.push(next);
    }

    /// Spawns the scheduler thread firing [`Beacon::rollover`] every
    /// interval until the returned handle shuts it down.
    pub fn spawn_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        let beacon = Arc::clone(self);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("beacon-scheduler".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(beacon.interval) {
                    Err(RecvTimeoutError::Timeout) => beacon.rollover(),
                    _ => break,
                }
            })
            .expect("spawn scheduler");
        SchedulerHandle {
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Wire snapshot of stage `index`. Index −1 returns the sentinel used
    /// for chaining at stage 0; indices the beacon has not reached report
    /// phase `NONE`.
    pub fn snapshot(&self, index: i64) -> StageSnapshot {
        if index == -1 {
            return StageSnapshot::sentinel();
        }
        let stage = match u64::try_from(index).ok().and_then(|i| self.stage(i)) {
            Some(stage) => stage,
            None => return StageSnapshot::out_of_range(index),
        };
        let mut snap = StageSnapshot {
            stage: index,
            phase: stage.phase().name().to_string(),
            contributions: stage.contribution_count() as u64,
            accval: None,
            vdfy: None,
            vdfproof: None,
        };
        if let Ok(accval) = stage.accval_bytes() {
            snap.accval = Some(accval.to_vec());
        }
        if let Ok(y) = stage.final_y_bytes() {
            snap.vdfy = Some(y.to_vec());
        }
        if let Ok(proof) = stage.vdf_proof_bytes() {
            snap.vdfproof = Some(proof.to_vec());
        }
        snap
    }
}

/// Owns the scheduler thread; dropping it (or calling
/// [`SchedulerHandle::shutdown`]) stops future rollovers. In-flight VDF
/// workers are not cancelled.
pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops the scheduler and waits for the thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate, verify_prehashed};
    use crate::merkle::MerkleAccumulator;
    use crate::stage::Phase;

    fn test_beacon(window: usize) -> Arc<Beacon<MerkleAccumulator>> {
        Beacon::new(
            MerkleAccumulator,
            AggregateVdf::new(256, 8, b"beacon tests"),
            window,
            Duration::from_secs(3600),
            generate(),
        )
    }

    #[test]
    fn receipts_verify_against_public_key() {
        let beacon = test_beacon(3);
        let receipt = beacon.contribute(b"peko").unwrap();
        assert_eq!(receipt.stage, 0);
        assert_eq!(receipt.data_index, 1); // index 0 is the dummy
        let vk = beacon.verifying_key();
        assert!(verify_prehashed(&vk, b"peko", &receipt.signature));
        assert!(!verify_prehashed(&vk, b"miko", &receipt.signature));
    }

    #[test]
    fn rollover_advances_the_chain() {
        let beacon = test_beacon(3);
        beacon.contribute(b"peko").unwrap();
        beacon.rollover();
        assert_eq!(beacon.current_index(), 1);
        assert_eq!(beacon.current_stage().phase(), Phase::Contribution);

        // The closed stage finishes on its own.
        let first = beacon.stage(0).unwrap();
        first.wait_done();
        assert_eq!(first.phase(), Phase::Done);

        // New contributions land in the new stage.
        let receipt = beacon.contribute(b"miko").unwrap();
        assert_eq!(receipt.stage, 1);
    }

    #[test]
    fn window_aggregates_at_most_w_stages() {
        let beacon = test_beacon(2);
        for _ in 0..3 {
            beacon.rollover();
        }
        // With W = 2, stage 2's proof covers stages [1, 2] only.
        let s1 = beacon.stage(1).unwrap();
        let s2 = beacon.stage(2).unwrap();
        s2.wait_done();
        let challenges = vec![
            s1.vdf_challenge().unwrap().to_vec(),
            s2.vdf_challenge().unwrap().to_vec(),
        ];
        let ys = vec![
            s1.final_y_form().unwrap().clone(),
            s2.final_y_form().unwrap().clone(),
        ];
        let avdf = &beacon.params().avdf;
        let proof = avdf.form_from_bytes(s2.vdf_proof_bytes().unwrap()).unwrap();
        assert!(avdf.verify(&challenges, &ys, &proof));

        // A window claim including stage 0 must not verify against it.
        let s0 = beacon.stage(0).unwrap();
        let wide_challenges = vec![
            s0.vdf_challenge().unwrap().to_vec(),
            challenges[0].clone(),
            challenges[1].clone(),
        ];
        let wide_ys = vec![s0.final_y_form().unwrap().clone(), ys[0].clone(), ys[1].clone()];
        assert!(!avdf.verify(&wide_challenges, &wide_ys, &proof));
    }

    #[test]
    fn snapshots_track_phase_progress() {
        let beacon = test_beacon(3);
        beacon.contribute(b"peko").unwrap();

        let snap = beacon.snapshot(0);
        assert_eq!(snap.phase, "CONTRIBUTION");
        assert_eq!(snap.contributions, 2);
        assert!(snap.accval.is_none());

        beacon.rollover();
        let stage = beacon.stage(0).unwrap();
        stage.wait_done();

        let snap = beacon.snapshot(0);
        assert_eq!(snap.phase, "DONE");
        assert!(snap.accval.is_some());
        assert!(snap.vdfy.is_some());
        assert!(snap.vdfproof.is_some());

        assert_eq!(beacon.snapshot(-1).stage, -1);
        assert_eq!(beacon.snapshot(99).phase, "NONE");
    }

    #[test]
    fn scheduler_fires_and_shuts_down() {
        let beacon = Beacon::new(
            MerkleAccumulator,
            AggregateVdf::new(256, 4, b"beacon tests"),
            2,
            Duration::from_millis(50),
            generate(),
        );
        let handle = beacon.spawn_scheduler();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while beacon.stage_count() < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(beacon.stage_count() >= 3, "scheduler did not fire");
        handle.shutdown();
        let frozen = beacon.stage_count();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(beacon.stage_count(), frozen, "scheduler kept firing");
    }
}
