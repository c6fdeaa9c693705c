//! Crate root: public surface of the randomness beacon.
//!
//! This crate implements a publicly verifiable randomness beacon in the
//! HeadStart construction (one contribution list per round, L = 1): each
//! round collects arbitrary contributions from untrusted clients, commits
//! to them with a cryptographic accumulator, and applies a Wesolowski VDF
//! over an imaginary quadratic class group to the commitment. Contributors
//! later verify — with a short proof and no trust in the operator — that
//! their input was included and that the delay function was honestly
//! evaluated.
//!
//! ## Layering
//!
//! - [`primality`], [`hashgen`], [`bqf`] — the number-theoretic kernel:
//!   probable primes, hash-to-{integer, prime, discriminant, form}
//!   gadgets, and class-group arithmetic over binary quadratic forms.
//! - [`acc`], [`merkle`], [`rsa_acc`], [`class_acc`] — the accumulator
//!   capability set with three interchangeable instantiations (two of
//!   them universal, i.e. also proving non-membership).
//! - [`vdf`] — per-challenge and aggregate Wesolowski VDFs.
//! - [`stage`], [`beacon`] — the round state machine and the service that
//!   chains rounds through a sliding aggregation window.
//! - [`client`] — independent retrieval and verification.
//! - [`keys`], [`wire`], [`config`] — receipts, MessagePack wire types,
//!   runtime configuration.
//!
//! ## Invariants
//!
//! - A stage's phase (`CONTRIBUTION → EVALUATION → DONE`) is monotone, and
//!   it is the only synchronisation readers need: every phase-gated field
//!   is published before the phase transition that exposes it.
//! - Stage outputs form a hash chain with a delay in every link:
//!   `challenge_k = SHA-256(accval_k ∥ y_{k−1})`, so no round's output is
//!   predictable before the previous round's delay has elapsed.
//! - Verification APIs return `false`/`Err` on any discrepancy and never
//!   panic on untrusted input; panics are reserved for internal invariant
//!   violations.

#![forbid(unsafe_code)]

pub mod acc;
pub mod beacon;
pub mod bqf;
pub mod class_acc;
pub mod client;
pub mod config;
pub mod hashgen;
pub mod keys;
pub mod merkle;
pub mod primality;
pub mod rsa_acc;
pub mod stage;
pub mod vdf;
pub mod wire;

pub use acc::{Accumulator, UniversalAccumulator};
pub use beacon::{Beacon, Receipt, SchedulerHandle};
pub use bqf::BinaryQf;
pub use class_acc::ClassGroupAccumulator;
pub use client::{final_randomness, verify_span, windows_covering, BeaconClient, Contribution};
pub use config::BeaconConfig;
pub use merkle::{MerkleAccumulator, SortedMerkleAccumulator};
pub use rsa_acc::{RsaAccumulator, RsaPrimeAccumulator};
pub use stage::{Phase, Stage, StageError, StageParams};
pub use vdf::{AggregateVdf, ClassVdf, VdfProof};
