//! Wesolowski VDF over an imaginary quadratic class group.
//!
//! Evaluation is `y = g^(2^T)` by `T` sequential squarings — conjecturally
//! non-parallelisable — and the proof is the single group element
//! `π = g^⌊2^T/ℓ⌋` for a Fiat–Shamir prime `ℓ`, verified by
//! `π^ℓ · g^(2^T mod ℓ) = y`. Two shapes are provided:
//!
//! - [`ClassVdf`]: per-challenge. Each challenge derives its own
//!   discriminant and input form, and the serialised proof carries the
//!   discriminant bytes. Verification re-derives the discriminant from the
//!   challenge and rejects on mismatch **before any group arithmetic**, so
//!   a proof cannot smuggle in a foreign (possibly trapdoored) group.
//! - [`AggregateVdf`]: one fixed discriminant (hashed once from a public
//!   seed), many concurrent evaluations, one short proof. The aggregate
//!   binds all `(gⱼ, yⱼ)` pairs through random scalars `aⱼ` and proves
//!   `G^(2^T) = Y` for `G = Π gⱼ^{aⱼ}`, `Y = Π yⱼ^{aⱼ}` — which holds iff
//!   every `yⱼ = gⱼ^(2^T)` except with negligible probability.
//!
//! The quotient power `g^⌊2^T/ℓ⌋` never materialises the `T`-bit quotient:
//! the long-division recurrence streams its bits into a square-and-multiply
//! walk, keeping memory constant.

use num_bigint::{BigInt, BigUint};
use num_traits::One;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bqf::BinaryQf;
use crate::hashgen::{hash_discriminant, hash_prime, hash_to_form, HashStream};

/// Bit width of the aggregate discriminant hash target.
pub const AGGREGATION_DISCRIMINANT_BITS: usize = 256;

/// Serialised per-challenge evaluation: the discriminant the proof lives
/// in, the output form and the Wesolowski proof form, all as bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdfProof {
    #[serde(with = "serde_bytes")]
    pub discriminant: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub y: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub pi: Vec<u8>,
}

impl VdfProof {
    /// MessagePack encoding: a three-element array of binaries.
    pub fn to_msgpack(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("vdf proof serialization cannot fail")
    }

    /// Inverse of [`VdfProof::to_msgpack`].
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// `g^⌊2^T/ℓ⌋` by streaming the quotient's bits out of the long division
/// `2^T / ℓ`, one squaring (plus at most one composition) per step.
fn wesolowski_power(g: &BinaryQf, l: &BigUint, iterations: u64) -> BinaryQf {
    let mut x = BinaryQf::principal(&g.discriminant());
    let mut r = BigUint::one();
    for _ in 0..iterations {
        let doubled = r << 1;
        let bit: BigUint = &doubled / l;
        r = doubled % l;
        x = x.square().reduced();
        if bit.is_one() {
            x = x.compose(g).reduced();
        }
    }
    x
}

/// `g^(2^T)` by `T` sequential squarings over reduced forms.
fn repeated_square(g: &BinaryQf, iterations: u64) -> BinaryQf {
    let mut y = g.reduced();
    for _ in 0..iterations {
        y = y.square().reduced();
    }
    y
}

/// The Fiat–Shamir prime for a `(g, y)` pair at the given width.
fn fiat_shamir_prime(g: &BinaryQf, y: &BinaryQf, bits: usize) -> BigUint {
    let mut seed = g.to_bytes(bits);
    seed.extend_from_slice(&y.to_bytes(bits));
    hash_prime(&seed, bits)
}

// ============================================================================
// Per-challenge VDF
// ============================================================================

/// Per-challenge Wesolowski VDF: every challenge gets its own class group.
#[derive(Clone, Debug)]
pub struct ClassVdf {
    bits: usize,
    iterations: u64,
}

impl ClassVdf {
    pub fn new(bits: usize, iterations: u64) -> Self {
        ClassVdf { bits, iterations }
    }

    /// Derives the challenge's discriminant and input form.
    fn input_form(&self, challenge: &[u8]) -> (BigInt, BinaryQf) {
        let d = hash_discriminant(challenge, self.bits);
        let g = hash_to_form(challenge, &d, self.bits);
        (d, g)
    }

    /// Evaluates the delay function on `challenge` and proves the result.
    pub fn eval_and_prove(&self, challenge: &[u8]) -> VdfProof {
        let (d, g) = self.input_form(challenge);
        let y = repeated_square(&g, self.iterations);
        let l = fiat_shamir_prime(&g, &y, self.bits);
        let pi = wesolowski_power(&g, &l, self.iterations);
        VdfProof {
            discriminant: d.to_signed_bytes_be(),
            y: y.to_bytes(self.bits),
            pi: pi.to_bytes(self.bits),
        }
    }

    /// Verifies a proof for `challenge`. Any discrepancy — including a
    /// discriminant that does not match the challenge — yields `false`.
    pub fn verify(&self, challenge: &[u8], proof: &VdfProof) -> bool {
        // Discriminant binding comes first: reject foreign groups before
        // touching any arithmetic.
        let d = hash_discriminant(challenge, self.bits);
        if d.to_signed_bytes_be() != proof.discriminant {
            return false;
        }
        let y = match BinaryQf::from_bytes(&proof.y, self.bits) {
            Ok(f) => f.reduced(),
            Err(_) => return false,
        };
        let pi = match BinaryQf::from_bytes(&proof.pi, self.bits) {
            Ok(f) => f.reduced(),
            Err(_) => return false,
        };
        if y.discriminant() != d || pi.discriminant() != d {
            return false;
        }
        let g = hash_to_form(challenge, &d, self.bits);
        let l = fiat_shamir_prime(&g, &y, self.bits);
        let r = BigUint::from(2u32).modpow(&BigUint::from(self.iterations), &l);
        pi.pow(&l).compose(&g.pow(&r)).reduced() == y
    }

    /// The evaluation output carried by a proof.
    pub fn extract_y(proof: &VdfProof) -> &[u8] {
        &proof.y
    }
}

// ============================================================================
// Aggregate VDF
// ============================================================================

/// Aggregate Wesolowski VDF over one fixed discriminant.
#[derive(Clone, Debug)]
pub struct AggregateVdf {
    bits: usize,
    iterations: u64,
    discriminant: BigInt,
}

impl AggregateVdf {
    /// Builds the aggregate VDF for a public seed. The discriminant is
    /// hashed once; changing the seed invalidates every prior proof.
    ///
    /// `bits` governs scalar and serialisation widths and must cover the
    /// discriminant, or reduced forms would not fit their encoding.
    pub fn new(bits: usize, iterations: u64, seed: &[u8]) -> Self {
        assert!(
            bits >= AGGREGATION_DISCRIMINANT_BITS,
            "aggregate form width must cover the {AGGREGATION_DISCRIMINANT_BITS}-bit discriminant"
        );
        AggregateVdf {
            bits,
            iterations,
            discriminant: hash_discriminant(seed, AGGREGATION_DISCRIMINANT_BITS),
        }
    }

    /// The shared discriminant.
    pub fn discriminant(&self) -> &BigInt {
        &self.discriminant
    }

    /// Serialisation width for group elements, in bits.
    pub fn form_bits(&self) -> usize {
        self.bits
    }

    /// Fixed-width byte encoding of a group element.
    pub fn form_to_bytes(&self, f: &BinaryQf) -> Vec<u8> {
        f.to_bytes(self.bits)
    }

    /// Decodes a group element, requiring the shared discriminant.
    pub fn form_from_bytes(&self, bytes: &[u8]) -> Option<BinaryQf> {
        let f = BinaryQf::from_bytes(bytes, self.bits).ok()?.reduced();
        (f.discriminant() == self.discriminant).then_some(f)
    }

    /// The input form for one challenge.
    pub fn input_form(&self, challenge: &[u8]) -> BinaryQf {
        hash_to_form(challenge, &self.discriminant, self.bits)
    }

    /// Evaluates the delay function for one challenge.
    pub fn eval_one(&self, challenge: &[u8]) -> BinaryQf {
        repeated_square(&self.input_form(challenge), self.iterations)
    }

    /// Evaluates the delay function for every challenge.
    pub fn eval(&self, challenges: &[Vec<u8>]) -> Vec<BinaryQf> {
        challenges.iter().map(|c| self.eval_one(c)).collect()
    }

    /// Derives the aggregation scalars, the Fiat–Shamir prime and the
    /// combined input `G = Π gⱼ^{aⱼ}` for a batch.
    fn parameters(
        &self,
        challenges: &[Vec<u8>],
        ys: &[BinaryQf],
    ) -> (Vec<BigUint>, BigUint, BinaryQf) {
        let gs: Vec<BinaryQf> = challenges.iter().map(|c| self.input_form(c)).collect();

        let mut hasher = Sha256::new();
        for g in &gs {
            hasher.update(self.form_to_bytes(g));
        }
        for y in ys {
            hasher.update(self.form_to_bytes(y));
        }
        let s: [u8; 32] = hasher.finalize().into();

        let scalars: Vec<BigUint> = (1..=challenges.len())
            .map(|j| {
                let mut seed = j.to_string().into_bytes();
                seed.extend_from_slice(&s);
                HashStream::new(&seed, self.bits)
                    .next()
                    .expect("hash stream is infinite")
            })
            .collect();
        let l = hash_prime(&s, self.bits);

        let mut big_g = BinaryQf::principal(&self.discriminant);
        for (a_j, g_j) in scalars.iter().zip(&gs) {
            big_g = big_g.compose(&g_j.pow(a_j)).reduced();
        }
        (scalars, l, big_g)
    }

    /// One short proof covering all `(challenge, y)` pairs.
    pub fn aggregate(&self, challenges: &[Vec<u8>], ys: &[BinaryQf]) -> BinaryQf {
        assert_eq!(challenges.len(), ys.len(), "challenge/output count mismatch");
        let (_, l, big_g) = self.parameters(challenges, ys);
        wesolowski_power(&big_g, &l, self.iterations)
    }

    /// Verifies an aggregate proof. Any discrepancy yields `false`.
    pub fn verify(&self, challenges: &[Vec<u8>], ys: &[BinaryQf], proof: &BinaryQf) -> bool {
        if challenges.len() != ys.len() || challenges.is_empty() {
            return false;
        }
        if proof.discriminant() != self.discriminant
            || ys.iter().any(|y| y.discriminant() != self.discriminant)
        {
            return false;
        }
        let ys: Vec<BinaryQf> = ys.iter().map(|y| y.reduced()).collect();
        let (scalars, l, big_g) = self.parameters(challenges, &ys);

        let mut big_y = BinaryQf::principal(&self.discriminant);
        for (a_j, y_j) in scalars.iter().zip(&ys) {
            big_y = big_y.compose(&y_j.pow(a_j)).reduced();
        }
        let r = BigUint::from(2u32).modpow(&BigUint::from(self.iterations), &l);
        proof.pow(&l).compose(&big_g.pow(&r)).reduced() == big_y
    }
}

// ============================================================================
// Tests
// ============================================================================
