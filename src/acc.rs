//! Accumulator traits and shared batch-witness machinery.
//!
//! Every accumulator exposes the same capability set: commit to a list of
//! byte strings, produce a membership witness for one index, verify a
//! witness against the accumulation value, and serialise the value for
//! embedding into hashes and wire messages. Universal accumulators extend
//! this with non-membership proofs.
//!
//! The group-based implementations (RSA, class group) share the
//! divide-and-conquer *root factoring* algorithm for batch witness
//! generation: to get all `N` witnesses, raise the base to the product of
//! the opposite half and recurse, for `O(N log N)` group exponentiations
//! total instead of the naive `O(N²)`. Witness sets are memoised per data
//! tuple in a [`WitnessCache`] so repeated `witgen` calls against the same
//! snapshot cost one batch run; an accumulator object lives as long as the
//! snapshot it serves (one stage, in the beacon), which bounds the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

/// Common capability set of all accumulator implementations.
pub trait Accumulator {
    /// Full accumulation state (may retain data-derived structure).
    type Acc;
    /// The short accumulation value a verifier works against.
    type Value: Clone + PartialEq;
    /// Membership witness for a single element.
    type Witness: Clone;

    /// Commits to `data`. Deterministic up to setup randomness.
    fn accumulate(&self, data: &[Vec<u8>]) -> Self::Acc;

    /// Membership witness for `data[index]`.
    fn witgen(&self, acc: &Self::Acc, data: &[Vec<u8>], index: usize) -> Self::Witness;

    /// All membership witnesses for `data`, in order.
    fn batch_witgen(&self, data: &[Vec<u8>]) -> Vec<Self::Witness>;

    /// Checks a membership witness for `x` against an accumulation value.
    fn verify(&self, accval: &Self::Value, witness: &Self::Witness, x: &[u8]) -> bool;

    /// Extracts the short accumulation value.
    fn get_accval(&self, acc: &Self::Acc) -> Self::Value;

    /// Canonical byte encoding of an accumulation value.
    fn to_bytes(&self, accval: &Self::Value) -> Vec<u8>;
}

/// Accumulators that can also prove non-membership.
pub trait UniversalAccumulator: Accumulator {
    /// Non-membership witness type.
    type NonMemWitness;

    /// Non-membership witness for `x` with respect to `data`.
    /// Returns `None` if `x` is in fact a member.
    fn nonmemwitgen(
        &self,
        acc: &Self::Acc,
        data: &[Vec<u8>],
        x: &[u8],
    ) -> Option<Self::NonMemWitness>;

    /// Checks a non-membership witness for `x`.
    fn nonmemverify(&self, accval: &Self::Value, witness: &Self::NonMemWitness, x: &[u8]) -> bool;
}

/// Divide-and-conquer root factoring.
///
/// `raise(g, xs)` must return `g` raised to the product of the elements of
/// `xs` under the implementation's encoding. The returned vector holds, for
/// each index `i`, the base raised to the product of every element except
/// `data[i]` — exactly the membership witness shape of the group-based
/// accumulators.
pub(crate) fn root_factor<G, F>(g: &G, data: &[Vec<u8>], raise: &F) -> Vec<G>
where
    G: Clone,
    F: Fn(&G, &[Vec<u8>]) -> G,
{
    match data.len() {
        0 => Vec::new(),
        1 => vec![g.clone()],
        _ => {
            let half = data.len() / 2;
            let (left, right) = data.split_at(half);
            let g_left = raise(g, left);
            let g_right = raise(g, right);
            let mut out = root_factor(&g_right, left, raise);
            out.extend(root_factor(&g_left, right, raise));
            out
        }
    }
}

/// SHA-256 over the length-framed concatenation of `data`; collision-safe
/// key for memoising per-snapshot witness sets.
pub(crate) fn data_digest(data: &[Vec<u8>]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for x in data {
        hasher.update((x.len() as u64).to_be_bytes());
        hasher.update(x);
    }
    hasher.finalize().into()
}

/// Per-accumulator memo of batch witness sets, keyed by data digest.
pub(crate) struct WitnessCache<W> {
    entries: Mutex<HashMap<[u8; 32], Arc<Vec<W>>>>,
}

impl<W> WitnessCache<W> {
    pub fn new() -> Self {
        WitnessCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached witness set for `data`, computing it with
    /// `compute` on first use.
    pub fn get_or_compute<F>(&self, data: &[Vec<u8>], compute: F) -> Arc<Vec<W>>
    where
        F: FnOnce() -> Vec<W>,
    {
        let key = data_digest(data);
        let mut entries = self.entries.lock().expect("witness cache poisoned");
        entries.entry(key).or_insert_with(|| Arc::new(compute())).clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_factor_excludes_own_element() {
        // Multiplicative toy group over u64: raise = multiply by product
        // of byte values. Witness i must be the product of all but i.
        let data: Vec<Vec<u8>> = vec![vec![2], vec![3], vec![5], vec![7], vec![11]];
        let raise = |g: &u64, xs: &[Vec<u8>]| -> u64 {
            xs.iter().fold(*g, |acc, x| acc * x[0] as u64)
        };
        let witnesses = root_factor(&1u64, &data, &raise);
        assert_eq!(witnesses.len(), data.len());
        let total: u64 = data.iter().map(|x| x[0] as u64).product();
        for (i, w) in witnesses.iter().enumerate() {
            assert_eq!(w * data[i][0] as u64, total, "witness {i}");
        }
    }

    #[test]
    fn root_factor_trivial_sizes() {
        let raise = |g: &u64, _: &[Vec<u8>]| *g;
        assert!(root_factor(&9u64, &[], &raise).is_empty());
        assert_eq!(root_factor(&9u64, &[vec![1]], &raise), vec![9]);
    }

    #[test]
    fn data_digest_is_framing_sensitive() {
        let a = vec![vec![1, 2], vec![3]];
        let b = vec![vec![1], vec![2, 3]];
        let c = vec![vec![1, 2], vec![3]];
        assert_ne!(data_digest(&a), data_digest(&b));
        assert_eq!(data_digest(&a), data_digest(&c));
    }

    #[test]
    fn witness_cache_computes_once_per_data_set() {
        let cache: WitnessCache<u32> = WitnessCache::new();
        let data = vec![vec![1u8], vec![2]];
        let mut calls = 0;
        let first = cache.get_or_compute(&data, || {
            calls += 1;
            vec![10, 20]
        });
        let second = cache.get_or_compute(&data, || {
            calls += 1;
            vec![99, 99]
        });
        assert_eq!(calls, 1);
        assert_eq!(*first, vec![10, 20]);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
