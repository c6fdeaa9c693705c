//! Class-group accumulator over binary quadratic forms.
//!
//! Same contract as the RSA accumulator with the modular exponentiation
//! replaced by class-group exponentiation of a setup base form `g`. The
//! class group of a large negative prime discriminant has unknown order,
//! so removing an exponent from the accumulated product is as hard as in
//! the RSA group — but without a trusted party holding factors.
//!
//! Contribution bytes are interpreted as non-negative big-endian integer
//! exponents, exactly as in the raw RSA encoding. No non-membership
//! variant exists for this construction.

use std::sync::Arc;

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::One;
use rand::Rng;

use crate::acc::{root_factor, Accumulator, WitnessCache};
use crate::bqf::BinaryQf;
use crate::hashgen::{hash_discriminant, hash_to_form};
use crate::primality::{gen_prime, gen_prime_congruent, is_probable_prime};

/// Accumulator over the class group of a fixed negative discriminant.
pub struct ClassGroupAccumulator {
    g: BinaryQf,
    discriminant: BigInt,
    bits: usize,
    cache: WitnessCache<BinaryQf>,
}

impl ClassGroupAccumulator {
    /// Wraps a reduced, non-identity base form.
    pub fn new(g: BinaryQf) -> Self {
        let g = g.reduced();
        let discriminant = g.discriminant();
        assert!(
            g != BinaryQf::principal(&discriminant),
            "base form must not be the identity"
        );
        let bits = discriminant.magnitude().bits() as usize;
        ClassGroupAccumulator {
            g,
            discriminant,
            bits,
            cache: WitnessCache::new(),
        }
    }

    /// Random setup: a `bits`-bit prime `p ≡ 3 (mod 4)` fixes the
    /// discriminant `d = −p`, then a random prime `a ≡ 3 (mod 4)` with `d`
    /// a quadratic residue yields the base form.
    pub fn generate<R: Rng>(bits: u64, rng: &mut R) -> Self {
        let p = gen_prime_congruent(bits, 3, 4, rng);
        let d = -BigInt::from(p);
        let one = BigInt::one();
        let two = BigInt::from(2);
        let four = BigInt::from(4);
        loop {
            let mut candidate = rng.gen_biguint(bits);
            candidate.set_bit(0, true);
            candidate.set_bit(1, true);
            if !is_probable_prime(&candidate) {
                continue;
            }
            let a = BigInt::from(candidate);
            let d_mod_a = d.mod_floor(&a);
            if d_mod_a.modpow(&(&a - &one).div_floor(&two), &a) != one {
                continue;
            }
            let mut b = d_mod_a.modpow(&(&a + &one).div_floor(&four), &a);
            if b.mod_floor(&two) != one {
                b = &a - &b;
            }
            let c = (&b * &b - &d).div_floor(&(&four * &a));
            return Self::new(BinaryQf::new(a, b, c));
        }
    }

    /// Deterministic setup from a public seed via the hash gadgets.
    pub fn from_seed(seed: &[u8], bits: usize) -> Self {
        let d = hash_discriminant(seed, bits);
        Self::new(hash_to_form(seed, &d, bits))
    }

    /// The setup base form.
    pub fn base(&self) -> &BinaryQf {
        &self.g
    }

    /// The group's discriminant.
    pub fn discriminant(&self) -> &BigInt {
        &self.discriminant
    }

    fn cached_witnesses(&self, data: &[Vec<u8>]) -> Arc<Vec<BinaryQf>> {
        self.cache.get_or_compute(data, || {
            root_factor(&self.g, data, &|g: &BinaryQf, xs: &[Vec<u8>]| g.pow_many(xs))
        })
    }
}

impl Accumulator for ClassGroupAccumulator {
    type Acc = BinaryQf;
    type Value = BinaryQf;
    type Witness = BinaryQf;

    fn accumulate(&self, data: &[Vec<u8>]) -> BinaryQf {
        self.g.pow_many(data)
    }

    fn witgen(&self, _acc: &BinaryQf, data: &[Vec<u8>], index: usize) -> BinaryQf {
        self.cached_witnesses(data)[index].clone()
    }

    fn batch_witgen(&self, data: &[Vec<u8>]) -> Vec<BinaryQf> {
        self.cached_witnesses(data).as_ref().clone()
    }

    fn verify(&self, accval: &BinaryQf, witness: &BinaryQf, x: &[u8]) -> bool {
        if witness.discriminant() != self.discriminant {
            return false;
        }
        witness.pow(&BigUint::from_bytes_be(x)) == accval.reduced()
    }

    fn get_accval(&self, acc: &BinaryQf) -> BinaryQf {
        acc.reduced()
    }

    fn to_bytes(&self, accval: &BinaryQf) -> Vec<u8> {
        accval.to_bytes(self.bits)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn data(items: &[&[u8]]) -> Vec<Vec<u8>> {
        items.iter().map(|x| x.to_vec()).collect()
    }

    #[test]
    fn membership_round_trip_seeded_setup() {
        let acc = ClassGroupAccumulator::from_seed(b"class-acc-test", 64);
        let xs = data(&[b"peko", b"peko2", b"peko3"]);
        let state = acc.accumulate(&xs);
        let accval = acc.get_accval(&state);
        for (i, x) in xs.iter().enumerate() {
            let w = acc.witgen(&state, &xs, i);
            assert!(acc.verify(&accval, &w, x));
            assert!(!acc.verify(&accval, &w, b"pekx"));
        }
        let encoded = acc.to_bytes(&accval);
        assert_eq!(encoded.len(), 3 * ((acc.bits + 7) / 8));
        assert_eq!(BinaryQf::from_bytes(&encoded, acc.bits).unwrap(), accval);
    }

    #[test]
    fn membership_round_trip_random_setup() {
        let mut rng = StdRng::seed_from_u64(5);
        let acc = ClassGroupAccumulator::generate(64, &mut rng);
        assert_eq!(acc.discriminant().mod_floor(&BigInt::from(4)), BigInt::one());
        let xs = data(&[b"a", b"b", b"c"]);
        let state = acc.accumulate(&xs);
        let accval = acc.get_accval(&state);
        let batch = acc.batch_witgen(&xs);
        for (x, w) in xs.iter().zip(&batch) {
            assert!(acc.verify(&accval, w, x));
        }
    }

    #[test]
    fn witnesses_from_wrong_group_are_rejected() {
        let acc = ClassGroupAccumulator::from_seed(b"group-a", 64);
        let other = ClassGroupAccumulator::from_seed(b"group-b", 64);
        let xs = data(&[b"a", b"b"]);
        let accval = acc.get_accval(&acc.accumulate(&xs));
        let foreign = other.witgen(&other.accumulate(&xs), &xs, 0);
        assert!(!acc.verify(&accval, &foreign, b"a"));
    }
}
