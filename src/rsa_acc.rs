//! RSA accumulator and its prime-hashed universal variant.
//!
//! The accumulation value is `g^{∏ e(x_i)} mod n` for a trusted-setup
//! modulus `n = p·q` and base `g = 2^65537 mod n`; a membership witness for
//! `x_i` is the same power with `e(x_i)` left out, so verification is a
//! single `w^{e(x)} ≡ acc (mod n)`.
//!
//! The element encoding `e` is a type parameter: [`RawEncoding`]
//! interprets the bytes as a big-endian integer, [`PrimeEncoding`] maps
//! them through a 256-bit hash-to-prime first. Prime encodings make the
//! accumulated exponents pairwise coprime, which is what enables
//! non-membership proofs: from Bézout's identity `a·∏e(x_i) + b·e(x) = 1`
//! the witness `(a, B = g^b)` satisfies `acc^a · B^{e(x)} ≡ g (mod n)`,
//! and no such identity exists when `e(x)` divides the product.
//!
//! Batch witnesses use the shared root-factoring recursion; the per-data
//! witness set is memoised on the accumulator instance.

use std::marker::PhantomData;
use std::sync::Arc;

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{One, Signed};
use rand::Rng;

use crate::acc::{root_factor, Accumulator, UniversalAccumulator, WitnessCache};
use crate::hashgen::hash_prime;
use crate::primality::gen_prime;

/// Public exponent used to derive the setup base from 2.
const SETUP_EXPONENT: u32 = 65537;

/// Bit width of the hash-to-prime element encoding.
const PRIME_ENCODING_BITS: usize = 256;

/// Maps accumulated byte strings to exponents.
pub trait ElementEncoding {
    fn encode(x: &[u8]) -> BigUint;
}

/// Bytes interpreted as a non-negative big-endian integer.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawEncoding;

impl ElementEncoding for RawEncoding {
    fn encode(x: &[u8]) -> BigUint {
        BigUint::from_bytes_be(x)
    }
}

/// Bytes mapped through a 256-bit hash-to-prime.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrimeEncoding;

impl ElementEncoding for PrimeEncoding {
    fn encode(x: &[u8]) -> BigUint {
        hash_prime(x, PRIME_ENCODING_BITS)
    }
}

/// RSA accumulator parameterised by the element encoding.
pub struct RsaAccumulator<E: ElementEncoding = RawEncoding> {
    n: BigUint,
    g: BigUint,
    cache: WitnessCache<BigUint>,
    _encoding: PhantomData<E>,
}

/// RSA accumulator with hash-to-prime encoding (universal).
pub type RsaPrimeAccumulator = RsaAccumulator<PrimeEncoding>;

impl<E: ElementEncoding> RsaAccumulator<E> {
    /// Wraps an existing modulus and base.
    pub fn new(n: BigUint, g: BigUint) -> Self {
        RsaAccumulator {
            n,
            g,
            cache: WitnessCache::new(),
            _encoding: PhantomData,
        }
    }

    /// Trusted setup: two random `bits/2` primes whose product becomes the
    /// modulus. Whoever runs this must discard the factors.
    pub fn generate<R: Rng>(bits: u64, rng: &mut R) -> Self {
        let p = gen_prime(bits / 2, rng);
        let q = loop {
            let q = gen_prime(bits / 2, rng);
            if q != p {
                break q;
            }
        };
        let n = &p * &q;
        let g = BigUint::from(2u32).modpow(&BigUint::from(SETUP_EXPONENT), &n);
        Self::new(n, g)
    }

    /// The public modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    fn raise(&self, base: &BigUint, xs: &[Vec<u8>]) -> BigUint {
        xs.iter()
            .fold(base.clone(), |acc, x| acc.modpow(&E::encode(x), &self.n))
    }

    fn cached_witnesses(&self, data: &[Vec<u8>]) -> Arc<Vec<BigUint>> {
        self.cache.get_or_compute(data, || {
            root_factor(&self.g, data, &|g: &BigUint, xs: &[Vec<u8>]| self.raise(g, xs))
        })
    }
}

impl<E: ElementEncoding> Accumulator for RsaAccumulator<E> {
    type Acc = BigUint;
    type Value = BigUint;
    type Witness = BigUint;

    fn accumulate(&self, data: &[Vec<u8>]) -> BigUint {
        self.raise(&self.g, data)
    }

    fn witgen(&self, _acc: &BigUint, data: &[Vec<u8>], index: usize) -> BigUint {
        self.cached_witnesses(data)[index].clone()
    }

    fn batch_witgen(&self, data: &[Vec<u8>]) -> Vec<BigUint> {
        self.cached_witnesses(data).as_ref().clone()
    }

    fn verify(&self, accval: &BigUint, witness: &BigUint, x: &[u8]) -> bool {
        witness.modpow(&E::encode(x), &self.n) == *accval
    }

    fn get_accval(&self, acc: &BigUint) -> BigUint {
        acc.clone()
    }

    fn to_bytes(&self, accval: &BigUint) -> Vec<u8> {
        let width = ((self.n.bits() + 7) / 8) as usize;
        let raw = accval.to_bytes_be();
        let mut out = vec![0u8; width - raw.len()];
        out.extend_from_slice(&raw);
        out
    }
}

/// Non-membership witness `(a, B)` with `acc^a · B^{e(x)} ≡ g (mod n)`.
#[derive(Clone, Debug)]
pub struct RsaNonMemWitness {
    pub a: BigInt,
    pub b_power: BigUint,
}

impl UniversalAccumulator for RsaAccumulator<PrimeEncoding> {
    type NonMemWitness = RsaNonMemWitness;

    fn nonmemwitgen(
        &self,
        _acc: &BigUint,
        data: &[Vec<u8>],
        x: &[u8],
    ) -> Option<RsaNonMemWitness> {
        if data.iter().any(|d| d.as_slice() == x) {
            return None;
        }
        let product: BigUint = data.iter().fold(BigUint::one(), |s, d| s * PrimeEncoding::encode(d));
        let target = PrimeEncoding::encode(x);
        let ext = BigInt::from(product).extended_gcd(&BigInt::from(target));
        // gcd is 1 unless e(x) collides with a member's prime, in which
        // case no valid witness exists; the identity below then fails to
        // verify, mirroring the membership side.
        let b_power = powmod_signed(&self.g, &ext.y, &self.n);
        Some(RsaNonMemWitness { a: ext.x, b_power })
    }

    fn nonmemverify(&self, accval: &BigUint, witness: &RsaNonMemWitness, x: &[u8]) -> bool {
        let lhs = powmod_signed(accval, &witness.a, &self.n)
            * witness.b_power.modpow(&PrimeEncoding::encode(x), &self.n)
            % &self.n;
        lhs == self.g
    }
}

/// `base^e mod n` for a signed exponent: negative exponents go through the
/// modular inverse. The base must be invertible, which holds for all
/// accumulator values unless the setup factors leak into the data.
fn powmod_signed(base: &BigUint, e: &BigInt, n: &BigUint) -> BigUint {
    let magnitude = e.magnitude();
    if e.is_negative() {
        let inv = base.modinv(n).expect("accumulator value invertible mod n");
        inv.modpow(magnitude, n)
    } else {
        base.modpow(magnitude, n)
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

    fn small_setup<E: ElementEncoding>() -> RsaAccumulator<E> {
        let mut rng = StdRng::seed_from_u64(42);
        RsaAccumulator::<E>::generate(256, &mut rng)
    }

    #[test]
    fn membership_round_trip() {
        let acc = small_setup::<RawEncoding>();
        let xs = data(&[b"peko", b"peko2", b"peko3"]);
        let state = acc.accumulate(&xs);
        let accval = acc.get_accval(&state);
        for (i, x) in xs.iter().enumerate() {
            let w = acc.witgen(&state, &xs, i);
            assert!(acc.verify(&accval, &w, x));
            assert!(!acc.verify(&accval, &w, b"other"));
        }
        assert_eq!(acc.to_bytes(&accval).len(), 32);
    }

    #[test]
    fn batch_witnesses_verify() {
        let acc = small_setup::<RawEncoding>();
        let xs = data(&[b"a", b"b", b"c", b"d", b"e"]);
        let accval = acc.accumulate(&xs);
        let witnesses = acc.batch_witgen(&xs);
        assert_eq!(witnesses.len(), xs.len());
        for (x, w) in xs.iter().zip(&witnesses) {
            assert!(acc.verify(&accval, w, x));
        }
    }

    #[test]
    fn prime_encoded_membership() {
        let acc = small_setup::<PrimeEncoding>();
        let xs = data(&[b"peko", b"peko2", b"peko3"]);
        let state = acc.accumulate(&xs);
        let accval = acc.get_accval(&state);
        let w = acc.witgen(&state, &xs, 1);
        assert!(acc.verify(&accval, &w, &xs[1]));
        assert!(!acc.verify(&accval, &w, &xs[0]));
    }

    #[test]
    fn nonmembership_accepts_absent_rejects_present() {
        let acc = small_setup::<PrimeEncoding>();
        let xs = data(&[b"peko", b"peko2", b"peko3"]);
        let state = acc.accumulate(&xs);
        let accval = acc.get_accval(&state);

        let w = acc.nonmemwitgen(&state, &xs, b"peko4").expect("absent");
        assert!(acc.nonmemverify(&accval, &w, b"peko4"));

        // Members never get a witness.
        assert!(acc.nonmemwitgen(&state, &xs, b"peko").is_none());

        // A witness for one value does not transfer to another.
        assert!(!acc.nonmemverify(&accval, &w, b"peko5"));
    }
}
