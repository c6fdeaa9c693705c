//! Hash gadgets: deterministic derivation of integers, primes,
//! discriminants and class-group elements from arbitrary byte strings.
//!
//! Everything downstream (VDF challenges, Fiat–Shamir primes, accumulator
//! setup) is anchored in four gadgets over a SHAKE-256 stream:
//!
//! - [`HashStream`] — an unbounded sequence of `k`-bit integers. Each step
//!   hashes the current seed, takes the first `⌈k/8⌉` bytes big-endian,
//!   forces bit `k−1` on, reduces mod `2^k`, and feeds the digest back as
//!   the next seed.
//! - [`hash_prime`] — first stream element (low bit forced) that passes the
//!   primality test.
//! - [`hash_discriminant`] — first stream element with `p ≡ 7 (mod 8)`
//!   prime, returned as `−p`, so the discriminant satisfies `−d ≡ 1 (mod
//!   8)`.
//! - [`hash_to_form`] — a reduced binary quadratic form of a given
//!   discriminant, found by searching for a prime `a ≡ 3 (mod 4)` with `d`
//!   a quadratic residue mod `a` and lifting a square root of `d`.
//!
//! Termination of the search loops is probabilistic; by the prime number
//! theorem a candidate succeeds after `O(k)` attempts in expectation.

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::One;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use crate::bqf::BinaryQf;
use crate::primality::is_probable_prime;

/// Unbounded stream of `k`-bit integers derived from a byte seed.
pub struct HashStream {
    seed: Vec<u8>,
    byte_len: usize,
    modulus: BigUint,
    high_bit: BigUint,
}

impl HashStream {
    /// Creates a stream for `bits`-wide outputs seeded with `x`.
    pub fn new(x: &[u8], bits: usize) -> Self {
        assert!(bits >= 2, "stream width must be at least 2 bits");
        HashStream {
            seed: x.to_vec(),
            byte_len: (bits + 7) / 8,
            modulus: BigUint::one() << bits,
            high_bit: BigUint::one() << (bits - 1),
        }
    }
}

impl Iterator for HashStream {
    type Item = BigUint;

    fn next(&mut self) -> Option<BigUint> {
        let mut hasher = Shake256::default();
        hasher.update(&self.seed);
        let mut digest = vec![0u8; self.byte_len];
        hasher.finalize_xof().read(&mut digest);

        let mut r = BigUint::from_bytes_be(&digest);
        r |= &self.high_bit;
        r %= &self.modulus;

        // The truncated digest becomes the next seed.
        self.seed = digest;
        Some(r)
    }
}

/// Hashes `x` to a `bits`-bit probable prime.
pub fn hash_prime(x: &[u8], bits: usize) -> BigUint {
    let one = BigUint::one();
    for candidate in HashStream::new(x, bits) {
        let p = candidate | &one;
        if is_probable_prime(&p) {
            return p;
        }
    }
    unreachable!("HashStream is infinite")
}

/// Hashes `x` to a negative `bits`-bit prime discriminant `d` with
/// `−d ≡ 1 (mod 8)`.
pub fn hash_discriminant(x: &[u8], bits: usize) -> BigInt {
    let seven = BigUint::from(7u32);
    for candidate in HashStream::new(x, bits) {
        let p = candidate | &seven;
        if is_probable_prime(&p) {
            return -BigInt::from(p);
        }
    }
    unreachable!("HashStream is infinite")
}

/// Hashes `x` to a reduced binary quadratic form of discriminant `d`.
///
/// Candidates `a ≡ 3 (mod 4)` are drawn from the stream until a prime with
/// `d` a quadratic residue mod `a` is found. Because `a ≡ 3 (mod 4)`, the
/// square root is the simple lift `b = d^((a+1)/4) mod a`; `b` is flipped
/// to the odd representative so that `b² ≡ d (mod 4a)`.
pub fn hash_to_form(x: &[u8], d: &BigInt, bits: usize) -> BinaryQf {
    let one = BigInt::one();
    let two = BigInt::from(2);
    let three = BigUint::from(3u32);
    let four = BigInt::from(4);
    for candidate in HashStream::new(x, bits) {
        let a_unsigned = candidate | &three;
        if !is_probable_prime(&a_unsigned) {
            continue;
        }
        let a = BigInt::from(a_unsigned);
        let d_mod_a = d.mod_floor(&a);
        let legendre_exp = (&a - &one).div_floor(&two);
        if d_mod_a.modpow(&legendre_exp, &a) != one {
            continue;
        }
        let sqrt_exp = (&a + &one).div_floor(&four);
        let mut b = d_mod_a.modpow(&sqrt_exp, &a);
        if b.mod_floor(&two) != one {
            b = &a - &b;
        }
        let c = (&b * &b - d).div_floor(&(&four * &a));
        return BinaryQf::new(a, b, c).reduced();
    }
    unreachable!("HashStream is infinite")
}

// ============================================================================
// Tests
// ============================================================================
