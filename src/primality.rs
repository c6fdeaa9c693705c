//! Probable-prime testing and prime generation over arbitrary-precision
//! integers.
//!
//! The hash gadgets and the RSA trusted setup both need a primality oracle
//! over `num_bigint::BigUint`. We use the classic layered test:
//!
//! 1. trial division by a table of small primes (cheap rejection of the
//!    overwhelming majority of candidates),
//! 2. Miller–Rabin to base 2,
//! 3. Miller–Rabin with randomly chosen bases.
//!
//! With [`MILLER_RABIN_ROUNDS`] random rounds the error probability is at
//! most `4^-rounds`, far below the security level of anything built on top.
//! Inputs here are hash outputs or locally generated candidates, so the
//! probabilistic guarantee is the right tool.

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;

/// Number of random-base Miller–Rabin rounds performed after the base-2
/// round. 32 rounds bound the false-positive probability by `2^-64`.
pub const MILLER_RABIN_ROUNDS: usize = 32;

/// Small primes used for trial division before running Miller–Rabin.
const SMALL_PRIMES: [u32; 46] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199,
];

/// Returns true if `n` is a probable prime.
pub fn is_probable_prime(n: &BigUint) -> bool {
    if n < &BigUint::from(2u32) {
        return false;
    }
    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // Write n - 1 = 2^r * d with d odd.
    let one = BigUint::one();
    let n_minus_1 = n - &one;
    let r = n_minus_1.trailing_zeros().expect("n > 2 is odd here");
    let d = &n_minus_1 >> r;

    if !miller_rabin_round(n, &BigUint::from(2u32), &d, r) {
        return false;
    }
    let mut rng = rand::thread_rng();
    let low = BigUint::from(2u32);
    let high = &n_minus_1 - &one;
    for _ in 0..MILLER_RABIN_ROUNDS {
        // Bases in [2, n-2]; for tiny n the range collapses to base 2,
        // which was already tested.
        if high <= low {
            break;
        }
        let a = rng.gen_biguint_range(&low, &high);
        if !miller_rabin_round(n, &a, &d, r) {
            return false;
        }
    }
    true
}

/// One Miller–Rabin round: `n` passes for witness `a` if `a^d == 1` or
/// `a^(2^i d) == n-1` for some `i < r`.
fn miller_rabin_round(n: &BigUint, a: &BigUint, d: &BigUint, r: u64) -> bool {
    let one = BigUint::one();
    let n_minus_1 = n - &one;
    let mut x = a.modpow(d, n);
    if x == one || x == n_minus_1 {
        return true;
    }
    for _ in 1..r {
        x = x.modpow(&BigUint::from(2u32), n);
        if x == n_minus_1 {
            return true;
        }
    }
    false
}

/// Generates a random probable prime with exactly `bits` bits.
///
/// The top bit is forced so the result has full width, the low bit so the
/// candidate is odd.
pub fn gen_prime<R: Rng>(bits: u64, rng: &mut R) -> BigUint {
    assert!(bits >= 2, "prime width must be at least 2 bits");
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate) {
            return candidate;
        }
    }
}

/// Generates a random probable prime `p` with `p ≡ r (mod m)` in `bits`
/// bits. Used by the class-group trusted setup (`p ≡ 3 (mod 4)`).
pub fn gen_prime_congruent<R: Rng>(bits: u64, r: u32, m: u32, rng: &mut R) -> BigUint {
    let m_big = BigUint::from(m);
    let r_big = BigUint::from(r);
    loop {
        let p = gen_prime(bits, rng);
        if p.mod_floor(&m_big) == r_big {
            return p;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
