//! Binary quadratic forms and class-group arithmetic.
//!
//! A form `(a, b, c)` represents `ax² + bxy + cy²` with discriminant
//! `Δ = b² − 4ac`. For a fixed negative discriminant the equivalence
//! classes of forms make a finite abelian group under Gaussian composition,
//! with the reduced form the canonical representative of each class. This
//! group of unknown order is what both the accumulator and the VDF
//! exponentiate in.
//!
//! ## Invariants
//!
//! - Composition is only defined between forms of equal discriminant;
//!   violating this is a bug in the caller and asserts.
//! - All divisions in composition, normalisation and reduction are **floor**
//!   divisions (`div_floor`), matching the arbitrary-precision Euclidean
//!   convention the algorithms are stated in. Truncating division would
//!   silently corrupt intermediates for negative operands.
//! - [`BinaryQf::reduced`] is idempotent and every class has exactly one
//!   reduced member: `|b| ≤ a ≤ c`, with `b ≥ 0` when `|b| = a` or `a = c`.
//!
//! Serialisation is fixed-width two's-complement big-endian per component,
//! concatenated in `(a, b, c)` order, so forms embed into hash inputs and
//! wire messages at a stable size.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use thiserror::Error;

/// Decoding error for the fixed-width byte representation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QfCodecError {
    /// Input length is not exactly three components of the expected width.
    #[error("encoded form has length {got}, expected {expected}")]
    Length { got: usize, expected: usize },
}

/// A binary quadratic form `(a, b, c)`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BinaryQf {
    pub a: BigInt,
    pub b: BigInt,
    pub c: BigInt,
}

/// Solves `a·x ≡ b (mod m)`, returning `(u, v)` with the solution set
/// `x ≡ u (mod v)` where `v = m / gcd(a, m)`. Returns `None` iff
/// `gcd(a, m) ∤ b` (no solution).
pub fn solve_linmod(a: &BigInt, b: &BigInt, m: &BigInt) -> Option<(BigInt, BigInt)> {
    let mut ext = a.extended_gcd(m);
    // extended_gcd follows the sign of its inputs; the congruence needs
    // the non-negative gcd, so flip the whole Bézout identity if needed.
    if ext.gcd.is_negative() {
        ext.gcd = -ext.gcd;
        ext.x = -ext.x;
    }
    let (q, r) = b.div_mod_floor(&ext.gcd);
    if !r.is_zero() {
        return None;
    }
    let u = (q * ext.x).mod_floor(m);
    let v = m.div_floor(&ext.gcd);
    Some((u, v))
}

impl BinaryQf {
    /// Builds a form from its raw coefficients.
    pub fn new(a: BigInt, b: BigInt, c: BigInt) -> Self {
        BinaryQf { a, b, c }
    }

    /// The discriminant `b² − 4ac`.
    pub fn discriminant(&self) -> BigInt {
        &self.b * &self.b - BigInt::from(4) * &self.a * &self.c
    }

    /// The principal form of discriminant `d`: the group identity.
    ///
    /// With `k = d mod 2` this is `(1, k, (k² − d)/4)`.
    pub fn principal(d: &BigInt) -> Self {
        let k = d.mod_floor(&BigInt::from(2));
        let c = (&k * &k - d).div_floor(&BigInt::from(4));
        BinaryQf::new(BigInt::one(), k, c)
    }

    /// Gaussian composition of two forms of equal discriminant.
    ///
    /// The result is not reduced; callers compose-then-reduce.
    pub fn compose(&self, other: &BinaryQf) -> BinaryQf {
        if self == other {
            return self.square();
        }
        debug_assert_eq!(
            self.discriminant(),
            other.discriminant(),
            "composition of forms with different discriminants"
        );
        let two = BigInt::from(2);
        let (a1, b1, c1) = (&self.a, &self.b, &self.c);
        let (a2, b2) = (&other.a, &other.b);

        let g = (b1 + b2).div_floor(&two);
        let h = -(b1 - b2).div_floor(&two);
        let w = a1.gcd(a2).gcd(&g);

        let j = w.clone();
        let s = a1.div_floor(&w);
        let t = a2.div_floor(&w);
        let u = g.div_floor(&w);
        let st = &s * &t;

        let (mu, nu) = solve_linmod(&(&t * &u), &(&h * &u + &s * c1), &st)
            .expect("first composition congruence is consistent for equal discriminants");
        let (lambda, _) = solve_linmod(&(&t * &nu), &(&h - &t * &mu), &s)
            .expect("second composition congruence is consistent for equal discriminants");

        let k = &mu + &nu * &lambda;
        let l = (&k * &t - &h).div_floor(&s);
        let m = (&t * &u * &k - &h * &u - c1 * &s).div_floor(&st);

        let a3 = st;
        let b3 = &j * &u - (&k * &t + &l * &s);
        let c3 = &k * &l - &j * &m;
        BinaryQf::new(a3, b3, c3)
    }

    /// Composition of a form with itself (the VDF's hot operation).
    pub fn square(&self) -> BinaryQf {
        let (a, b, c) = (&self.a, &self.b, &self.c);
        let (mu, _) = solve_linmod(b, c, a)
            .expect("squaring congruence b·x ≡ c (mod a) is consistent");
        let a2 = a * a;
        let b2 = b - BigInt::from(2) * a * &mu;
        let c2 = &mu * &mu - (b * &mu - c).div_floor(a);
        BinaryQf::new(a2, b2, c2)
    }

    /// Normalises the form: shifts `b` into `(−a, a]` via
    /// `(a, b, c) → (a, b + 2ra, ar² + br + c)` with `r = ⌊(a − b)/2a⌋`.
    pub fn normalized(&self) -> BinaryQf {
        let (a, b, c) = (&self.a, &self.b, &self.c);
        let r = (a - b).div_floor(&(BigInt::from(2) * a));
        let b2 = b + BigInt::from(2) * &r * a;
        let c2 = a * &r * &r + b * &r + c;
        BinaryQf::new(a.clone(), b2, c2)
    }

    /// The unique reduced representative of this form's class.
    pub fn reduced(&self) -> BinaryQf {
        let nf = self.normalized();
        let (mut a, mut b, mut c) = (nf.a, nf.b, nf.c);
        let two = BigInt::from(2);
        while !(a < c || (a == c && !b.is_negative())) {
            let s = (&c + &b).div_floor(&(&two * &c));
            let a2 = c.clone();
            let b2 = -&b + &two * &s * &c;
            let c2 = &c * &s * &s - &b * &s + &a;
            a = a2;
            b = b2;
            c = c2;
        }
        BinaryQf::new(a, b, c)
    }

    /// Whether the form is already reduced.
    pub fn is_reduced(&self) -> bool {
        let abs_b = self.b.abs();
        if abs_b > self.a || self.a > self.c {
            return false;
        }
        if (abs_b == self.a || self.a == self.c) && self.b.is_negative() {
            return false;
        }
        true
    }

    /// Left-to-right square-and-multiply exponentiation over reduced
    /// intermediates. `pow(0)` is the principal form.
    pub fn pow(&self, n: &BigUint) -> BinaryQf {
        let base = self.reduced();
        let mut r = BinaryQf::principal(&base.discriminant());
        for i in (0..n.bits()).rev() {
            r = r.square().reduced();
            if n.bit(i) {
                r = r.compose(&base).reduced();
            }
        }
        r
    }

    /// Raises the form to the product of exponents given as big-endian
    /// byte strings. This covers the contract of a raw multi-exponentiation
    /// backend: `(a, b, c)` triple in, triple out, exponents as bytes.
    pub fn pow_many(&self, exponents: &[Vec<u8>]) -> BinaryQf {
        let mut r = self.reduced();
        for e in exponents {
            r = r.pow(&BigUint::from_bytes_be(e));
        }
        r
    }

    /// Serialises as three fixed-width two's-complement big-endian
    /// components of `⌈bits/8⌉` bytes each.
    pub fn to_bytes(&self, bits: usize) -> Vec<u8> {
        let width = (bits + 7) / 8;
        let mut out = Vec::with_capacity(3 * width);
        for component in [&self.a, &self.b, &self.c] {
            out.extend_from_slice(&int_to_be_bytes(component, width));
        }
        out
    }

    /// Inverse of [`BinaryQf::to_bytes`] at the same width.
    pub fn from_bytes(data: &[u8], bits: usize) -> Result<BinaryQf, QfCodecError> {
        let width = (bits + 7) / 8;
        if data.len() != 3 * width {
            return Err(QfCodecError::Length {
                got: data.len(),
                expected: 3 * width,
            });
        }
        let a = BigInt::from_signed_bytes_be(&data[..width]);
        let b = BigInt::from_signed_bytes_be(&data[width..2 * width]);
        let c = BigInt::from_signed_bytes_be(&data[2 * width..]);
        Ok(BinaryQf::new(a, b, c))
    }
}

/// Fixed-width two's-complement big-endian encoding of a signed integer.
///
/// Panics if the value does not fit; form components are bounded by the
/// discriminant width chosen at setup, so overflow indicates a bug.
fn int_to_be_bytes(x: &BigInt, width: usize) -> Vec<u8> {
    let raw = x.to_signed_bytes_be();
    assert!(
        raw.len() <= width,
        "component of {} bytes exceeds field width {}",
        raw.len(),
        width
    );
    let fill = if x.sign() == Sign::Minus { 0xff } else { 0x00 };
    let mut out = vec![fill; width - raw.len()];
    out.extend_from_slice(&raw);
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashgen::{hash_discriminant, hash_to_form};

    fn qf(a: i64, b: i64, c: i64) -> BinaryQf {
        BinaryQf::new(BigInt::from(a), BigInt::from(b), BigInt::from(c))
    }

    /// The class group of discriminant −23 has order 3:
    /// { (1,1,6), (2,1,3), (2,−1,3) }.
    fn d23_forms() -> (BinaryQf, BinaryQf, BinaryQf) {
        (qf(1, 1, 6), qf(2, 1, 3), qf(2, -1, 3))
    }

    #[test]
    fn discriminant_is_preserved_by_operations() {
        let f = qf(12, 23, 34);
        let d = f.discriminant();
        assert_eq!(d, BigInt::from(23 * 23 - 4 * 12 * 34));
        assert_eq!(f.reduced().discriminant(), d);
        assert_eq!(f.square().discriminant(), d);
        assert_eq!(f.compose(&f.square()).discriminant(), d);
    }

    #[test]
    fn reduction_is_idempotent() {
        let d = hash_discriminant(b"reduction", 64);
        for seed in [&b"a"[..], b"b", b"c", b"d"] {
            let f = hash_to_form(seed, &d, 64);
            assert!(f.is_reduced());
            assert_eq!(f.reduced(), f);
            // A deliberately unreduced equivalent reduces back.
            assert_eq!(f.square().compose(&f).reduced().is_reduced(), true);
        }
        let (id, g, h) = d23_forms();
        for f in [id, g, h] {
            assert!(f.is_reduced());
            assert_eq!(f.reduced(), f);
        }
    }

    #[test]
    fn composition_is_commutative_with_identity() {
        let d = hash_discriminant(b"compose", 64);
        let f = hash_to_form(b"f", &d, 64);
        let g = hash_to_form(b"g", &d, 64);
        let id = BinaryQf::principal(&d);
        assert_eq!(f.compose(&g).reduced(), g.compose(&f).reduced());
        assert_eq!(f.compose(&id).reduced(), f.reduced());
        assert_eq!(id.compose(&f).reduced(), f.reduced());
    }

    #[test]
    fn order_three_class_group() {
        let (id, g, h) = d23_forms();
        assert_eq!(g.square().reduced(), h);
        assert_eq!(g.compose(&h).reduced(), id);
        assert_eq!(g.pow(&BigUint::from(3u32)), id);
        assert_eq!(g.pow(&BigUint::from(4u32)), g);
    }

    #[test]
    fn pow_satisfies_group_laws() {
        let d = hash_discriminant(b"pow", 64);
        let f = hash_to_form(b"base", &d, 64);
        let id = BinaryQf::principal(&d);
        assert_eq!(f.pow(&BigUint::zero()), id);
        assert_eq!(f.pow(&BigUint::one()), f.reduced());
        for (m, n) in [(2u32, 3u32), (5, 8), (1, 13), (0, 9)] {
            let lhs = f.pow(&BigUint::from(m + n));
            let rhs = f
                .pow(&BigUint::from(m))
                .compose(&f.pow(&BigUint::from(n)))
                .reduced();
            assert_eq!(lhs, rhs, "f^{m}+{n}");
        }
    }

    #[test]
    fn pow_many_matches_iterated_pow() {
        let d = hash_discriminant(b"powmany", 64);
        let f = hash_to_form(b"base", &d, 64);
        let exps = vec![vec![0x02], vec![0x01, 0x00], vec![0x11]];
        let expected = f
            .pow(&BigUint::from(2u32))
            .pow(&BigUint::from(256u32))
            .pow(&BigUint::from(17u32));
        assert_eq!(f.pow_many(&exps), expected);
    }

    #[test]
    fn byte_round_trip() {
        let d = hash_discriminant(b"bytes", 64);
        let f = hash_to_form(b"form", &d, 64);
        let encoded = f.to_bytes(64);
        assert_eq!(encoded.len(), 3 * 8);
        assert_eq!(BinaryQf::from_bytes(&encoded, 64).unwrap(), f);

        // Negative components survive the round trip.
        let g = qf(2, -1, 3);
        let enc = g.to_bytes(32);
        assert_eq!(BinaryQf::from_bytes(&enc, 32).unwrap(), g);

        assert_eq!(
            BinaryQf::from_bytes(&[0u8; 5], 32),
            Err(QfCodecError::Length { got: 5, expected: 12 })
        );
    }

    #[test]
    fn solve_linmod_solutions_and_failure() {
        // 3x ≡ 6 (mod 9): x ≡ 2 (mod 3).
        let (u, v) = solve_linmod(&BigInt::from(3), &BigInt::from(6), &BigInt::from(9)).unwrap();
        assert_eq!(v, BigInt::from(3));
        assert_eq!(u.mod_floor(&v), BigInt::from(2));
        // 2x ≡ 1 (mod 4) has no solution.
        assert!(solve_linmod(&BigInt::from(2), &BigInt::one(), &BigInt::from(4)).is_none());
        // Unit coefficient.
        let (u, v) = solve_linmod(&BigInt::from(5), &BigInt::from(2), &BigInt::from(7)).unwrap();
        assert_eq!((BigInt::from(5) * &u).mod_floor(&BigInt::from(7)), BigInt::from(2));
        assert_eq!(v, BigInt::from(7));
    }
}
