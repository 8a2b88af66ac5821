//! 64-bit integers emulated on pairs of 32-bit words.
//!
//! Targets without native 64-bit integers carry every `int64`/`uint64` as a
//! [`WideInt`]. All arithmetic here works on the 32-bit halves with explicit
//! carries; the signedness of an operation lives in the method called, never
//! in the value.

use std::cmp::Ordering;
use std::fmt;

use super::error::Fault;

/// A 64-bit integer stored as high and low 32-bit words.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WideInt {
    pub hi: i32,
    pub lo: i32,
}

const TWO_32: f64 = 4_294_967_296.0;

/// Full 32x32 -> 64 multiply on 16-bit limbs, returned as (hi, lo).
fn mul_u32(a: u32, b: u32) -> (u32, u32) {
    let (a1, a0) = (a >> 16, a & 0xffff);
    let (b1, b0) = (b >> 16, b & 0xffff);
    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;
    // Middle column may exceed 32 bits, so track its carry separately.
    let mid = (p00 >> 16) + (p01 & 0xffff) + (p10 & 0xffff);
    let lo = (p00 & 0xffff) | (mid << 16);
    let hi = p11 + (p01 >> 16) + (p10 >> 16) + (mid >> 16);
    (hi, lo)
}

impl WideInt {
    pub const ZERO: WideInt = WideInt { hi: 0, lo: 0 };
    pub const MIN: WideInt = WideInt { hi: i32::MIN, lo: 0 };
    pub const MAX: WideInt = WideInt { hi: i32::MAX, lo: -1 };

    pub fn new(hi: i32, lo: i32) -> Self {
        Self { hi, lo }
    }

    pub fn from_i64(v: i64) -> Self {
        Self {
            hi: (v >> 32) as i32,
            lo: v as i32,
        }
    }

    pub fn from_u64(v: u64) -> Self {
        Self::from_i64(v as i64)
    }

    pub fn to_i64(self) -> i64 {
        ((self.hi as i64) << 32) | (self.lo as u32 as i64)
    }

    pub fn to_u64(self) -> u64 {
        self.to_i64() as u64
    }

    fn uhi(self) -> u32 {
        self.hi as u32
    }

    fn ulo(self) -> u32 {
        self.lo as u32
    }

    fn from_parts(hi: u32, lo: u32) -> Self {
        Self {
            hi: hi as i32,
            lo: lo as i32,
        }
    }

    pub fn is_zero(self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    pub fn is_negative(self) -> bool {
        self.hi < 0
    }

    pub fn add(self, other: Self) -> Self {
        let (lo, carry) = self.ulo().overflowing_add(other.ulo());
        let hi = self
            .uhi()
            .wrapping_add(other.uhi())
            .wrapping_add(carry as u32);
        Self::from_parts(hi, lo)
    }

    pub fn sub(self, other: Self) -> Self {
        let (lo, borrow) = self.ulo().overflowing_sub(other.ulo());
        let hi = self
            .uhi()
            .wrapping_sub(other.uhi())
            .wrapping_sub(borrow as u32);
        Self::from_parts(hi, lo)
    }

    pub fn neg(self) -> Self {
        Self::ZERO.sub(self)
    }

    pub fn mul(self, other: Self) -> Self {
        let (carry, lo) = mul_u32(self.ulo(), other.ulo());
        let cross = self
            .ulo()
            .wrapping_mul(other.uhi())
            .wrapping_add(self.uhi().wrapping_mul(other.ulo()));
        Self::from_parts(carry.wrapping_add(cross), lo)
    }

    pub fn and(self, other: Self) -> Self {
        Self::new(self.hi & other.hi, self.lo & other.lo)
    }

    pub fn or(self, other: Self) -> Self {
        Self::new(self.hi | other.hi, self.lo | other.lo)
    }

    pub fn xor(self, other: Self) -> Self {
        Self::new(self.hi ^ other.hi, self.lo ^ other.lo)
    }

    pub fn and_not(self, other: Self) -> Self {
        Self::new(self.hi & !other.hi, self.lo & !other.lo)
    }

    pub fn not(self) -> Self {
        Self::new(!self.hi, !self.lo)
    }

    pub fn shl(self, count: u64) -> Self {
        if count >= 64 {
            return Self::ZERO;
        }
        let n = count as u32;
        if n == 0 {
            self
        } else if n >= 32 {
            Self::from_parts(self.ulo() << (n - 32), 0)
        } else {
            Self::from_parts(
                (self.uhi() << n) | (self.ulo() >> (32 - n)),
                self.ulo() << n,
            )
        }
    }

    pub fn shr_unsigned(self, count: u64) -> Self {
        if count >= 64 {
            return Self::ZERO;
        }
        let n = count as u32;
        if n == 0 {
            self
        } else if n >= 32 {
            Self::from_parts(0, self.uhi() >> (n - 32))
        } else {
            Self::from_parts(
                self.uhi() >> n,
                (self.ulo() >> n) | (self.uhi() << (32 - n)),
            )
        }
    }

    pub fn shr_signed(self, count: u64) -> Self {
        let fill = if self.hi < 0 { -1 } else { 0 };
        if count >= 64 {
            return Self::new(fill, fill);
        }
        let n = count as u32;
        if n == 0 {
            self
        } else if n >= 32 {
            Self::new(fill, self.hi >> (n - 32))
        } else {
            Self::from_parts(
                (self.hi >> n) as u32,
                (self.ulo() >> n) | (self.uhi() << (32 - n)),
            )
        }
    }

    pub fn cmp_unsigned(self, other: Self) -> Ordering {
        self.uhi()
            .cmp(&other.uhi())
            .then(self.ulo().cmp(&other.ulo()))
    }

    pub fn cmp_signed(self, other: Self) -> Ordering {
        self.hi.cmp(&other.hi).then(self.ulo().cmp(&other.ulo()))
    }

    /// Unsigned quotient and remainder by shift-subtract.
    fn divmod_unsigned(self, divisor: Self) -> (Self, Self) {
        let mut quotient = Self::ZERO;
        let mut remainder = Self::ZERO;
        for bit in (0..64u64).rev() {
            remainder = remainder.shl(1);
            if self.shr_unsigned(bit).ulo() & 1 == 1 {
                remainder.lo |= 1;
            }
            if remainder.cmp_unsigned(divisor) != Ordering::Less {
                remainder = remainder.sub(divisor);
                quotient = quotient.or(Self::from_i64(1).shl(bit));
            }
        }
        (quotient, remainder)
    }

    pub fn div_unsigned(self, other: Self) -> Result<Self, Fault> {
        if other.is_zero() {
            return Err(Fault::DivideByZero);
        }
        Ok(self.divmod_unsigned(other).0)
    }

    pub fn rem_unsigned(self, other: Self) -> Result<Self, Fault> {
        if other.is_zero() {
            return Err(Fault::DivideByZero);
        }
        Ok(self.divmod_unsigned(other).1)
    }

    /// Truncating signed division; `MIN / -1` wraps to `MIN`.
    pub fn div_signed(self, other: Self) -> Result<Self, Fault> {
        if other.is_zero() {
            return Err(Fault::DivideByZero);
        }
        let a = if self.is_negative() { self.neg() } else { self };
        let b = if other.is_negative() { other.neg() } else { other };
        let (q, _) = a.divmod_unsigned(b);
        if self.is_negative() != other.is_negative() {
            Ok(q.neg())
        } else {
            Ok(q)
        }
    }

    /// Remainder with the sign of the dividend; `MIN % -1` is 0.
    pub fn rem_signed(self, other: Self) -> Result<Self, Fault> {
        if other.is_zero() {
            return Err(Fault::DivideByZero);
        }
        let a = if self.is_negative() { self.neg() } else { self };
        let b = if other.is_negative() { other.neg() } else { other };
        let (_, r) = a.divmod_unsigned(b);
        if self.is_negative() { Ok(r.neg()) } else { Ok(r) }
    }

    pub fn to_f64(self, signed: bool) -> f64 {
        if signed {
            self.hi as f64 * TWO_32 + self.ulo() as f64
        } else {
            self.uhi() as f64 * TWO_32 + self.ulo() as f64
        }
    }

    /// Truncate toward zero. Out-of-range values saturate, NaN becomes 0.
    pub fn from_f64(v: f64, signed: bool) -> Self {
        if v.is_nan() {
            return Self::ZERO;
        }
        let v = v.trunc();
        if signed {
            if v >= 9_223_372_036_854_775_807.0 {
                return Self::MAX;
            }
            if v <= -9_223_372_036_854_775_808.0 {
                return Self::MIN;
            }
            if v < 0.0 {
                return Self::from_f64(-v, false).neg();
            }
        } else {
            if v <= 0.0 {
                return Self::ZERO;
            }
            if v >= 18_446_744_073_709_551_615.0 {
                return Self::new(-1, -1);
            }
        }
        let hi = (v / TWO_32).floor();
        let lo = v - hi * TWO_32;
        Self::from_parts(hi as u32, lo as u32)
    }

    pub fn to_string_signed(self) -> String {
        self.to_i64().to_string()
    }

    pub fn to_string_unsigned(self) -> String {
        self.to_u64().to_string()
    }
}

impl fmt::Debug for WideInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wide({:#010x}:{:#010x})", self.hi as u32, self.lo as u32)
    }
}
