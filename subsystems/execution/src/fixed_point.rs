//! # Fixed-Point Arithmetic
//!
//! Signed 17.14 fixed point: 17 integer bits, 14 fraction bits. The kernel
//! has no floating point, so the load average and recent-CPU filters use this.

use core::ops::{Add, Div, Mul, Sub};
use static_assertions::const_assert_eq;

const FRACTION_BITS: u32 = 14;
const F: i32 = 1 << FRACTION_BITS;

const_assert_eq!(F, 16384);

/// A 17.14 fixed-point number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Fixed(i32);

impl Fixed {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Convert an integer
    pub const fn from_int(n: i32) -> Self {
        Self(n * F)
    }

    /// The fraction `num / den`
    pub const fn frac(num: i32, den: i32) -> Self {
        Self(((num as i64 * F as i64) / den as i64) as i32)
    }

    /// Raw representation
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Round toward zero
    pub const fn trunc(self) -> i32 {
        self.0 / F
    }

    /// Round to nearest, halves away from zero
    pub const fn round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// `self + n`
    pub const fn add_int(self, n: i32) -> Self {
        Self(self.0 + n * F)
    }

    /// `self - n`
    pub const fn sub_int(self, n: i32) -> Self {
        Self(self.0 - n * F)
    }

    /// `self * n`
    pub const fn mul_int(self, n: i32) -> Self {
        Self(self.0 * n)
    }

    /// `self / n`
    pub const fn div_int(self, n: i32) -> Self {
        Self(self.0 / n)
    }
}

impl Add for Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for Fixed {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self(((self.0 as i64 * rhs.0 as i64) / F as i64) as i32)
    }
}

impl Div for Fixed {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self(((self.0 as i64 * F as i64) / rhs.0 as i64) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Fixed::from_int(5).trunc(), 5);
        assert_eq!(Fixed::from_int(-5).trunc(), -5);
        assert_eq!(Fixed::frac(1, 2).round(), 1);
        assert_eq!(Fixed::frac(-1, 2).round(), -1);
        assert_eq!(Fixed::frac(1, 3).round(), 0);
        assert_eq!(Fixed::frac(7, 4).trunc(), 1);
    }

    #[test]
    fn test_arithmetic() {
        let a = Fixed::from_int(3);
        let b = Fixed::frac(1, 2);
        assert_eq!((a * b).mul_int(100).round(), 150);
        assert_eq!((a / b).trunc(), 6);
        assert_eq!((a - b).mul_int(10).trunc(), 25);
        assert_eq!(a.add_int(2).sub_int(1), Fixed::from_int(4));
        assert_eq!(a.div_int(2).mul_int(100).trunc(), 150);
    }

    #[test]
    fn test_load_average_step() {
        // One second with a single ready thread starting from zero.
        let load = Fixed::frac(59, 60) * Fixed::ZERO + Fixed::frac(1, 60).mul_int(1);
        assert_eq!(load.mul_int(100).round(), 2);
    }
}
