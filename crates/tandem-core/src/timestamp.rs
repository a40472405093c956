//! Wrapping 32-bit sample timestamps
//!
//! RTP timestamps (and the device-rate timestamps derived from the PTP clock)
//! are 32-bit counters in units of samples that wrap roughly every 24 hours at
//! 48kHz. All comparisons between them go through [`WrappingU32::diff`], which
//! picks the shortest circular distance so wraparound needs no special casing.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Half of the 32-bit circle
const HALF_CIRCLE: u32 = 1 << 31;

/// A timestamp modulo 2^32
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WrappingU32(pub u32);

impl WrappingU32 {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Move forward by `delta` samples, wrapping at 2^32
    #[inline]
    #[must_use]
    pub const fn advance(self, delta: u32) -> Self {
        Self(self.0.wrapping_add(delta))
    }

    /// Move backward by `delta` samples, wrapping at 2^32
    #[inline]
    #[must_use]
    pub const fn rewind(self, delta: u32) -> Self {
        Self(self.0.wrapping_sub(delta))
    }

    /// Shortest signed circular distance `self - other`
    ///
    /// The result lies in `(-2^31, 2^31]`. The exact half circle is ambiguous
    /// and always resolves to the positive representative `+2^31`, which is
    /// why the return type is wider than `i32`.
    #[inline]
    pub const fn diff(self, other: Self) -> i64 {
        let forward = self.0.wrapping_sub(other.0);
        if forward <= HALF_CIRCLE {
            forward as i64
        } else {
            forward as i64 - (1i64 << 32)
        }
    }

    /// True if `self` lies strictly after `other` on the circle
    #[inline]
    pub const fn is_after(self, other: Self) -> bool {
        self.diff(other) > 0
    }
}

impl From<u32> for WrappingU32 {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Add<u32> for WrappingU32 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        self.advance(rhs)
    }
}

impl AddAssign<u32> for WrappingU32 {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        *self = self.advance(rhs);
    }
}

impl Sub<u32> for WrappingU32 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: u32) -> Self {
        self.rewind(rhs)
    }
}

impl SubAssign<u32> for WrappingU32 {
    #[inline]
    fn sub_assign(&mut self, rhs: u32) {
        *self = self.rewind(rhs);
    }
}

impl fmt::Display for WrappingU32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
