//! Saturating two-bit counter.
//!
//! The canonical branch prediction hysteresis element: strongly/weakly
//! not-taken and taken states with saturating increment/decrement.

/// A two-bit saturating counter, 0 (strong not-taken) through 3 (strong taken).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TwoBit(u8);

impl TwoBit {
    /// Strongly not-taken.
    pub const STRONG_NT: Self = Self(0);
    /// Weakly not-taken.
    pub const WEAK_NT: Self = Self(1);
    /// Weakly taken.
    pub const WEAK_TAKEN: Self = Self(2);
    /// Strongly taken.
    pub const STRONG_TAKEN: Self = Self(3);

    /// The direction bit.
    #[inline]
    pub const fn taken(self) -> bool {
        self.0 >= 2
    }

    /// Saturating update toward the observed direction.
    #[inline]
    pub const fn update(self, taken: bool) -> Self {
        if taken {
            if self.0 < 3 { Self(self.0 + 1) } else { self }
        } else if self.0 > 0 {
            Self(self.0 - 1)
        } else {
            self
        }
    }

    /// Conditional saturating increment.
    #[inline]
    pub const fn cond_inc(self, p: bool) -> Self {
        if p && self.0 < 3 { Self(self.0 + 1) } else { self }
    }

    /// Conditional saturating decrement.
    #[inline]
    pub const fn cond_dec(self, p: bool) -> Self {
        if p && self.0 > 0 { Self(self.0 - 1) } else { self }
    }
}

impl Default for TwoBit {
    /// Weakly not-taken, the traditional cold state.
    fn default() -> Self {
        Self::WEAK_NT
    }
}
