//! Per-voxel status flags.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Status byte attached to every voxel result.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct VoxelFlags(u8);

impl VoxelFlags {
    /// Distortion (X, Y, Z) was extracted.
    pub const DIST_DONE: Self = Self(1 << 0);
    /// Dispersion was extracted and is non-zero.
    pub const DISP_DONE: Self = Self(1 << 1);
    /// A smoothed value is available.
    pub const SMOOTH_DONE: Self = Self(1 << 2);
    /// Voxel is excluded as smoothing input and from the Chebyshev domain.
    pub const KILLED: Self = Self(1 << 3);

    /// No flag set.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bit pattern.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for VoxelFlags {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for VoxelFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for VoxelFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::DIST_DONE, "DistDone"),
            (Self::DISP_DONE, "DispDone"),
            (Self::SMOOTH_DONE, "SmoothDone"),
            (Self::KILLED, "Killed"),
        ];
        let mut list = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}
