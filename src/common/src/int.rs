//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Integer helpers.
use num_traits::{PrimInt, Unsigned};

/// Extension methods for unsigned binary integers.
pub trait BinaryInteger: PrimInt + Unsigned {
    /// `ceil(log2(self))`. Returns `0` for `0` and `1`.
    fn log2_ceil(self) -> u32 {
        if self <= Self::one() {
            0
        } else {
            Self::zero().count_zeros() - (self - Self::one()).leading_zeros()
        }
    }
}

impl<T: PrimInt + Unsigned> BinaryInteger for T {}
