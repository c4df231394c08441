//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! # ZanGFX Common: Utilities
pub use num_traits;

mod error;
mod int;
mod serial;
pub use self::error::*;
pub use self::int::*;
pub use self::serial::*;
