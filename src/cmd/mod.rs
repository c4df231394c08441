//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Command recording support: resource usage tracking for passes, and
//! binding of descriptor heaps at draw/dispatch time.
pub mod heaps;
pub mod pass;
