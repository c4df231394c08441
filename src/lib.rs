//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! ZanGFX Direct3D 12 Backend — Resource state tracking and descriptor
//! management for Direct3D 12.
//!
//! Direct3D 12 leaves two chores to the application that other APIs handle
//! internally. This crate implements both of them:
//!
//!  - **Resource states.** Every subresource is in a native state that must
//!    match how the GPU is about to use it. [`image::Texture`] and
//!    [`buffer::Buffer`] track the states and compute the transition
//!    barriers, taking implicit state promotion and decay into account.
//!
//!  - **Descriptors.** Views and samplers are written into CPU-only heaps
//!    when a bind group is created ([`arg::staging`]), and copied into the
//!    shader-visible heaps when it is used ([`arg::shadervisible`],
//!    [`cmd::heaps`]). Identical sampler tables are shared
//!    ([`arg::samplercache`]).
//!
//! The native API is accessed only through the [`native::NativeDevice`]
//! trait. [`null::NullDevice`] implements it in host memory.
//!
pub mod arg;
pub mod buffer;
pub mod cmd;
pub mod device;
pub mod image;
pub mod limits;
pub mod native;
pub mod null;
pub mod resstate;
pub mod sampler;
pub mod subresource;
mod utils;

pub use zangfx_common::{Error, ErrorKind, Result, Serial};
