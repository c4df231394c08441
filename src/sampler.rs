//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Sampler objects.
//!
//! Creating a sampler does not touch the native device. A sampler is a
//! translated [`SamplerDesc`] plus a process-unique identity; its descriptor is
//! written into a staging heap only when a bind group referencing it is
//! created (see [`crate::arg::samplercache`]).
use snowflake::ProcessUniqueId;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

use crate::utils::{
    translate_address_mode, translate_border_color, translate_cmp_fn, translate_filter,
};
use zangfx_common::{Error, ErrorKind, Result};

/// The maximum anisotropy supported by the native API.
pub const MAX_ANISOTROPY: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MipmapMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorderColor,
    MirroredClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpFn {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    FloatTransparentBlack,
    FloatOpaqueBlack,
    FloatOpaqueWhite,
}

/// A native sampler descriptor (`D3D12_SAMPLER_DESC`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// `D3D12_FILTER`
    pub filter: u32,
    /// `D3D12_TEXTURE_ADDRESS_MODE` for U, V, and W.
    pub address_mode: [u32; 3],
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    /// `D3D12_COMPARISON_FUNC`
    pub comparison_func: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

/// Builds a [`Sampler`].
#[derive(Debug, Clone)]
pub struct SamplerBuilder {
    mag_filter: Filter,
    min_filter: Filter,
    address_mode: [AddressMode; 3],
    mipmap_mode: MipmapMode,
    lod_clamp: Range<f32>,
    max_anisotropy: u32,
    cmp_fn: Option<CmpFn>,
    border_color: BorderColor,
    unnorm_coords: bool,
    label: Option<String>,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            address_mode: [AddressMode::Repeat; 3],
            mipmap_mode: MipmapMode::Linear,
            lod_clamp: 0.0..0.0,
            max_anisotropy: 1,
            cmp_fn: None,
            border_color: BorderColor::FloatTransparentBlack,
            unnorm_coords: false,
            label: None,
        }
    }
}

impl SamplerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mag_filter(&mut self, v: Filter) -> &mut Self {
        self.mag_filter = v;
        self
    }

    pub fn min_filter(&mut self, v: Filter) -> &mut Self {
        self.min_filter = v;
        self
    }

    /// Set the address modes for U, V, and W. Missing elements are filled
    /// with the last one.
    pub fn address_mode(&mut self, v: &[AddressMode]) -> &mut Self {
        let pad = v.last().cloned().unwrap_or(AddressMode::Repeat);
        for (i, mode) in self.address_mode.iter_mut().enumerate() {
            *mode = v.get(i).cloned().unwrap_or(pad);
        }
        self
    }

    pub fn mipmap_mode(&mut self, v: MipmapMode) -> &mut Self {
        self.mipmap_mode = v;
        self
    }

    pub fn lod_clamp(&mut self, v: Range<f32>) -> &mut Self {
        self.lod_clamp = v;
        self
    }

    pub fn max_anisotropy(&mut self, v: u32) -> &mut Self {
        self.max_anisotropy = v;
        self
    }

    pub fn cmp_fn(&mut self, v: Option<CmpFn>) -> &mut Self {
        self.cmp_fn = v;
        self
    }

    pub fn border_color(&mut self, v: BorderColor) -> &mut Self {
        self.border_color = v;
        self
    }

    pub fn unnorm_coords(&mut self, v: bool) -> &mut Self {
        self.unnorm_coords = v;
        self
    }

    pub fn label(&mut self, v: &str) -> &mut Self {
        self.label = Some(v.to_owned());
        self
    }

    pub fn build(&mut self) -> Result<SamplerRef> {
        if self.unnorm_coords {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                "unnormalized sampler coordinates",
            ));
        }
        if self.max_anisotropy == 0 || self.max_anisotropy > MAX_ANISOTROPY {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                format!("max_anisotropy = {}", self.max_anisotropy),
            ));
        }
        if !(self.lod_clamp.start <= self.lod_clamp.end) {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                format!("lod_clamp = {:?}", self.lod_clamp),
            ));
        }

        let desc = SamplerDesc {
            filter: translate_filter(
                self.min_filter,
                self.mag_filter,
                self.mipmap_mode,
                self.cmp_fn.is_some(),
                self.max_anisotropy,
            ),
            address_mode: [
                translate_address_mode(self.address_mode[0]),
                translate_address_mode(self.address_mode[1]),
                translate_address_mode(self.address_mode[2]),
            ],
            mip_lod_bias: 0.0,
            max_anisotropy: self.max_anisotropy,
            comparison_func: translate_cmp_fn(self.cmp_fn.unwrap_or(CmpFn::Never)),
            border_color: translate_border_color(self.border_color),
            min_lod: self.lod_clamp.start,
            max_lod: self.lod_clamp.end,
        };

        Ok(Arc::new(Sampler {
            id: SamplerId(ProcessUniqueId::new()),
            desc,
            label: self.label.clone(),
        }))
    }
}

/// The identity of a sampler object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SamplerId(ProcessUniqueId);

/// A sampler object.
///
/// Equality and hashing are by identity. Two samplers built from identical
/// parameters are distinct.
#[derive(Debug)]
pub struct Sampler {
    id: SamplerId,
    desc: SamplerDesc,
    label: Option<String>,
}

pub type SamplerRef = Arc<Sampler>;

impl Sampler {
    pub fn id(&self) -> SamplerId {
        self.id
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(String::as_str)
    }
}

impl PartialEq for Sampler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Sampler {}

impl Hash for Sampler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_contents() {
        let a = SamplerBuilder::new().build().unwrap();
        let b = SamplerBuilder::new().build().unwrap();
        assert_eq!(a.desc(), b.desc());
        assert_ne!(*a, *b);
        assert_eq!(*a, *a.clone());
    }

    #[test]
    fn address_mode_padding() {
        let s = SamplerBuilder::new()
            .address_mode(&[AddressMode::ClampToEdge, AddressMode::MirroredRepeat])
            .build()
            .unwrap();
        assert_eq!(
            s.desc().address_mode,
            [
                translate_address_mode(AddressMode::ClampToEdge),
                translate_address_mode(AddressMode::MirroredRepeat),
                translate_address_mode(AddressMode::MirroredRepeat),
            ]
        );
    }

    #[test]
    fn unsupported_parameters() {
        let e = SamplerBuilder::new().unnorm_coords(true).build().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
        let e = SamplerBuilder::new().max_anisotropy(32).build().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
        let e = SamplerBuilder::new().lod_clamp(4.0..1.0).build().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn label() {
        let s = SamplerBuilder::new().label("linear clamp").build().unwrap();
        assert_eq!(s.label(), Some("linear clamp"));
    }
}
