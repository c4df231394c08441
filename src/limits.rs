//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Hard limits and configurations of the descriptor subsystem.
use zangfx_common::{Error, ErrorKind, Result};

/// The maximum number of CBV/SRV/UAV descriptors in a single bind group.
pub const MAX_VIEWS_PER_BIND_GROUP: u32 = 952;

/// The maximum number of samplers in a single bind group.
pub const MAX_SAMPLERS_PER_BIND_GROUP: u32 = 48;

/// `D3D12_MAX_SHADER_VISIBLE_DESCRIPTOR_HEAP_SIZE_TIER_1`
pub const MAX_SHADER_VISIBLE_VIEW_HEAP_SIZE: u32 = 1_000_000;

/// `D3D12_MAX_SHADER_VISIBLE_SAMPLER_HEAP_SIZE`
pub const MAX_SHADER_VISIBLE_SAMPLER_HEAP_SIZE: u32 = 2048;

/// Configurations of a [`Device`](crate::device::Device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// The number of descriptors in each staging heap for views.
    pub staging_view_heap_size: u32,
    /// The number of descriptors in each staging heap for samplers.
    pub staging_sampler_heap_size: u32,
    pub staging_rtv_heap_size: u32,
    pub staging_dsv_heap_size: u32,

    pub max_views_per_bind_group: u32,
    pub max_samplers_per_bind_group: u32,

    /// The size of the first shader-visible view heap. The size is doubled on
    /// every heap switch until it reaches `max_shader_visible_view_heap_size`.
    pub min_shader_visible_view_heap_size: u32,
    pub max_shader_visible_view_heap_size: u32,
    pub min_shader_visible_sampler_heap_size: u32,
    pub max_shader_visible_sampler_heap_size: u32,

    /// The maximum number of native heaps each staging allocator may create.
    /// Unlimited if `None`.
    pub max_staging_heaps: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            staging_view_heap_size: 1024,
            staging_sampler_heap_size: 1024,
            staging_rtv_heap_size: 64,
            staging_dsv_heap_size: 64,
            max_views_per_bind_group: MAX_VIEWS_PER_BIND_GROUP,
            max_samplers_per_bind_group: MAX_SAMPLERS_PER_BIND_GROUP,
            min_shader_visible_view_heap_size: 1024,
            max_shader_visible_view_heap_size: MAX_SHADER_VISIBLE_VIEW_HEAP_SIZE,
            min_shader_visible_sampler_heap_size: 512,
            max_shader_visible_sampler_heap_size: MAX_SHADER_VISIBLE_SAMPLER_HEAP_SIZE,
            max_staging_heaps: None,
        }
    }
}

fn invalid(detail: &'static str) -> Error {
    Error::with_detail(ErrorKind::NotSupported, detail)
}

impl DeviceConfig {
    /// Construct a `DeviceConfig` with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.staging_view_heap_size == 0
            || self.staging_sampler_heap_size == 0
            || self.staging_rtv_heap_size == 0
            || self.staging_dsv_heap_size == 0
        {
            return Err(invalid("staging heap sizes must be non-zero"));
        }

        if self.max_views_per_bind_group > MAX_VIEWS_PER_BIND_GROUP {
            return Err(invalid("max_views_per_bind_group: too large"));
        }
        if self.max_samplers_per_bind_group > MAX_SAMPLERS_PER_BIND_GROUP {
            return Err(invalid("max_samplers_per_bind_group: too large"));
        }

        // A bind group's table must fit in a single shader-visible heap
        if self.min_shader_visible_view_heap_size < self.max_views_per_bind_group
            || self.min_shader_visible_view_heap_size == 0
        {
            return Err(invalid("min_shader_visible_view_heap_size: too small"));
        }
        if self.min_shader_visible_sampler_heap_size < self.max_samplers_per_bind_group
            || self.min_shader_visible_sampler_heap_size == 0
        {
            return Err(invalid("min_shader_visible_sampler_heap_size: too small"));
        }

        if self.max_shader_visible_view_heap_size < self.min_shader_visible_view_heap_size
            || self.max_shader_visible_view_heap_size > MAX_SHADER_VISIBLE_VIEW_HEAP_SIZE
        {
            return Err(invalid("max_shader_visible_view_heap_size: out of range"));
        }
        if self.max_shader_visible_sampler_heap_size < self.min_shader_visible_sampler_heap_size
            || self.max_shader_visible_sampler_heap_size > MAX_SHADER_VISIBLE_SAMPLER_HEAP_SIZE
        {
            return Err(invalid("max_shader_visible_sampler_heap_size: out of range"));
        }

        if self.max_staging_heaps == Some(0) {
            return Err(invalid("max_staging_heaps: must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        DeviceConfig::new().validate().unwrap();
    }

    #[test]
    fn invalid_values() {
        let mut config = DeviceConfig::new();
        config.max_shader_visible_sampler_heap_size = 4096;
        assert_eq!(
            config.validate().unwrap_err().kind(),
            ErrorKind::NotSupported
        );

        let mut config = DeviceConfig::new();
        config.min_shader_visible_view_heap_size = 16;
        assert!(config.validate().is_err());

        let mut config = DeviceConfig::new();
        config.staging_dsv_heap_size = 0;
        assert!(config.validate().is_err());
    }
}
