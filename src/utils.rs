//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use crate::buffer::BufferUsageFlags;
use crate::image::TextureUsageFlags;
use crate::native::ResourceStates;
use crate::sampler::{AddressMode, BorderColor, CmpFn, Filter, MipmapMode};
use crate::subresource::Aspects;

const FILTER_TYPE_POINT: u32 = 0;
const FILTER_TYPE_LINEAR: u32 = 1;
const FILTER_REDUCTION_TYPE_STANDARD: u32 = 0;
const FILTER_REDUCTION_TYPE_COMPARISON: u32 = 1;
const ANISOTROPIC_FILTERING_BIT: u32 = 0x40;

/// `D3D12_ENCODE_BASIC_FILTER`
fn encode_basic_filter(min: u32, mag: u32, mip: u32, reduction: u32) -> u32 {
    ((min & 3) << 4) | ((mag & 3) << 2) | (mip & 3) | ((reduction & 3) << 7)
}

fn translate_filter_type(value: Filter) -> u32 {
    match value {
        Filter::Nearest => FILTER_TYPE_POINT,
        Filter::Linear => FILTER_TYPE_LINEAR,
    }
}

/// Compute a `D3D12_FILTER` value.
///
/// Anisotropic filtering overrides all three filter types.
pub fn translate_filter(
    min: Filter,
    mag: Filter,
    mip: MipmapMode,
    comparison: bool,
    max_anisotropy: u32,
) -> u32 {
    let reduction = if comparison {
        FILTER_REDUCTION_TYPE_COMPARISON
    } else {
        FILTER_REDUCTION_TYPE_STANDARD
    };
    if max_anisotropy > 1 {
        ANISOTROPIC_FILTERING_BIT
            | encode_basic_filter(
                FILTER_TYPE_LINEAR,
                FILTER_TYPE_LINEAR,
                FILTER_TYPE_LINEAR,
                reduction,
            )
    } else {
        let mip = match mip {
            MipmapMode::Nearest => FILTER_TYPE_POINT,
            MipmapMode::Linear => FILTER_TYPE_LINEAR,
        };
        encode_basic_filter(
            translate_filter_type(min),
            translate_filter_type(mag),
            mip,
            reduction,
        )
    }
}

/// Compute a `D3D12_TEXTURE_ADDRESS_MODE` value.
pub fn translate_address_mode(value: AddressMode) -> u32 {
    match value {
        AddressMode::Repeat => 1,
        AddressMode::MirroredRepeat => 2,
        AddressMode::ClampToEdge => 3,
        AddressMode::ClampToBorderColor => 4,
        AddressMode::MirroredClampToEdge => 5,
    }
}

/// Compute a `D3D12_COMPARISON_FUNC` value.
pub fn translate_cmp_fn(value: CmpFn) -> u32 {
    match value {
        CmpFn::Never => 1,
        CmpFn::Less => 2,
        CmpFn::Equal => 3,
        CmpFn::LessEqual => 4,
        CmpFn::Greater => 5,
        CmpFn::NotEqual => 6,
        CmpFn::GreaterEqual => 7,
        CmpFn::Always => 8,
    }
}

pub fn translate_border_color(value: BorderColor) -> [f32; 4] {
    match value {
        BorderColor::FloatTransparentBlack => [0.0, 0.0, 0.0, 0.0],
        BorderColor::FloatOpaqueBlack => [0.0, 0.0, 0.0, 1.0],
        BorderColor::FloatOpaqueWhite => [1.0, 1.0, 1.0, 1.0],
    }
}

/// Translate a texture usage to the native state it requires.
///
/// `aspects` is the set of the texture's aspects; a render attachment with a
/// depth or stencil aspect is a depth-stencil target.
///
/// Panics if `PRESENT` is combined with another usage.
pub fn translate_texture_usage(usage: TextureUsageFlags, aspects: Aspects) -> ResourceStates {
    if usage.contains(TextureUsageFlags::PRESENT) {
        assert_eq!(
            usage,
            TextureUsageFlags::PRESENT,
            "PRESENT cannot be combined with other usages"
        );
        return ResourceStates::PRESENT;
    }

    let mut states = ResourceStates::COMMON;
    if usage.contains(TextureUsageFlags::COPY_READ) {
        states |= ResourceStates::COPY_SOURCE;
    }
    if usage.contains(TextureUsageFlags::COPY_WRITE) {
        states |= ResourceStates::COPY_DEST;
    }
    if usage.intersects(TextureUsageFlags::SAMPLED | TextureUsageFlags::STORAGE_READ) {
        states |= ResourceStates::ALL_SHADER_RESOURCE;
    }
    if usage.contains(TextureUsageFlags::STORAGE) {
        states |= ResourceStates::UNORDERED_ACCESS;
    }
    if usage.contains(TextureUsageFlags::RENDER) {
        if aspects.intersects(Aspects::DEPTH | Aspects::STENCIL) {
            states |= ResourceStates::DEPTH_WRITE;
        } else {
            states |= ResourceStates::RENDER_TARGET;
        }
    }
    if usage.contains(TextureUsageFlags::RENDER_READ) {
        states |= ResourceStates::DEPTH_READ;
    }
    states
}

/// Translate a buffer usage to the native state it requires.
pub fn translate_buffer_usage(usage: BufferUsageFlags) -> ResourceStates {
    let mut states = ResourceStates::COMMON;
    if usage.contains(BufferUsageFlags::COPY_READ) {
        states |= ResourceStates::COPY_SOURCE;
    }
    if usage.intersects(BufferUsageFlags::COPY_WRITE | BufferUsageFlags::QUERY_RESOLVE) {
        states |= ResourceStates::COPY_DEST;
    }
    if usage.intersects(BufferUsageFlags::VERTEX | BufferUsageFlags::UNIFORM) {
        states |= ResourceStates::VERTEX_AND_CONSTANT_BUFFER;
    }
    if usage.contains(BufferUsageFlags::INDEX) {
        states |= ResourceStates::INDEX_BUFFER;
    }
    if usage.contains(BufferUsageFlags::STORAGE) {
        states |= ResourceStates::UNORDERED_ACCESS;
    }
    if usage.contains(BufferUsageFlags::STORAGE_READ) {
        states |= ResourceStates::ALL_SHADER_RESOURCE;
    }
    if usage.contains(BufferUsageFlags::INDIRECT_DRAW) {
        states |= ResourceStates::INDIRECT_ARGUMENT;
    }
    states
}
