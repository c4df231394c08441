//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The boundary between this backend core and the native graphics API.
//!
//! Nothing in this crate talks to the platform directly. Every native
//! operation the descriptor allocators and the sampler cache need goes through
//! [`NativeDevice`]. A Direct3D 12 implementation forwards these calls to
//! `ID3D12Device`; [`crate::null::NullDevice`] implements them in host memory.
use bitflags::bitflags;
use snowflake::ProcessUniqueId;
use std::fmt;
use std::sync::Arc;

use crate::sampler::SamplerDesc;
use crate::subresource::SubresourceRange;
use zangfx_common::Result;

bitflags! {
    /// Native resource states. Mirrors `D3D12_RESOURCE_STATES`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;

        const ALL_SHADER_RESOURCE =
            Self::NON_PIXEL_SHADER_RESOURCE.bits() | Self::PIXEL_SHADER_RESOURCE.bits();
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
        const PRESENT = 0;
    }
}

impl ResourceStates {
    /// Read-only states a non-simultaneous-access texture can be implicitly
    /// promoted to from `COMMON`.
    pub const PROMOTABLE_READ_ONLY: Self = Self::from_bits_truncate(
        Self::COPY_SOURCE.bits() | Self::ALL_SHADER_RESOURCE.bits(),
    );
}

/// Identifies a resource (texture or buffer) for the purpose of barrier
/// emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(ProcessUniqueId);

impl ResourceId {
    pub fn new() -> Self {
        ResourceId(ProcessUniqueId::new())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

impl DescriptorHeapType {
    /// Only these two types can be bound to the pipeline.
    pub fn can_be_shader_visible(self) -> bool {
        match self {
            DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler => true,
            DescriptorHeapType::Rtv | DescriptorHeapType::Dsv => false,
        }
    }
}

/// A CPU descriptor handle (`D3D12_CPU_DESCRIPTOR_HANDLE`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuDescriptorHandle(pub usize);

impl CpuDescriptorHandle {
    /// The handle `index` descriptors past `self`.
    pub fn offset(self, index: u32, increment: u32) -> Self {
        CpuDescriptorHandle(self.0 + index as usize * increment as usize)
    }
}

impl fmt::Debug for CpuDescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuDescriptorHandle({:#x})", self.0)
    }
}

/// A GPU descriptor handle (`D3D12_GPU_DESCRIPTOR_HANDLE`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        GpuDescriptorHandle(self.0 + index as u64 * increment as u64)
    }
}

impl fmt::Debug for GpuDescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuDescriptorHandle({:#x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHeapDesc {
    pub ty: DescriptorHeapType,
    pub num_descriptors: u32,
    pub shader_visible: bool,
}

/// A native descriptor heap as returned by [`NativeDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHeap {
    /// An opaque value identifying the heap to the native device.
    pub raw: u64,
    pub cpu_start: CpuDescriptorHandle,
    /// `Some(_)` iff the heap was created shader-visible.
    pub gpu_start: Option<GpuDescriptorHandle>,
}

/// The contents of a view descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewDesc {
    ConstantBuffer {
        resource: ResourceId,
        offset: u64,
        size: u64,
    },
    BufferSrv {
        resource: ResourceId,
        offset: u64,
        size: u64,
    },
    BufferUav {
        resource: ResourceId,
        offset: u64,
        size: u64,
    },
    TextureSrv {
        resource: ResourceId,
        range: SubresourceRange,
    },
    TextureUav {
        resource: ResourceId,
        range: SubresourceRange,
    },
    RenderTarget {
        resource: ResourceId,
        mip_level: u32,
        base_array_layer: u32,
        layer_count: u32,
    },
    DepthStencil {
        resource: ResourceId,
        mip_level: u32,
        base_array_layer: u32,
        layer_count: u32,
        read_only_depth: bool,
        read_only_stencil: bool,
    },
}

/// The native graphics device, as seen by the descriptor allocators.
pub trait NativeDevice: fmt::Debug + Send + Sync {
    /// The distance in bytes between two adjacent descriptors of the given
    /// type.
    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32;

    fn create_descriptor_heap(&self, desc: &NativeHeapDesc) -> Result<NativeHeap>;

    /// Destroy a heap created by `create_descriptor_heap`. The caller
    /// guarantees the GPU no longer references it.
    fn destroy_descriptor_heap(&self, heap: &NativeHeap);

    fn create_view(&self, desc: &ViewDesc, dest: CpuDescriptorHandle);

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptorHandle);

    /// Copy `count` contiguous descriptors (`CopyDescriptorsSimple`).
    fn copy_descriptors(
        &self,
        count: u32,
        dest: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    );
}

pub type NativeDeviceRef = Arc<dyn NativeDevice>;
