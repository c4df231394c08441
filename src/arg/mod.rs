//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Descriptor management: bind group layouts, bind groups, and the
//! allocators backing them.
//!
//! Descriptors are first written into CPU-only *staging* heaps
//! ([`staging`]) when a bind group is created, and copied into a
//! *shader-visible* heap ([`shadervisible`]) when the bind group is used by a
//! draw or dispatch. Sampler tables are deduplicated by [`samplercache`].
use std::fmt;
use std::ops::{Index, IndexMut};
use tracing::debug;

use crate::native::{
    CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle, NativeDeviceRef, NativeHeap,
    NativeHeapDesc,
};
use zangfx_common::Result;

pub mod layout;
pub mod ring;
pub mod samplercache;
pub mod shadervisible;
pub mod staging;
pub mod table;

/// The type of a descriptor range (`D3D12_DESCRIPTOR_RANGE_TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    Cbv,
    Srv,
    Uav,
    Sampler,
}

impl DescriptorRangeType {
    /// The heap type descriptors of this range type live in.
    pub fn heap_type(self) -> DescriptorHeapType {
        match self {
            DescriptorRangeType::Cbv | DescriptorRangeType::Srv | DescriptorRangeType::Uav => {
                DescriptorHeapType::CbvSrvUav
            }
            DescriptorRangeType::Sampler => DescriptorHeapType::Sampler,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferBindingType {
    Uniform,
    Storage,
    ReadOnlyStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTextureAccess {
    WriteOnly,
    ReadWrite,
    ReadOnly,
}

/// The kind of resource a binding accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    Buffer {
        ty: BufferBindingType,
        /// Dynamic-offset buffers are bound as root descriptors and do not
        /// occupy a slot in a descriptor table.
        has_dynamic_offset: bool,
    },
    Sampler,
    Texture,
    StorageTexture {
        access: StorageTextureAccess,
    },
}

fn translate_descriptor_range_type(ty: BindingType) -> DescriptorRangeType {
    match ty {
        BindingType::Buffer { ty, .. } => match ty {
            BufferBindingType::Uniform => DescriptorRangeType::Cbv,
            BufferBindingType::Storage => DescriptorRangeType::Uav,
            BufferBindingType::ReadOnlyStorage => DescriptorRangeType::Srv,
        },
        BindingType::Sampler => DescriptorRangeType::Sampler,
        BindingType::Texture => DescriptorRangeType::Srv,
        BindingType::StorageTexture { access } => match access {
            StorageTextureAccess::WriteOnly | StorageTextureAccess::ReadWrite => {
                DescriptorRangeType::Uav
            }
            StorageTextureAccess::ReadOnly => DescriptorRangeType::Srv,
        },
    }
}

/// Maintains the number of descriptors for each descriptor range type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorCount([u32; 4]);

impl DescriptorCount {
    pub fn new() -> Self {
        Default::default()
    }

    /// The number of descriptors living in `CbvSrvUav` heaps.
    pub fn num_views(&self) -> u32 {
        self[DescriptorRangeType::Cbv]
            + self[DescriptorRangeType::Srv]
            + self[DescriptorRangeType::Uav]
    }

    pub fn num_samplers(&self) -> u32 {
        self[DescriptorRangeType::Sampler]
    }
}

fn range_type_index(ty: DescriptorRangeType) -> usize {
    match ty {
        DescriptorRangeType::Cbv => 0,
        DescriptorRangeType::Srv => 1,
        DescriptorRangeType::Uav => 2,
        DescriptorRangeType::Sampler => 3,
    }
}

impl Index<DescriptorRangeType> for DescriptorCount {
    type Output = u32;

    fn index(&self, index: DescriptorRangeType) -> &u32 {
        &self.0[range_type_index(index)]
    }
}

impl IndexMut<DescriptorRangeType> for DescriptorCount {
    fn index_mut(&mut self, index: DescriptorRangeType) -> &mut u32 {
        &mut self.0[range_type_index(index)]
    }
}

/// An owned native descriptor heap. Destroyed on drop.
pub struct DescriptorHeap {
    device: NativeDeviceRef,
    heap: NativeHeap,
    desc: NativeHeapDesc,
    increment: u32,
}

impl fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("heap", &self.heap)
            .field("desc", &self.desc)
            .finish()
    }
}

impl DescriptorHeap {
    pub fn new(device: &NativeDeviceRef, desc: NativeHeapDesc) -> Result<Self> {
        let heap = device.create_descriptor_heap(&desc)?;
        debug!(
            ty = ?desc.ty,
            num_descriptors = desc.num_descriptors,
            shader_visible = desc.shader_visible,
            "created a descriptor heap"
        );
        Ok(Self {
            increment: device.descriptor_increment(desc.ty),
            device: device.clone(),
            heap,
            desc,
        })
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.desc.ty
    }

    pub fn num_descriptors(&self) -> u32 {
        self.desc.num_descriptors
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn native_heap(&self) -> &NativeHeap {
        &self.heap
    }

    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        debug_assert!(index < self.desc.num_descriptors);
        self.heap.cpu_start.offset(index, self.increment)
    }

    /// Returns `None` if the heap is not shader-visible.
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
        debug_assert!(index < self.desc.num_descriptors);
        self.heap.gpu_start.map(|h| h.offset(index, self.increment))
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(&self.heap);
    }
}
