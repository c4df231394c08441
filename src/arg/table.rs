//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Bind groups.
use parking_lot::Mutex;
use std::sync::Arc;

use super::layout::{BindGroupLayoutRef, BindingPlacement, TableKind};
use super::samplercache::{SamplerHeapCache, SamplerHeapCacheEntry};
use super::shadervisible::{GpuDescriptorAllocation, ShaderVisibleDescriptorAllocator};
use super::staging::{OwnedCpuAllocation, StagingBuckets};
use super::{BindingType, DescriptorRangeType};
use crate::buffer::BufferRef;
use crate::image::TextureRef;
use crate::native::{DescriptorHeapType, GpuDescriptorHandle, NativeDeviceRef, ViewDesc};
use crate::sampler::SamplerRef;
use crate::subresource::SubresourceRange;
use zangfx_common::{Result, Serial};

#[derive(Debug, Clone)]
pub enum BindingResource {
    Buffer {
        buffer: BufferRef,
        offset: u64,
        size: u64,
    },
    Sampler(SamplerRef),
    Texture {
        texture: TextureRef,
        range: SubresourceRange,
    },
}

#[derive(Debug, Clone)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

/// A buffer bound as a root descriptor.
#[derive(Debug, Clone)]
pub struct DynamicBufferBinding {
    pub binding: u32,
    pub ty: DescriptorRangeType,
    pub buffer: BufferRef,
    pub offset: u64,
    pub size: u64,
}

/// A set of resources bound together, laid out according to a
/// [`BindGroupLayout`](super::layout::BindGroupLayout).
#[derive(Debug)]
pub struct BindGroup {
    layout: BindGroupLayoutRef,
    /// Sorted by binding number.
    entries: Vec<BindGroupEntry>,
    dynamic_buffers: Vec<DynamicBufferBinding>,
    device: NativeDeviceRef,
    cpu_views: Option<OwnedCpuAllocation>,
    gpu_views: Mutex<Option<GpuDescriptorAllocation>>,
    samplers: Option<Arc<SamplerHeapCacheEntry>>,
}

pub type BindGroupRef = Arc<BindGroup>;

impl BindGroup {
    /// Construct a `BindGroup`, writing its view descriptors into a block from
    /// `view_allocators` and obtaining its sampler table from
    /// `sampler_cache`.
    ///
    /// Panics if `entries` does not match `layout`. On failure, every
    /// descriptor block allocated so far is released.
    pub fn new(
        device: &NativeDeviceRef,
        view_allocators: &StagingBuckets,
        sampler_cache: &Arc<SamplerHeapCache>,
        layout: &BindGroupLayoutRef,
        entries: &[BindGroupEntry],
    ) -> Result<BindGroupRef> {
        let mut entries = entries.to_vec();
        entries.sort_by_key(|e| e.binding);
        let plan = layout.plan();
        assert_eq!(
            entries.len(),
            layout.entries().len(),
            "the number of entries does not match the layout"
        );

        let cpu_views = view_allocators.allocate(plan.num_view_descriptors())?;
        let mut samplers = Vec::with_capacity(plan.num_sampler_descriptors() as usize);
        let mut dynamic_buffers = Vec::new();

        for (entry, layout_entry) in entries.iter().zip(layout.entries().iter()) {
            assert_eq!(entry.binding, layout_entry.binding, "binding mismatch");
            let placement = plan
                .placement(entry.binding)
                .expect("every layout entry has a placement");

            match *placement {
                BindingPlacement::RootDescriptor { ty, .. } => match entry.resource {
                    BindingResource::Buffer {
                        ref buffer,
                        offset,
                        size,
                    } => dynamic_buffers.push(DynamicBufferBinding {
                        binding: entry.binding,
                        ty,
                        buffer: buffer.clone(),
                        offset,
                        size,
                    }),
                    _ => panic!("binding {}: a buffer is required", entry.binding),
                },
                BindingPlacement::Table {
                    table: TableKind::Sampler,
                    offset,
                    ..
                } => match entry.resource {
                    BindingResource::Sampler(ref sampler) => {
                        debug_assert_eq!(offset as usize, samplers.len());
                        samplers.push(sampler.clone());
                    }
                    _ => panic!("binding {}: a sampler is required", entry.binding),
                },
                BindingPlacement::Table {
                    table: TableKind::View,
                    ty,
                    offset,
                    ..
                } => {
                    let desc = view_desc(entry, layout_entry.ty, ty);
                    let allocation = cpu_views
                        .as_ref()
                        .expect("a view table has at least one descriptor");
                    device.create_view(&desc, allocation.offset_from(offset));
                }
            }
        }

        let samplers = if samplers.is_empty() {
            None
        } else {
            Some(sampler_cache.get_or_create(&samplers)?)
        };

        Ok(Arc::new(BindGroup {
            layout: layout.clone(),
            entries,
            dynamic_buffers,
            device: device.clone(),
            cpu_views,
            gpu_views: Mutex::new(None),
            samplers,
        }))
    }

    pub fn layout(&self) -> &BindGroupLayoutRef {
        &self.layout
    }

    pub fn entries(&self) -> &[BindGroupEntry] {
        &self.entries
    }

    pub fn dynamic_buffers(&self) -> &[DynamicBufferBinding] {
        &self.dynamic_buffers
    }

    pub fn cpu_views(&self) -> Option<&OwnedCpuAllocation> {
        self.cpu_views.as_ref()
    }

    pub fn sampler_entry(&self) -> Option<&Arc<SamplerHeapCacheEntry>> {
        self.samplers.as_ref()
    }

    /// The location of the view table in the shader-visible heap, valid after
    /// a successful `populate_views`.
    pub fn base_view_gpu_descriptor(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_views.lock().map(|a| a.base_gpu_descriptor())
    }

    pub fn base_sampler_gpu_descriptor(&self) -> Option<GpuDescriptorHandle> {
        self.samplers.as_ref()?.base_gpu_descriptor()
    }

    /// Copy the view table into `allocator`'s current heap for the command
    /// list `pending`, unless it is already there. Returns `false` if
    /// `allocator` is full.
    pub fn populate_views(
        &self,
        pending: Serial,
        allocator: &mut ShaderVisibleDescriptorAllocator,
    ) -> bool {
        let cpu_views = match self.cpu_views {
            Some(ref x) => x,
            None => return true,
        };

        let mut gpu_views = self.gpu_views.lock();
        if let Some(ref existing) = *gpu_views {
            if allocator.is_allocation_still_valid(existing, pending) {
                return true;
            }
        }

        let count = self.layout.plan().num_view_descriptors();
        let allocation = match allocator.allocate_gpu_descriptors(count, pending) {
            Some(x) => x,
            None => return false,
        };
        self.device.copy_descriptors(
            count,
            allocation.base_cpu_descriptor(),
            cpu_views.base_descriptor(),
            DescriptorHeapType::CbvSrvUav,
        );
        *gpu_views = Some(allocation);
        true
    }

    /// Like `populate_views`, but for the sampler table. The table is shared
    /// with every bind group using the same samplers.
    pub fn populate_samplers(
        &self,
        pending: Serial,
        allocator: &mut ShaderVisibleDescriptorAllocator,
    ) -> bool {
        match self.samplers {
            Some(ref entry) => entry.materialize(pending, allocator),
            None => true,
        }
    }
}

fn view_desc(entry: &BindGroupEntry, binding_ty: BindingType, ty: DescriptorRangeType) -> ViewDesc {
    match (&entry.resource, binding_ty) {
        (
            &BindingResource::Buffer {
                ref buffer,
                offset,
                size,
            },
            BindingType::Buffer { .. },
        ) => {
            assert!(
                offset.checked_add(size).map_or(false, |end| end <= buffer.size()),
                "binding {}: buffer range out of bounds",
                entry.binding
            );
            let resource = buffer.id();
            match ty {
                DescriptorRangeType::Cbv => ViewDesc::ConstantBuffer {
                    resource,
                    offset,
                    size,
                },
                DescriptorRangeType::Srv => ViewDesc::BufferSrv {
                    resource,
                    offset,
                    size,
                },
                DescriptorRangeType::Uav => ViewDesc::BufferUav {
                    resource,
                    offset,
                    size,
                },
                DescriptorRangeType::Sampler => unreachable!(),
            }
        }
        (
            &BindingResource::Texture {
                ref texture,
                range,
            },
            BindingType::Texture | BindingType::StorageTexture { .. },
        ) => {
            assert!(
                texture.full_range().contains(&range),
                "binding {}: subresource range out of bounds",
                entry.binding
            );
            let resource = texture.id();
            match ty {
                DescriptorRangeType::Srv => ViewDesc::TextureSrv { resource, range },
                DescriptorRangeType::Uav => ViewDesc::TextureUav { resource, range },
                DescriptorRangeType::Cbv | DescriptorRangeType::Sampler => unreachable!(),
            }
        }
        _ => panic!(
            "binding {}: resource does not match {:?}",
            entry.binding, binding_ty
        ),
    }
}
