//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The device context.
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

use crate::arg::layout::{BindGroupLayoutBuilder, BindGroupLayoutRef};
use crate::arg::samplercache::SamplerHeapCache;
use crate::arg::shadervisible::ShaderVisibleDescriptorAllocator;
use crate::arg::staging::{StagingAllocatorRef, StagingBuckets, StagingDescriptorAllocator};
use crate::arg::table::{BindGroup, BindGroupEntry, BindGroupRef};
use crate::buffer::BufferBuilder;
use crate::cmd::heaps::{ApplyResult, DescriptorHeapBinder};
use crate::image::{TextureBuilder, TextureRef};
use crate::limits::DeviceConfig;
use crate::native::{CpuDescriptorHandle, DescriptorHeapType, NativeDeviceRef, ViewDesc};
use crate::sampler::SamplerBuilder;
use crate::subresource::Aspects;
use zangfx_common::{Result, Serial};

#[derive(Debug, Clone, Copy)]
struct Serials {
    /// The serial of the command list being recorded.
    pending: Serial,
    /// The latest serial known to have finished execution.
    completed: Serial,
}

/// Owns the native device, every descriptor allocator, and the sampler cache.
#[derive(Debug)]
pub struct Device {
    native: NativeDeviceRef,
    config: DeviceConfig,
    view_allocators: StagingBuckets,
    sampler_cache: Arc<SamplerHeapCache>,
    rtv_allocator: StagingAllocatorRef,
    dsv_allocator: StagingAllocatorRef,
    view_heap: Mutex<ShaderVisibleDescriptorAllocator>,
    sampler_heap: Mutex<ShaderVisibleDescriptorAllocator>,
    serials: Mutex<Serials>,
}

pub type DeviceRef = Arc<Device>;

impl Device {
    /// Construct a `Device`.
    ///
    /// Fails and returns `Err(_)` if the configuration fails validation or
    /// the initial shader-visible heaps could not be created.
    pub fn new(native: NativeDeviceRef, config: DeviceConfig) -> Result<DeviceRef> {
        config.validate()?;

        let view_allocators = StagingBuckets::new(
            &native,
            DescriptorHeapType::CbvSrvUav,
            config.max_views_per_bind_group,
            config.staging_view_heap_size,
            config.max_staging_heaps,
        );
        let sampler_cache = SamplerHeapCache::new(
            &native,
            StagingBuckets::new(
                &native,
                DescriptorHeapType::Sampler,
                config.max_samplers_per_bind_group,
                config.staging_sampler_heap_size,
                config.max_staging_heaps,
            ),
        );
        let rtv_allocator = Arc::new(Mutex::new(StagingDescriptorAllocator::new(
            &native,
            DescriptorHeapType::Rtv,
            1,
            config.staging_rtv_heap_size,
            config.max_staging_heaps,
        )));
        let dsv_allocator = Arc::new(Mutex::new(StagingDescriptorAllocator::new(
            &native,
            DescriptorHeapType::Dsv,
            1,
            config.staging_dsv_heap_size,
            config.max_staging_heaps,
        )));

        let view_heap = ShaderVisibleDescriptorAllocator::new(
            &native,
            DescriptorHeapType::CbvSrvUav,
            config.min_shader_visible_view_heap_size,
            config.max_shader_visible_view_heap_size,
        )?;
        let sampler_heap = ShaderVisibleDescriptorAllocator::new(
            &native,
            DescriptorHeapType::Sampler,
            config.min_shader_visible_sampler_heap_size,
            config.max_shader_visible_sampler_heap_size,
        )?;

        debug!(?config, "device created");

        Ok(Arc::new(Self {
            native,
            config,
            view_allocators,
            sampler_cache,
            rtv_allocator,
            dsv_allocator,
            view_heap: Mutex::new(view_heap),
            sampler_heap: Mutex::new(sampler_heap),
            serials: Mutex::new(Serials {
                pending: Serial(1),
                completed: Serial::ZERO,
            }),
        }))
    }

    pub fn native(&self) -> &NativeDeviceRef {
        &self.native
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn view_allocators(&self) -> &StagingBuckets {
        &self.view_allocators
    }

    pub fn sampler_cache(&self) -> &Arc<SamplerHeapCache> {
        &self.sampler_cache
    }

    pub fn rtv_allocator(&self) -> &StagingAllocatorRef {
        &self.rtv_allocator
    }

    pub fn dsv_allocator(&self) -> &StagingAllocatorRef {
        &self.dsv_allocator
    }

    /// Lock the shader-visible view (`CbvSrvUav`) allocator.
    ///
    /// When both shader-visible allocators are needed, lock the view
    /// allocator first.
    pub fn view_heap(&self) -> MutexGuard<'_, ShaderVisibleDescriptorAllocator> {
        self.view_heap.lock()
    }

    /// Lock the shader-visible sampler allocator.
    pub fn sampler_heap(&self) -> MutexGuard<'_, ShaderVisibleDescriptorAllocator> {
        self.sampler_heap.lock()
    }

    /// The serial of the command list being recorded.
    pub fn pending_serial(&self) -> Serial {
        self.serials.lock().pending
    }

    /// The latest serial known to have finished execution on the GPU.
    pub fn completed_serial(&self) -> Serial {
        self.serials.lock().completed
    }

    /// Close the command list being recorded. Returns its serial, which the
    /// caller signals on a fence after submission.
    pub fn submit(&self) -> Serial {
        let mut serials = self.serials.lock();
        let submitted = serials.pending;
        serials.pending = submitted.next();
        submitted
    }

    /// Record that every command list up to `completed` has finished
    /// execution, and reclaim the descriptors they used.
    ///
    /// Panics if `completed` was never submitted.
    pub fn tick(&self, completed: Serial) {
        {
            let mut serials = self.serials.lock();
            assert!(
                completed < serials.pending,
                "{:?} has not been submitted yet",
                completed
            );
            if completed <= serials.completed {
                return;
            }
            serials.completed = completed;
        }

        self.rtv_allocator.lock().tick(completed);
        self.dsv_allocator.lock().tick(completed);
        self.view_heap.lock().tick(completed);
        self.sampler_heap.lock().tick(completed);
    }

    pub fn build_texture(&self) -> TextureBuilder {
        TextureBuilder::new()
    }

    pub fn build_buffer(&self) -> BufferBuilder {
        BufferBuilder::new()
    }

    pub fn build_sampler(&self) -> SamplerBuilder {
        SamplerBuilder::new()
    }

    pub fn build_bind_group_layout(&self) -> BindGroupLayoutBuilder {
        BindGroupLayoutBuilder::with_limits(
            self.config.max_views_per_bind_group,
            self.config.max_samplers_per_bind_group,
        )
    }

    /// Create a bind group. See [`BindGroup::new`].
    pub fn create_bind_group(
        &self,
        layout: &BindGroupLayoutRef,
        entries: &[BindGroupEntry],
    ) -> Result<BindGroupRef> {
        BindGroup::new(
            &self.native,
            &self.view_allocators,
            &self.sampler_cache,
            layout,
            entries,
        )
    }

    /// Populate the descriptor tables of `groups` for the command list being
    /// recorded. See [`DescriptorHeapBinder::apply`].
    pub fn apply_bind_groups(
        &self,
        binder: &mut DescriptorHeapBinder,
        groups: &[&BindGroup],
    ) -> Result<ApplyResult> {
        let Serials { pending, completed } = *self.serials.lock();
        let mut view_heap = self.view_heap.lock();
        let mut sampler_heap = self.sampler_heap.lock();
        binder.apply(groups, &mut view_heap, &mut sampler_heap, pending, completed)
    }

    /// Create a render target or depth-stencil view of a texture for use by
    /// the command list being recorded. The descriptor is released when that
    /// command list completes.
    ///
    /// `read_only` is only meaningful for depth-stencil textures.
    ///
    /// Panics if the subresources are out of bounds.
    pub fn create_attachment_view(
        &self,
        texture: &TextureRef,
        mip_level: u32,
        layers: Range<u32>,
        read_only: bool,
    ) -> Result<CpuDescriptorHandle> {
        assert!(mip_level < texture.num_mip_levels(), "mip level out of range");
        assert!(
            layers.start < layers.end && layers.end <= texture.num_layers(),
            "array layers out of range"
        );

        let pending = self.pending_serial();
        let resource = texture.id();
        let layer_count = layers.end - layers.start;

        if texture.is_depth_stencil() {
            let handle = self
                .dsv_allocator
                .lock()
                .allocate_transient_cpu_descriptors(pending)?;
            let aspects = texture.aspects();
            self.native.create_view(
                &ViewDesc::DepthStencil {
                    resource,
                    mip_level,
                    base_array_layer: layers.start,
                    layer_count,
                    read_only_depth: read_only && aspects.contains(Aspects::DEPTH),
                    read_only_stencil: read_only && aspects.contains(Aspects::STENCIL),
                },
                handle,
            );
            Ok(handle)
        } else {
            let handle = self
                .rtv_allocator
                .lock()
                .allocate_transient_cpu_descriptors(pending)?;
            self.native.create_view(
                &ViewDesc::RenderTarget {
                    resource,
                    mip_level,
                    base_array_layer: layers.start,
                    layer_count,
                },
                handle,
            );
            Ok(handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TextureUsageFlags;
    use crate::null::{NullDescriptor, NullDevice};
    use zangfx_common::ErrorKind;

    fn device() -> (Arc<NullDevice>, DeviceRef) {
        let null = Arc::new(NullDevice::new());
        let device = Device::new(null.clone(), DeviceConfig::default()).unwrap();
        (null, device)
    }

    #[test]
    fn serials() {
        let (_null, device) = device();
        assert_eq!(device.pending_serial(), Serial(1));
        assert_eq!(device.completed_serial(), Serial::ZERO);
        assert_eq!(device.submit(), Serial(1));
        assert_eq!(device.pending_serial(), Serial(2));
        device.tick(Serial(1));
        assert_eq!(device.completed_serial(), Serial(1));
    }

    #[test]
    #[should_panic]
    fn tick_beyond_pending() {
        let (_null, device) = device();
        device.tick(Serial(1));
    }

    #[test]
    fn invalid_config() {
        let mut config = DeviceConfig::default();
        config.max_samplers_per_bind_group = 1000;
        let e = Device::new(Arc::new(NullDevice::new()), config).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn attachment_views_are_transient() {
        let (null, device) = device();
        let color = device
            .build_texture()
            .num_layers(4)
            .usage(TextureUsageFlags::RENDER)
            .build()
            .unwrap();
        let depth = device
            .build_texture()
            .aspects(Aspects::DEPTH | Aspects::STENCIL)
            .usage(TextureUsageFlags::RENDER | TextureUsageFlags::RENDER_READ)
            .build()
            .unwrap();

        let rtv = device.create_attachment_view(&color, 0, 1..3, false).unwrap();
        assert_eq!(
            null.descriptor_at(rtv),
            Some(NullDescriptor::View(ViewDesc::RenderTarget {
                resource: color.id(),
                mip_level: 0,
                base_array_layer: 1,
                layer_count: 2,
            }))
        );
        let dsv = device.create_attachment_view(&depth, 0, 0..1, true).unwrap();
        assert_eq!(
            null.descriptor_at(dsv),
            Some(NullDescriptor::View(ViewDesc::DepthStencil {
                resource: depth.id(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
                read_only_depth: true,
                read_only_stencil: true,
            }))
        );

        assert_eq!(device.rtv_allocator().lock().num_allocated_blocks(), 1);
        let serial = device.submit();
        device.tick(serial);
        assert_eq!(device.rtv_allocator().lock().num_allocated_blocks(), 0);
        assert_eq!(device.dsv_allocator().lock().num_allocated_blocks(), 0);
    }
}
