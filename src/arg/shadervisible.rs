//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Shader-visible descriptor heap allocation.
//!
//! Only one shader-visible heap per heap type can be bound at a time, so all
//! descriptor tables used by a command list are copied into the current heap
//! with a ring allocator. When the heap fills up it is *switched*: replaced
//! with another heap, which invalidates every allocation made from the old
//! one.
//!
//! Heaps are obtained with a two-phase strategy. The first phase starts
//! small and doubles the heap size on each switch, up to a maximum. The second
//! phase recycles maximum-sized heaps through a pool once the GPU is done with
//! them.
use std::collections::VecDeque;
use tracing::debug;

use super::ring::RingBufferAllocator;
use super::DescriptorHeap;
use crate::native::{
    CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle, NativeDeviceRef, NativeHeapDesc,
};
use zangfx_common::{Result, Serial, SerialQueue};

/// A range of descriptors in a shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorAllocation {
    base_cpu: CpuDescriptorHandle,
    base_gpu: GpuDescriptorHandle,
    count: u32,
    last_usage_serial: Serial,
    heap_serial: u64,
}

impl GpuDescriptorAllocation {
    /// The CPU handle of the first descriptor. This is the destination of
    /// descriptor copies.
    pub fn base_cpu_descriptor(&self) -> CpuDescriptorHandle {
        self.base_cpu
    }

    /// The GPU handle of the first descriptor, passed to
    /// `SetGraphicsRootDescriptorTable` and friends.
    pub fn base_gpu_descriptor(&self) -> GpuDescriptorHandle {
        self.base_gpu
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_usage_serial(&self) -> Serial {
        self.last_usage_serial
    }

    pub fn heap_serial(&self) -> u64 {
        self.heap_serial
    }
}

#[derive(Debug)]
pub struct ShaderVisibleDescriptorAllocator {
    device: NativeDeviceRef,
    ty: DescriptorHeapType,
    heap: Option<DescriptorHeap>,
    descriptor_count: u32,
    max_descriptor_count: u32,
    allocator: RingBufferAllocator,
    heap_serial: u64,
    /// Maximum-sized heaps waiting for reuse, tagged with their last usage.
    pool: VecDeque<(Serial, DescriptorHeap)>,
    /// Heaps switched out in the first phase, kept alive until the GPU is
    /// done with them.
    retired: SerialQueue<DescriptorHeap>,
}

impl ShaderVisibleDescriptorAllocator {
    /// Construct a `ShaderVisibleDescriptorAllocator` and create its first
    /// heap of `min_size` descriptors.
    pub fn new(
        device: &NativeDeviceRef,
        ty: DescriptorHeapType,
        min_size: u32,
        max_size: u32,
    ) -> Result<Self> {
        assert!(ty.can_be_shader_visible());
        assert!(min_size > 0 && min_size <= max_size);

        let mut this = Self {
            device: device.clone(),
            ty,
            heap: None,
            descriptor_count: min_size,
            max_descriptor_count: max_size,
            allocator: RingBufferAllocator::new(min_size),
            heap_serial: 0,
            pool: VecDeque::new(),
            retired: SerialQueue::new(),
        };
        this.allocate_and_switch_shader_visible_heap(Serial::ZERO, Serial::ZERO)?;
        Ok(this)
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    /// The heap to be bound to command lists. `None` after a failed heap
    /// switch.
    pub fn heap(&self) -> Option<&DescriptorHeap> {
        self.heap.as_ref()
    }

    /// Incremented on every heap switch.
    pub fn heap_serial(&self) -> u64 {
        self.heap_serial
    }

    /// The size of the current heap.
    pub fn descriptor_count(&self) -> u32 {
        self.descriptor_count
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Allocate `count` descriptors for use by the command list `pending`.
    /// Returns `None` if the current heap is full; the caller should then
    /// switch heaps and retry.
    pub fn allocate_gpu_descriptors(
        &mut self,
        count: u32,
        pending: Serial,
    ) -> Option<GpuDescriptorAllocation> {
        let heap = self.heap.as_ref()?;
        let gpu_start = heap.gpu_handle(0)?;
        let start = self.allocator.allocate(count, pending)?;
        Some(GpuDescriptorAllocation {
            base_cpu: heap.cpu_handle(start),
            base_gpu: gpu_start.offset(start, heap.increment()),
            count,
            last_usage_serial: pending,
            heap_serial: self.heap_serial,
        })
    }

    /// Check if `allocation` can be used by the command list `pending`
    /// without being populated again.
    ///
    /// An allocation is only reused by the command list it was made for.
    /// Ring space is reclaimed as soon as that command list completes, so
    /// it must not outlive it.
    pub fn is_allocation_still_valid(
        &self,
        allocation: &GpuDescriptorAllocation,
        pending: Serial,
    ) -> bool {
        allocation.heap_serial == self.heap_serial && allocation.last_usage_serial == pending
    }

    /// Reclaim ring space and heaps no longer used by the GPU.
    pub fn tick(&mut self, completed: Serial) {
        self.allocator.deallocate(completed);
        self.retired.drain_up_to(completed).for_each(drop);
    }

    /// Replace the current heap. Every allocation made so far becomes
    /// invalid.
    pub fn allocate_and_switch_shader_visible_heap(
        &mut self,
        pending: Serial,
        completed: Serial,
    ) -> Result<()> {
        if let Some(old_heap) = self.heap.take() {
            if self.descriptor_count < self.max_descriptor_count {
                self.retired.enqueue(old_heap, pending);
                self.descriptor_count = self
                    .descriptor_count
                    .saturating_mul(2)
                    .min(self.max_descriptor_count);
            } else {
                self.pool.push_back((pending, old_heap));
            }
        }

        let mut new_heap = None;
        if self.pool.front().map_or(false, |&(serial, _)| serial <= completed) {
            new_heap = self.pool.pop_front().map(|(_, heap)| heap);
        }

        let heap = match new_heap {
            Some(heap) => heap,
            // On failure, no heap is bound until a later switch succeeds
            None => DescriptorHeap::new(
                &self.device,
                NativeHeapDesc {
                    ty: self.ty,
                    num_descriptors: self.descriptor_count,
                    shader_visible: true,
                },
            )?,
        };

        self.heap = Some(heap);
        self.allocator = RingBufferAllocator::new(self.descriptor_count);
        self.heap_serial += 1;
        debug!(
            ty = ?self.ty,
            descriptor_count = self.descriptor_count,
            heap_serial = self.heap_serial,
            pool_len = self.pool.len(),
            "switched the shader-visible heap"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullDevice;
    use std::sync::Arc;

    fn allocator(min_size: u32, max_size: u32) -> (Arc<NullDevice>, ShaderVisibleDescriptorAllocator) {
        let null = Arc::new(NullDevice::new());
        let device: NativeDeviceRef = null.clone();
        let allocator = ShaderVisibleDescriptorAllocator::new(
            &device,
            DescriptorHeapType::Sampler,
            min_size,
            max_size,
        )
        .unwrap();
        (null, allocator)
    }

    #[test]
    fn allocations_are_contiguous() {
        let (_null, mut a) = allocator(16, 16);
        let x = a.allocate_gpu_descriptors(4, Serial(1)).unwrap();
        let y = a.allocate_gpu_descriptors(4, Serial(1)).unwrap();
        let inc = a.heap().unwrap().increment();
        assert_eq!(y.base_cpu_descriptor(), x.base_cpu_descriptor().offset(4, inc));
        assert_eq!(y.base_gpu_descriptor(), x.base_gpu_descriptor().offset(4, inc));
        assert!(a.is_allocation_still_valid(&x, Serial(1)));
        assert!(!a.is_allocation_still_valid(&x, Serial(2)));
        assert!(a.allocate_gpu_descriptors(9, Serial(1)).is_none());
    }

    #[test]
    fn ring_space_is_reclaimed_by_tick() {
        let (_null, mut a) = allocator(8, 8);
        assert!(a.allocate_gpu_descriptors(6, Serial(1)).is_some());
        assert!(a.allocate_gpu_descriptors(3, Serial(2)).is_none());
        a.tick(Serial(1));
        assert!(a.allocate_gpu_descriptors(6, Serial(2)).is_some());
    }

    #[test]
    fn refused_allocations_take_no_space() {
        let (_null, mut a) = allocator(8, 8);
        let x = a.allocate_gpu_descriptors(2, Serial(1)).unwrap();
        assert!(a.allocate_gpu_descriptors(9, Serial(1)).is_none());
        let y = a.allocate_gpu_descriptors(2, Serial(1)).unwrap();
        let inc = a.heap().unwrap().increment();
        assert_eq!(y.base_gpu_descriptor(), x.base_gpu_descriptor().offset(2, inc));
        assert_eq!(y.base_cpu_descriptor(), x.base_cpu_descriptor().offset(2, inc));

        a.tick(Serial(1));
        assert!(a.allocate_gpu_descriptors(6, Serial(2)).is_some());
    }

    #[test]
    fn switching_grows_then_pools() {
        let (null, mut a) = allocator(2, 8);
        assert_eq!(a.heap_serial(), 1);
        let x = a.allocate_gpu_descriptors(1, Serial(1)).unwrap();

        a.allocate_and_switch_shader_visible_heap(Serial(1), Serial::ZERO).unwrap();
        assert!(!a.is_allocation_still_valid(&x, Serial(1)));
        assert_eq!(a.descriptor_count(), 4);
        assert_eq!(a.heap_serial(), 2);
        // The old heap stays alive until serial 1 completes
        assert_eq!(null.live_heap_count(), 2);

        a.allocate_and_switch_shader_visible_heap(Serial(1), Serial::ZERO).unwrap();
        assert_eq!(a.descriptor_count(), 8);
        a.tick(Serial(1));
        assert_eq!(null.live_heap_count(), 1);

        // Maximum size reached: heaps go through the pool
        a.allocate_and_switch_shader_visible_heap(Serial(2), Serial(1)).unwrap();
        assert_eq!(a.descriptor_count(), 8);
        assert_eq!(a.pool_len(), 1);
        assert_eq!(null.live_heap_count(), 2);

        // The pooled heap was last used by serial 2, which has completed
        let created = null.num_heaps_created();
        a.allocate_and_switch_shader_visible_heap(Serial(3), Serial(2)).unwrap();
        assert_eq!(null.num_heaps_created(), created);
        assert_eq!(a.pool_len(), 1);
        assert_eq!(a.heap_serial(), 5);
    }

    #[test]
    fn failed_switch_leaves_no_heap() {
        let (null, mut a) = allocator(4, 4);
        null.fail_heap_creation_after(0);
        assert!(a
            .allocate_and_switch_shader_visible_heap(Serial(1), Serial::ZERO)
            .is_err());
        assert!(a.heap().is_none());
        assert!(a.allocate_gpu_descriptors(1, Serial(1)).is_none());

        null.clear_heap_creation_failure();
        a.allocate_and_switch_shader_visible_heap(Serial(2), Serial(1)).unwrap();
        assert!(a.allocate_gpu_descriptors(1, Serial(2)).is_some());
    }
}
