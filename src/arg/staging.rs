//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! CPU-only (staging) descriptor allocators.
//!
//! A [`StagingDescriptorAllocator`] hands out fixed-size blocks of
//! descriptors carved out of fixed-size native heaps. Heaps are created on
//! demand and never released before the allocator is dropped.
//!
//! [`StagingBuckets`] keeps one allocator per power-of-two block size, so a
//! request for `n` descriptors is served by the allocator whose block size is
//! `n.next_power_of_two()`.
use parking_lot::Mutex;
use snowflake::ProcessUniqueId;
use std::sync::Arc;
use tracing::{debug, warn};

use super::DescriptorHeap;
use crate::native::{CpuDescriptorHandle, DescriptorHeapType, NativeDeviceRef, NativeHeapDesc};
use zangfx_common::{BinaryInteger, Error, ErrorKind, Result, Serial, SerialQueue};

/// A block of descriptors allocated from a [`StagingDescriptorAllocator`].
///
/// This is a move-only value; it must be returned to the allocator it came
/// from exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CpuDescriptorAllocation {
    allocator: ProcessUniqueId,
    heap_index: u32,
    block_index: u32,
    base: CpuDescriptorHandle,
    count: u32,
    increment: u32,
}

impl CpuDescriptorAllocation {
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }

    /// The index of the first descriptor within its heap.
    pub fn start_offset_in_heap(&self) -> u32 {
        self.block_index * self.count
    }

    /// The number of descriptors in the block. This is the allocator's block
    /// size, which can be larger than what was requested.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn base_descriptor(&self) -> CpuDescriptorHandle {
        self.base
    }

    pub fn offset_from(&self, index: u32) -> CpuDescriptorHandle {
        assert!(index < self.count, "descriptor index out of range");
        self.base.offset(index, self.increment)
    }
}

#[derive(Debug)]
struct StagingHeap {
    heap: DescriptorHeap,
    free_blocks: Vec<u32>,
    allocated: Vec<bool>,
}

/// Allocates blocks of `block_size` descriptors from CPU-only heaps.
#[derive(Debug)]
pub struct StagingDescriptorAllocator {
    id: ProcessUniqueId,
    device: NativeDeviceRef,
    ty: DescriptorHeapType,
    block_size: u32,
    heap_size: u32,
    increment: u32,
    max_heaps: Option<usize>,
    heaps: Vec<StagingHeap>,
    /// Indices of the heaps having at least one free block.
    available_heaps: Vec<u32>,
    /// Allocations made by `allocate_transient_cpu_descriptors`.
    in_flight: SerialQueue<CpuDescriptorAllocation>,
}

pub type StagingAllocatorRef = Arc<Mutex<StagingDescriptorAllocator>>;

impl StagingDescriptorAllocator {
    /// Construct a `StagingDescriptorAllocator`.
    ///
    /// `heap_size` is rounded down to a multiple of `block_size`. It must be
    /// at least `block_size`.
    pub fn new(
        device: &NativeDeviceRef,
        ty: DescriptorHeapType,
        block_size: u32,
        heap_size: u32,
        max_heaps: Option<usize>,
    ) -> Self {
        assert_ne!(block_size, 0);
        assert!(heap_size >= block_size, "a heap must fit at least one block");
        Self {
            id: ProcessUniqueId::new(),
            device: device.clone(),
            ty,
            block_size,
            heap_size: heap_size - heap_size % block_size,
            increment: device.descriptor_increment(ty),
            max_heaps,
            heaps: Vec::new(),
            available_heaps: Vec::new(),
            in_flight: SerialQueue::new(),
        }
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn num_heaps(&self) -> usize {
        self.heaps.len()
    }

    fn blocks_per_heap(&self) -> u32 {
        self.heap_size / self.block_size
    }

    fn allocate_heap(&mut self) -> Result<()> {
        if let Some(max_heaps) = self.max_heaps {
            if self.heaps.len() >= max_heaps {
                warn!(
                    ty = ?self.ty,
                    block_size = self.block_size,
                    max_heaps,
                    "staging descriptor allocator is out of slabs"
                );
                return Err(Error::new(ErrorKind::OutOfSlabs));
            }
        }

        let heap = DescriptorHeap::new(
            &self.device,
            NativeHeapDesc {
                ty: self.ty,
                num_descriptors: self.heap_size,
                shader_visible: false,
            },
        )?;

        // Pop order yields the lowest block first
        let num_blocks = self.blocks_per_heap();
        let heap_index = self.heaps.len() as u32;
        self.heaps.push(StagingHeap {
            heap,
            free_blocks: (0..num_blocks).rev().collect(),
            allocated: vec![false; num_blocks as usize],
        });
        self.available_heaps.push(heap_index);
        debug!(ty = ?self.ty, block_size = self.block_size, heap_index, "new staging heap");
        Ok(())
    }

    pub fn allocate_cpu_descriptors(&mut self) -> Result<CpuDescriptorAllocation> {
        if self.available_heaps.is_empty() {
            self.allocate_heap()?;
        }

        let heap_index = *self
            .available_heaps
            .last()
            .expect("a heap with free blocks must exist at this point");
        let heap = &mut self.heaps[heap_index as usize];
        let block_index = heap
            .free_blocks
            .pop()
            .expect("an available heap must have a free block");
        if heap.free_blocks.is_empty() {
            self.available_heaps.pop();
        }

        heap.allocated[block_index as usize] = true;
        Ok(CpuDescriptorAllocation {
            allocator: self.id,
            heap_index,
            block_index,
            base: heap.heap.cpu_handle(block_index * self.block_size),
            count: self.block_size,
            increment: self.increment,
        })
    }

    /// Return `allocation` to the allocator.
    ///
    /// Panics if `allocation` did not come from this allocator.
    pub fn deallocate(&mut self, allocation: CpuDescriptorAllocation) {
        assert_eq!(
            allocation.allocator, self.id,
            "deallocating into the wrong allocator"
        );
        let heap = &mut self.heaps[allocation.heap_index as usize];
        let allocated = &mut heap.allocated[allocation.block_index as usize];
        assert!(*allocated, "double free of a descriptor block");
        *allocated = false;

        if heap.free_blocks.is_empty() {
            self.available_heaps.push(allocation.heap_index);
        }
        heap.free_blocks.push(allocation.block_index);
    }

    /// Allocate a block that is released automatically once `pending`
    /// completes (see [`Self::tick`]).
    pub fn allocate_transient_cpu_descriptors(
        &mut self,
        pending: Serial,
    ) -> Result<CpuDescriptorHandle> {
        let allocation = self.allocate_cpu_descriptors()?;
        let base = allocation.base_descriptor();
        self.in_flight.enqueue(allocation, pending);
        Ok(base)
    }

    /// Release transient blocks whose serial is `<= completed`.
    pub fn tick(&mut self, completed: Serial) {
        let retired: Vec<_> = self.in_flight.drain_up_to(completed).collect();
        for allocation in retired {
            self.deallocate(allocation);
        }
    }

    /// The number of blocks currently allocated, including transient ones.
    pub fn num_allocated_blocks(&self) -> usize {
        self.heaps
            .iter()
            .map(|h| h.allocated.iter().filter(|&&x| x).count())
            .sum()
    }
}

/// A [`CpuDescriptorAllocation`] that returns itself to its allocator when
/// dropped.
#[derive(Debug)]
pub struct OwnedCpuAllocation {
    allocator: StagingAllocatorRef,
    allocation: Option<CpuDescriptorAllocation>,
}

impl OwnedCpuAllocation {
    pub fn new(allocator: &StagingAllocatorRef) -> Result<Self> {
        let allocation = allocator.lock().allocate_cpu_descriptors()?;
        Ok(Self {
            allocator: allocator.clone(),
            allocation: Some(allocation),
        })
    }

    pub fn allocation(&self) -> &CpuDescriptorAllocation {
        self.allocation.as_ref().expect("already released")
    }

    pub fn base_descriptor(&self) -> CpuDescriptorHandle {
        self.allocation().base_descriptor()
    }

    pub fn offset_from(&self, index: u32) -> CpuDescriptorHandle {
        self.allocation().offset_from(index)
    }
}

impl Drop for OwnedCpuAllocation {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator.lock().deallocate(allocation);
        }
    }
}

/// A set of staging allocators for a single heap type, one per power-of-two
/// block size up to `max_count`.
#[derive(Debug)]
pub struct StagingBuckets {
    ty: DescriptorHeapType,
    max_count: u32,
    buckets: Vec<StagingAllocatorRef>,
}

impl StagingBuckets {
    pub fn new(
        device: &NativeDeviceRef,
        ty: DescriptorHeapType,
        max_count: u32,
        heap_size: u32,
        max_heaps: Option<usize>,
    ) -> Self {
        let num_buckets = if max_count == 0 {
            0
        } else {
            max_count.log2_ceil() + 1
        };
        let buckets = (0..num_buckets)
            .map(|i| {
                let block_size = 1u32 << i;
                Arc::new(Mutex::new(StagingDescriptorAllocator::new(
                    device,
                    ty,
                    block_size,
                    heap_size.max(block_size),
                    max_heaps,
                )))
            })
            .collect();
        Self {
            ty,
            max_count,
            buckets,
        }
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    /// The allocator serving requests of `count` descriptors, or `None` if
    /// `count` is zero.
    ///
    /// Panics if `count` exceeds the maximum given on construction.
    pub fn allocator(&self, count: u32) -> Option<&StagingAllocatorRef> {
        assert!(
            count <= self.max_count,
            "{} descriptors exceed the bucket limit of {}",
            count,
            self.max_count
        );
        if count == 0 {
            None
        } else {
            Some(&self.buckets[count.log2_ceil() as usize])
        }
    }

    /// Allocate a block of at least `count` descriptors. Returns `None` if
    /// `count` is zero.
    pub fn allocate(&self, count: u32) -> Result<Option<OwnedCpuAllocation>> {
        match self.allocator(count) {
            Some(allocator) => OwnedCpuAllocation::new(allocator).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullDevice;
    use std::collections::HashSet;

    fn device() -> (Arc<NullDevice>, NativeDeviceRef) {
        let null = Arc::new(NullDevice::new());
        let device: NativeDeviceRef = null.clone();
        (null, device)
    }

    #[test]
    fn blocks_fill_heaps_in_order() {
        let (null, device) = device();
        let mut allocator =
            StagingDescriptorAllocator::new(&device, DescriptorHeapType::CbvSrvUav, 4, 10, None);

        let a: Vec<_> = (0..5)
            .map(|_| allocator.allocate_cpu_descriptors().unwrap())
            .collect();
        // 10 rounds down to 8, i.e., two blocks per heap
        assert_eq!(allocator.num_heaps(), 3);
        assert_eq!(null.live_heap_count(), 3);
        assert_eq!(
            a.iter()
                .map(|x| (x.heap_index(), x.start_offset_in_heap()))
                .collect::<Vec<_>>(),
            vec![(0, 0), (0, 4), (1, 0), (1, 4), (2, 0)]
        );

        for x in a {
            allocator.deallocate(x);
        }
        assert_eq!(allocator.num_allocated_blocks(), 0);
        drop(allocator);
        assert_eq!(null.live_heap_count(), 0);
    }

    #[test]
    fn freed_blocks_are_reused() {
        let (_null, device) = device();
        let mut allocator =
            StagingDescriptorAllocator::new(&device, DescriptorHeapType::Sampler, 1, 2, None);
        let a = allocator.allocate_cpu_descriptors().unwrap();
        let b = allocator.allocate_cpu_descriptors().unwrap();
        let a_key = (a.heap_index(), a.start_offset_in_heap());
        allocator.deallocate(a);
        let c = allocator.allocate_cpu_descriptors().unwrap();
        assert_eq!((c.heap_index(), c.start_offset_in_heap()), a_key);
        assert_eq!(allocator.num_heaps(), 1);
        allocator.deallocate(b);
        allocator.deallocate(c);
    }

    #[test]
    fn slab_limit() {
        let (_null, device) = device();
        let mut allocator =
            StagingDescriptorAllocator::new(&device, DescriptorHeapType::Rtv, 1, 1, Some(1));
        let a = allocator.allocate_cpu_descriptors().unwrap();
        let e = allocator.allocate_cpu_descriptors().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::OutOfSlabs);
        assert!(e.is_recoverable());
        allocator.deallocate(a);
        assert!(allocator.allocate_cpu_descriptors().is_ok());
    }

    #[test]
    fn native_failure_propagates() {
        let (null, device) = device();
        null.fail_heap_creation_after(0);
        let mut allocator =
            StagingDescriptorAllocator::new(&device, DescriptorHeapType::Dsv, 1, 4, None);
        let e = allocator.allocate_cpu_descriptors().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::OutOfDeviceMemory);
        assert!(!e.is_recoverable());
    }

    #[test]
    fn transient_blocks_are_reclaimed_by_tick() {
        let (_null, device) = device();
        let mut allocator =
            StagingDescriptorAllocator::new(&device, DescriptorHeapType::Rtv, 1, 64, None);
        allocator.allocate_transient_cpu_descriptors(Serial(1)).unwrap();
        allocator.allocate_transient_cpu_descriptors(Serial(2)).unwrap();
        assert_eq!(allocator.num_allocated_blocks(), 2);
        allocator.tick(Serial(1));
        assert_eq!(allocator.num_allocated_blocks(), 1);
        allocator.tick(Serial(2));
        assert_eq!(allocator.num_allocated_blocks(), 0);
    }

    #[test]
    #[should_panic]
    fn wrong_allocator() {
        let (_null, device) = device();
        let mut a = StagingDescriptorAllocator::new(&device, DescriptorHeapType::Rtv, 1, 4, None);
        let mut b = StagingDescriptorAllocator::new(&device, DescriptorHeapType::Rtv, 1, 4, None);
        let x = a.allocate_cpu_descriptors().unwrap();
        b.allocate_cpu_descriptors().unwrap();
        b.deallocate(x);
    }

    #[test]
    fn buckets() {
        let (_null, device) = device();
        let buckets = StagingBuckets::new(&device, DescriptorHeapType::CbvSrvUav, 952, 1024, None);
        assert!(buckets.allocator(0).is_none());
        assert_eq!(buckets.allocator(1).unwrap().lock().block_size(), 1);
        assert_eq!(buckets.allocator(3).unwrap().lock().block_size(), 4);
        assert_eq!(buckets.allocator(4).unwrap().lock().block_size(), 4);
        assert_eq!(buckets.allocator(952).unwrap().lock().block_size(), 1024);

        let owned = buckets.allocate(5).unwrap().unwrap();
        assert_eq!(owned.allocation().count(), 8);
        let allocator = buckets.allocator(5).unwrap().clone();
        assert_eq!(allocator.lock().num_allocated_blocks(), 1);
        drop(owned);
        assert_eq!(allocator.lock().num_allocated_blocks(), 0);
    }

    #[test]
    fn no_alias() {
        let (_null, device) = device();
        let buckets = StagingBuckets::new(&device, DescriptorHeapType::Sampler, 48, 64, None);
        let live: Vec<_> = (0..100).map(|_| buckets.allocate(3).unwrap().unwrap()).collect();
        let mut seen = HashSet::new();
        for x in live.iter() {
            for i in 0..x.allocation().count() {
                assert!(seen.insert(x.offset_from(i)));
            }
        }
    }
}
