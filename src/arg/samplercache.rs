//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Deduplication of sampler descriptor tables.
//!
//! Bind groups referencing the same samplers in the same order share one
//! [`SamplerHeapCacheEntry`], and thus one staging allocation and one
//! shader-visible allocation per command list. Samplers are compared by
//! identity, not by their parameters.
//!
//! The cache holds only weak references. An entry removes itself from the
//! cache when the last bind group using it is dropped.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::shadervisible::{GpuDescriptorAllocation, ShaderVisibleDescriptorAllocator};
use super::staging::{CpuDescriptorAllocation, OwnedCpuAllocation, StagingBuckets};
use crate::native::{DescriptorHeapType, GpuDescriptorHandle, NativeDeviceRef};
use crate::sampler::SamplerRef;
use zangfx_common::{Result, Serial};

/// An ordered list of samplers, hashed and compared by sampler identity.
type SamplerKey = Arc<[SamplerRef]>;

pub struct SamplerHeapCache {
    device: NativeDeviceRef,
    allocators: StagingBuckets,
    cache: Mutex<HashMap<SamplerKey, Weak<SamplerHeapCacheEntry>>>,
}

impl fmt::Debug for SamplerHeapCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplerHeapCache")
            .field("allocators", &self.allocators)
            .field("len", &self.len())
            .finish()
    }
}

impl SamplerHeapCache {
    /// Construct a `SamplerHeapCache` that allocates descriptors from
    /// `allocators`, which must be a set of `Sampler` staging allocators.
    pub fn new(device: &NativeDeviceRef, allocators: StagingBuckets) -> Arc<Self> {
        assert_eq!(allocators.ty(), DescriptorHeapType::Sampler);
        Arc::new(Self {
            device: device.clone(),
            allocators,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn allocators(&self) -> &StagingBuckets {
        &self.allocators
    }

    /// Return the entry for `samplers`, creating one if it does not exist
    /// yet.
    ///
    /// Fails only if the staging allocator cannot allocate a block
    /// (`OutOfSlabs`) or a native heap.
    pub fn get_or_create(self: &Arc<Self>, samplers: &[SamplerRef]) -> Result<Arc<SamplerHeapCacheEntry>> {
        let mut cache = self.cache.lock();

        if let Some(entry) = cache.get(samplers).and_then(Weak::upgrade) {
            return Ok(entry);
        }

        // Cache miss. Either there has never been an entry for this key, or
        // the entry is being dropped right now and will not remove the
        // replacement we are about to insert.
        let cpu_allocation = self.allocators.allocate(samplers.len() as u32)?;
        if let Some(ref allocation) = cpu_allocation {
            for (i, sampler) in samplers.iter().enumerate() {
                self.device
                    .create_sampler(sampler.desc(), allocation.offset_from(i as u32));
            }
        }

        let key: SamplerKey = samplers.into();
        let entry = Arc::new(SamplerHeapCacheEntry {
            samplers: key.clone(),
            cache: Arc::downgrade(self),
            device: self.device.clone(),
            cpu_allocation,
            gpu_allocation: Mutex::new(None),
        });
        cache.insert(key, Arc::downgrade(&entry));
        debug!(num_samplers = samplers.len(), "sampler cache miss");

        Ok(entry)
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sampler descriptor table shared by bind groups.
pub struct SamplerHeapCacheEntry {
    /// Also the key of this entry in the cache.
    samplers: SamplerKey,
    cache: Weak<SamplerHeapCache>,
    device: NativeDeviceRef,
    /// `None` iff `samplers` is empty.
    cpu_allocation: Option<OwnedCpuAllocation>,
    gpu_allocation: Mutex<Option<GpuDescriptorAllocation>>,
}

impl fmt::Debug for SamplerHeapCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplerHeapCacheEntry")
            .field("samplers", &self.samplers)
            .field("cpu_allocation", &self.cpu_allocation)
            .field("gpu_allocation", &*self.gpu_allocation.lock())
            .finish()
    }
}

impl SamplerHeapCacheEntry {
    pub fn samplers(&self) -> &[SamplerRef] {
        &self.samplers
    }

    pub fn cpu_allocation(&self) -> Option<&CpuDescriptorAllocation> {
        self.cpu_allocation.as_ref().map(OwnedCpuAllocation::allocation)
    }

    /// The most recent shader-visible allocation. It may already be invalid.
    pub fn gpu_allocation(&self) -> Option<GpuDescriptorAllocation> {
        *self.gpu_allocation.lock()
    }

    pub fn base_gpu_descriptor(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_allocation().map(|a| a.base_gpu_descriptor())
    }

    /// Make sure the table is present in `allocator`'s current heap for the
    /// command list `pending`, copying it there if needed.
    ///
    /// Returns `false` if `allocator` is full. The caller should switch heaps
    /// and try again.
    pub fn materialize(
        &self,
        pending: Serial,
        allocator: &mut ShaderVisibleDescriptorAllocator,
    ) -> bool {
        let cpu_allocation = match self.cpu_allocation {
            Some(ref x) => x,
            None => return true,
        };

        let mut gpu_allocation = self.gpu_allocation.lock();
        if let Some(ref existing) = *gpu_allocation {
            if allocator.is_allocation_still_valid(existing, pending) {
                return true;
            }
        }

        let count = self.samplers.len() as u32;
        let new_allocation = match allocator.allocate_gpu_descriptors(count, pending) {
            Some(x) => x,
            None => return false,
        };
        self.device.copy_descriptors(
            count,
            new_allocation.base_cpu_descriptor(),
            cpu_allocation.base_descriptor(),
            DescriptorHeapType::Sampler,
        );
        *gpu_allocation = Some(new_allocation);
        true
    }
}

impl Drop for SamplerHeapCacheEntry {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            let mut map = cache.cache.lock();
            let is_self = map
                .get(&*self.samplers)
                .map_or(false, |weak| std::ptr::eq(weak.as_ptr(), self));
            if is_self {
                map.remove(&*self.samplers);
                debug!(num_samplers = self.samplers.len(), "sampler cache eviction");
            }
        }
        // `cpu_allocation` is released after the cache lock is gone
    }
}
