//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A [`NativeDevice`] that lives entirely in host memory.
//!
//! Every heap gets its own disjoint range of fake CPU and GPU addresses, and
//! every descriptor write is recorded by its CPU handle so that the contents
//! of any heap can be inspected afterwards. Accessing a descriptor outside a
//! live heap panics.
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::native::{
    CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle, NativeDevice, NativeHeap,
    NativeHeapDesc, ViewDesc,
};
use crate::sampler::SamplerDesc;
use zangfx_common::{Error, ErrorKind, Result};

const CPU_ADDRESS_BASE: usize = 0x1_0000;
const GPU_ADDRESS_BASE: u64 = 0x8000_0000_0000;

/// Keeps adjacent heaps apart so that overruns are caught.
const HEAP_GUARD: usize = 0x1000;

/// The recorded contents of a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum NullDescriptor {
    View(ViewDesc),
    Sampler(SamplerDesc),
}

#[derive(Debug, Clone)]
struct NullHeap {
    desc: NativeHeapDesc,
    cpu_start: usize,
    gpu_start: Option<u64>,
    size: usize,
}

#[derive(Debug, Default)]
struct NullState {
    next_raw: u64,
    next_cpu: usize,
    next_gpu: u64,
    /// Indexed by `cpu_start`.
    heaps: BTreeMap<usize, (u64, NullHeap)>,
    descriptors: HashMap<usize, NullDescriptor>,
    num_heaps_created: usize,
    fail_after: Option<usize>,
}

#[derive(Debug)]
pub struct NullDevice {
    state: Mutex<NullState>,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullState {
                next_raw: 1,
                next_cpu: CPU_ADDRESS_BASE,
                next_gpu: GPU_ADDRESS_BASE,
                ..Default::default()
            }),
        }
    }

    /// Make every heap creation after the next `count` successful ones fail.
    pub fn fail_heap_creation_after(&self, count: usize) {
        self.state.lock().fail_after = Some(count);
    }

    pub fn clear_heap_creation_failure(&self) {
        self.state.lock().fail_after = None;
    }

    pub fn live_heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }

    pub fn live_heap_count_of(&self, ty: DescriptorHeapType) -> usize {
        self.state
            .lock()
            .heaps
            .values()
            .filter(|(_, heap)| heap.desc.ty == ty)
            .count()
    }

    pub fn num_heaps_created(&self) -> usize {
        self.state.lock().num_heaps_created
    }

    /// The descriptor written at `handle`, if any.
    pub fn descriptor_at(&self, handle: CpuDescriptorHandle) -> Option<NullDescriptor> {
        self.state.lock().descriptors.get(&handle.0).cloned()
    }

    /// The descriptor at a shader-visible location, if any.
    pub fn descriptor_at_gpu(&self, handle: GpuDescriptorHandle) -> Option<NullDescriptor> {
        let state = self.state.lock();
        let cpu = state.heaps.values().find_map(|(_, heap)| {
            let gpu_start = heap.gpu_start?;
            if handle.0 >= gpu_start && handle.0 < gpu_start + heap.size as u64 {
                Some(heap.cpu_start + (handle.0 - gpu_start) as usize)
            } else {
                None
            }
        })?;
        state.descriptors.get(&cpu).cloned()
    }
}

impl NullState {
    fn heap_containing(&self, address: usize) -> Option<&NullHeap> {
        let (_, (_, heap)) = self.heaps.range(..=address).next_back()?;
        if address < heap.cpu_start + heap.size {
            Some(heap)
        } else {
            None
        }
    }

    fn check_handle(&self, handle: CpuDescriptorHandle, ty: DescriptorHeapType) {
        match self.heap_containing(handle.0) {
            Some(heap) => assert_eq!(
                heap.desc.ty, ty,
                "{:?} lies in a heap of a different type",
                handle
            ),
            None => panic!("{:?} does not lie in a live heap", handle),
        }
    }
}

fn increment(ty: DescriptorHeapType) -> u32 {
    match ty {
        DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler => 32,
        DescriptorHeapType::Rtv => 32,
        DescriptorHeapType::Dsv => 8,
    }
}

fn view_heap_type(desc: &ViewDesc) -> DescriptorHeapType {
    match desc {
        ViewDesc::ConstantBuffer { .. }
        | ViewDesc::BufferSrv { .. }
        | ViewDesc::BufferUav { .. }
        | ViewDesc::TextureSrv { .. }
        | ViewDesc::TextureUav { .. } => DescriptorHeapType::CbvSrvUav,
        ViewDesc::RenderTarget { .. } => DescriptorHeapType::Rtv,
        ViewDesc::DepthStencil { .. } => DescriptorHeapType::Dsv,
    }
}

impl NativeDevice for NullDevice {
    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32 {
        increment(ty)
    }

    fn create_descriptor_heap(&self, desc: &NativeHeapDesc) -> Result<NativeHeap> {
        assert!(
            !desc.shader_visible || desc.ty.can_be_shader_visible(),
            "{:?} heaps cannot be shader-visible",
            desc.ty
        );
        assert_ne!(desc.num_descriptors, 0);

        let mut state = self.state.lock();
        if let Some(remaining) = state.fail_after {
            if remaining == 0 {
                return Err(Error::with_detail(
                    ErrorKind::OutOfDeviceMemory,
                    "CreateDescriptorHeap",
                ));
            }
            state.fail_after = Some(remaining - 1);
        }

        let size = desc.num_descriptors as usize * increment(desc.ty) as usize;
        let raw = state.next_raw;
        let cpu_start = state.next_cpu;
        let gpu_start = if desc.shader_visible {
            let gpu_start = state.next_gpu;
            state.next_gpu += (size + HEAP_GUARD) as u64;
            Some(gpu_start)
        } else {
            None
        };
        state.next_raw += 1;
        state.next_cpu += size + HEAP_GUARD;
        state.num_heaps_created += 1;
        state.heaps.insert(
            cpu_start,
            (
                raw,
                NullHeap {
                    desc: *desc,
                    cpu_start,
                    gpu_start,
                    size,
                },
            ),
        );

        Ok(NativeHeap {
            raw,
            cpu_start: CpuDescriptorHandle(cpu_start),
            gpu_start: gpu_start.map(GpuDescriptorHandle),
        })
    }

    fn destroy_descriptor_heap(&self, heap: &NativeHeap) {
        let mut state = self.state.lock();
        let (raw, record) = state
            .heaps
            .remove(&heap.cpu_start.0)
            .expect("destroying an unknown heap");
        assert_eq!(raw, heap.raw, "heap handle mismatch");

        let range = record.cpu_start..record.cpu_start + record.size;
        state.descriptors.retain(|address, _| !range.contains(address));
    }

    fn create_view(&self, desc: &ViewDesc, dest: CpuDescriptorHandle) {
        let mut state = self.state.lock();
        state.check_handle(dest, view_heap_type(desc));
        state.descriptors.insert(dest.0, NullDescriptor::View(desc.clone()));
    }

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptorHandle) {
        let mut state = self.state.lock();
        state.check_handle(dest, DescriptorHeapType::Sampler);
        state.descriptors.insert(dest.0, NullDescriptor::Sampler(*desc));
    }

    fn copy_descriptors(
        &self,
        count: u32,
        dest: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    ) {
        let mut state = self.state.lock();
        let inc = increment(ty);
        for i in 0..count {
            let (d, s) = (dest.offset(i, inc), src.offset(i, inc));
            state.check_handle(d, ty);
            state.check_handle(s, ty);
            match state.descriptors.get(&s.0).cloned() {
                Some(x) => {
                    state.descriptors.insert(d.0, x);
                }
                None => {
                    state.descriptors.remove(&d.0);
                }
            }
        }
    }
}
