//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Draw-time binding of descriptor tables.
//!
//! Before each draw or dispatch, the descriptor tables of every bound bind
//! group must be present in the current shader-visible heaps. When a heap is
//! full it is switched, and then *all* bind groups need populating again
//! because the switch invalidated their existing allocations.
use arrayvec::ArrayVec;
use tracing::debug;

use crate::arg::shadervisible::ShaderVisibleDescriptorAllocator;
use crate::arg::table::BindGroup;
use crate::native::GpuDescriptorHandle;
use zangfx_common::{Error, ErrorKind, Result, Serial};

/// The maximum number of bind groups bound at once.
pub const MAX_BIND_GROUPS: usize = 4;

/// The locations of a bind group's descriptor tables in the shader-visible
/// heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTables {
    /// `None` if the bind group has no view table.
    pub views: Option<GpuDescriptorHandle>,
    /// `None` if the bind group has no sampler table.
    pub samplers: Option<GpuDescriptorHandle>,
}

/// Tells the command recorder whether the descriptor heaps must be set again
/// (`SetDescriptorHeaps`) before binding tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapBinding {
    Unchanged,
    HeapSwitch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub heap_binding: HeapBinding,
    /// One element per bind group passed to `apply`.
    pub tables: ArrayVec<BoundTables, MAX_BIND_GROUPS>,
}

/// Tracks which shader-visible heaps a command list has bound.
#[derive(Debug, Default)]
pub struct DescriptorHeapBinder {
    /// The heap serials of the bound view and sampler heaps.
    bound_heap_serials: Option<[u64; 2]>,
}

impl DescriptorHeapBinder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Forget the bound heaps. Call this when starting a new command list.
    pub fn reset(&mut self) {
        self.bound_heap_serials = None;
    }

    /// Make the descriptor tables of `groups` available to the command list
    /// `pending`.
    ///
    /// A full heap is switched and the groups are populated once more. Fails
    /// with `OutOfDescriptorSpace` if they still do not fit, which means a
    /// single draw needs more descriptors than a heap can hold.
    pub fn apply(
        &mut self,
        groups: &[&BindGroup],
        view_allocator: &mut ShaderVisibleDescriptorAllocator,
        sampler_allocator: &mut ShaderVisibleDescriptorAllocator,
        pending: Serial,
        completed: Serial,
    ) -> Result<ApplyResult> {
        assert!(
            groups.len() <= MAX_BIND_GROUPS,
            "too many bind groups: {}",
            groups.len()
        );

        let mut switched = false;
        loop {
            let views_ok = groups
                .iter()
                .all(|group| group.populate_views(pending, view_allocator));
            let samplers_ok = groups
                .iter()
                .all(|group| group.populate_samplers(pending, sampler_allocator));

            if views_ok && samplers_ok {
                break;
            }
            if switched {
                return Err(Error::with_detail(
                    ErrorKind::OutOfDescriptorSpace,
                    "the bind groups do not fit in a fresh shader-visible heap",
                ));
            }

            if !views_ok {
                view_allocator.allocate_and_switch_shader_visible_heap(pending, completed)?;
            }
            if !samplers_ok {
                sampler_allocator.allocate_and_switch_shader_visible_heap(pending, completed)?;
            }
            switched = true;
        }

        let heap_serials = [view_allocator.heap_serial(), sampler_allocator.heap_serial()];
        let heap_binding = if self.bound_heap_serials == Some(heap_serials) {
            HeapBinding::Unchanged
        } else {
            debug!(?heap_serials, "descriptor heaps need rebinding");
            self.bound_heap_serials = Some(heap_serials);
            HeapBinding::HeapSwitch
        };

        let tables = groups
            .iter()
            .map(|group| BoundTables {
                views: group.base_view_gpu_descriptor(),
                samplers: group.base_sampler_gpu_descriptor(),
            })
            .collect();

        Ok(ApplyResult {
            heap_binding,
            tables,
        })
    }
}
