//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Buffers and their state tracking.
//!
//! Buffers are tracked as a whole. Every buffer state can be reached from
//! `COMMON` by implicit promotion, and buffers always decay to `COMMON` at
//! the end of a command list, so most buffer accesses need no barrier at all.
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use crate::native::{ResourceId, ResourceStates};
use crate::resstate::{Barrier, BarrierSubresource};
use crate::utils::translate_buffer_usage;
use zangfx_common::{Error, ErrorKind, Result, Serial};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsageFlags: u16 {
        const COPY_READ = 1 << 0;
        const COPY_WRITE = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        /// Read-only storage access.
        const STORAGE_READ = 1 << 4;
        const INDEX = 1 << 5;
        const VERTEX = 1 << 6;
        const INDIRECT_DRAW = 1 << 7;
        const QUERY_RESOLVE = 1 << 8;
    }
}

/// The kind of native heap a buffer is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Device-local memory.
    Default,
    /// CPU-writable memory. Buffers here are always in `GENERIC_READ`.
    Upload,
    /// CPU-readable memory. Buffers here are always in `COPY_DEST`.
    Readback,
}

impl HeapKind {
    fn fixed_state(self) -> Option<ResourceStates> {
        match self {
            HeapKind::Default => None,
            HeapKind::Upload => Some(ResourceStates::GENERIC_READ),
            HeapKind::Readback => Some(ResourceStates::COPY_DEST),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferBuilder {
    size: Option<u64>,
    usage: BufferUsageFlags,
    heap: HeapKind,
    label: Option<String>,
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self {
            size: None,
            usage: BufferUsageFlags::empty(),
            heap: HeapKind::Default,
            label: None,
        }
    }
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&mut self, v: u64) -> &mut Self {
        self.size = Some(v);
        self
    }

    pub fn usage(&mut self, v: BufferUsageFlags) -> &mut Self {
        self.usage = v;
        self
    }

    pub fn heap(&mut self, v: HeapKind) -> &mut Self {
        self.heap = v;
        self
    }

    pub fn label(&mut self, v: &str) -> &mut Self {
        self.label = Some(v.to_owned());
        self
    }

    pub fn build(&mut self) -> Result<BufferRef> {
        let size = self.size.expect("size");
        if size == 0 {
            return Err(Error::with_detail(ErrorKind::NotSupported, "zero-sized buffer"));
        }
        if let Some(fixed) = self.heap.fixed_state() {
            let needed = translate_buffer_usage(self.usage);
            if !fixed.contains(needed) {
                return Err(Error::with_detail(
                    ErrorKind::NotSupported,
                    format!("usage {:?} is not allowed in {:?} heaps", self.usage, self.heap),
                ));
            }
        }

        let last_state = self.heap.fixed_state().unwrap_or(ResourceStates::COMMON);
        Ok(Arc::new(Buffer {
            id: ResourceId::new(),
            size,
            usage: self.usage,
            heap: self.heap,
            label: self.label.clone(),
            state: Mutex::new(BufferState {
                last_usage: BufferUsageFlags::empty(),
                last_state,
                last_used_serial: Serial::ZERO,
            }),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferState {
    last_usage: BufferUsageFlags,
    last_state: ResourceStates,
    last_used_serial: Serial,
}

#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    size: u64,
    usage: BufferUsageFlags,
    heap: HeapKind,
    label: Option<String>,
    state: Mutex<BufferState>,
}

pub type BufferRef = Arc<Buffer>;

impl Buffer {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsageFlags {
        self.usage
    }

    pub fn heap(&self) -> HeapKind {
        self.heap
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(String::as_str)
    }

    /// The last native state recorded for the buffer.
    pub fn tracked_state(&self) -> ResourceStates {
        self.state.lock().last_state
    }

    /// Compute the barrier required to use the buffer as `usage` in the
    /// command list whose serial is `pending`, and record the new state.
    pub fn request_transition(&self, usage: BufferUsageFlags, pending: Serial) -> Option<Barrier> {
        let mut barriers = Vec::new();
        self.track_usage(&mut barriers, usage, pending);
        debug_assert!(barriers.len() <= 1);
        barriers.pop()
    }

    /// Like [`Self::request_transition`], but appends the barrier to
    /// `barriers`. Returns `true` if a barrier was appended.
    pub fn track_usage(
        &self,
        barriers: &mut Vec<Barrier>,
        usage: BufferUsageFlags,
        pending: Serial,
    ) -> bool {
        let new_state = translate_buffer_usage(usage);

        if let Some(fixed) = self.heap.fixed_state() {
            assert!(
                fixed.contains(new_state),
                "{:?} buffers cannot be used as {:?}",
                self.heap,
                usage
            );
            return false;
        }

        let mut state = self.state.lock();
        let mut last_state = state.last_state;

        if last_state == ResourceStates::UNORDERED_ACCESS
            && new_state == ResourceStates::UNORDERED_ACCESS
        {
            state.last_usage = usage;
            barriers.push(Barrier::Uav { resource: self.id });
            return true;
        }

        if !usage.is_empty() && state.last_usage.contains(usage) {
            return false;
        }

        state.last_usage = usage;
        state.last_state = new_state;

        // Buffers decay to COMMON when the command list that last used them
        // completes.
        if pending > state.last_used_serial {
            last_state = ResourceStates::COMMON;
            state.last_used_serial = pending;
        }

        // All buffer states are promotable from COMMON.
        if last_state == ResourceStates::COMMON {
            return false;
        }

        trace!(resource = ?self.id, before = ?last_state, after = ?new_state, "buffer barrier");
        barriers.push(Barrier::Transition {
            resource: self.id,
            subresource: BarrierSubresource::All,
            before: last_state,
            after: new_state,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(heap: HeapKind, usage: BufferUsageFlags) -> BufferRef {
        BufferBuilder::new()
            .size(256)
            .usage(usage)
            .heap(heap)
            .build()
            .unwrap()
    }

    #[test]
    fn first_use_in_a_command_list_is_promoted() {
        let b = buffer(
            HeapKind::Default,
            BufferUsageFlags::STORAGE | BufferUsageFlags::COPY_WRITE,
        );
        assert_eq!(b.request_transition(BufferUsageFlags::COPY_WRITE, Serial(1)), None);
        assert_eq!(b.tracked_state(), ResourceStates::COPY_DEST);

        // Same command list: a real transition.
        assert_eq!(
            b.request_transition(BufferUsageFlags::STORAGE, Serial(1)),
            Some(Barrier::Transition {
                resource: b.id(),
                subresource: BarrierSubresource::All,
                before: ResourceStates::COPY_DEST,
                after: ResourceStates::UNORDERED_ACCESS,
            })
        );

        // Next command list: decayed and promoted again.
        assert_eq!(b.request_transition(BufferUsageFlags::COPY_WRITE, Serial(2)), None);
    }

    #[test]
    fn subset_usage_needs_nothing() {
        let b = buffer(
            HeapKind::Default,
            BufferUsageFlags::VERTEX | BufferUsageFlags::INDEX | BufferUsageFlags::COPY_WRITE,
        );
        b.request_transition(BufferUsageFlags::COPY_WRITE, Serial(1));
        assert!(b
            .request_transition(BufferUsageFlags::VERTEX | BufferUsageFlags::INDEX, Serial(1))
            .is_some());
        assert_eq!(b.request_transition(BufferUsageFlags::INDEX, Serial(1)), None);
    }

    #[test]
    fn uav_to_uav() {
        let b = buffer(HeapKind::Default, BufferUsageFlags::STORAGE);
        assert_eq!(b.request_transition(BufferUsageFlags::STORAGE, Serial(1)), None);
        assert_eq!(
            b.request_transition(BufferUsageFlags::STORAGE, Serial(1)),
            Some(Barrier::Uav { resource: b.id() })
        );
    }

    #[test]
    fn fixed_state_heaps() {
        let b = buffer(HeapKind::Upload, BufferUsageFlags::COPY_READ | BufferUsageFlags::UNIFORM);
        assert_eq!(b.request_transition(BufferUsageFlags::COPY_READ, Serial(1)), None);
        assert_eq!(b.request_transition(BufferUsageFlags::UNIFORM, Serial(1)), None);
        assert_eq!(b.tracked_state(), ResourceStates::GENERIC_READ);

        let e = BufferBuilder::new()
            .size(16)
            .usage(BufferUsageFlags::STORAGE)
            .heap(HeapKind::Readback)
            .build()
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
    }
}
