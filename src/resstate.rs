//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The per-subresource state machine and the barriers it produces.
//!
//! The native API lets some transitions happen without a barrier. A resource
//! in `COMMON` is *implicitly promoted* to a read-only state on first use, and
//! a promoted resource *decays* back to `COMMON` once the command list that
//! promoted it has executed. [`StateAndDecay`] records enough to tell both
//! cases apart from those requiring an explicit barrier.
use crate::native::{ResourceId, ResourceStates};
use zangfx_common::Serial;

/// The tracked state of a single subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateAndDecay {
    pub last_state: ResourceStates,
    pub last_decay_serial: Serial,
    /// `true` only if `last_state` was reached by implicit promotion from
    /// `COMMON`.
    pub is_valid_to_decay: bool,
}

impl StateAndDecay {
    pub fn common() -> Self {
        Self {
            last_state: ResourceStates::COMMON,
            last_decay_serial: Serial::MAX,
            is_valid_to_decay: false,
        }
    }
}

impl Default for StateAndDecay {
    fn default() -> Self {
        Self::common()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierSubresource {
    All,
    /// A subresource index as understood by the native API
    /// (`mip + layer * mips + plane * mips * layers`).
    Index(u32),
}

/// A barrier to be recorded by the command list emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    Transition {
        resource: ResourceId,
        subresource: BarrierSubresource,
        before: ResourceStates,
        after: ResourceStates,
    },
    Uav {
        resource: ResourceId,
    },
}

impl Barrier {
    pub fn resource(&self) -> ResourceId {
        match *self {
            Barrier::Transition { resource, .. } | Barrier::Uav { resource } => resource,
        }
    }
}

/// What [`transition`] requires the caller to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    None,
    Uav,
    Explicit { before: ResourceStates },
}

/// Advance `state` to `new_state` for a command list whose serial is
/// `pending`.
///
/// `simultaneous_access` resources can be promoted from `COMMON` to any
/// state.
pub(crate) fn transition(
    state: &mut StateAndDecay,
    new_state: ResourceStates,
    pending: Serial,
    simultaneous_access: bool,
) -> Transition {
    if state.last_state == ResourceStates::UNORDERED_ACCESS
        && new_state == ResourceStates::UNORDERED_ACCESS
    {
        return Transition::Uav;
    }

    if state.last_state == new_state {
        if state.is_valid_to_decay {
            // Reused by this command list, so it decays no earlier than
            // this one completes.
            state.last_decay_serial = pending;
        }
        return Transition::None;
    }

    if state.is_valid_to_decay && pending > state.last_decay_serial {
        state.last_state = ResourceStates::COMMON;
    }

    let last_state = state.last_state;
    state.last_state = new_state;

    if last_state == ResourceStates::COMMON {
        if simultaneous_access || ResourceStates::PROMOTABLE_READ_ONLY.contains(new_state) {
            state.is_valid_to_decay = true;
            state.last_decay_serial = pending;
            return Transition::None;
        } else if new_state == ResourceStates::COPY_DEST {
            // Promotable, but a write. Writes never decay.
            state.is_valid_to_decay = false;
            return Transition::None;
        }
    }

    state.is_valid_to_decay = false;
    Transition::Explicit { before: last_state }
}
