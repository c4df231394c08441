//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Textures and their subresource state tracking.
use bitflags::bitflags;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::trace;

use crate::native::{ResourceId, ResourceStates};
use crate::resstate::{transition, Barrier, BarrierSubresource, StateAndDecay, Transition};
use crate::subresource::{Aspects, SubresourceRange, SubresourceStorage};
use crate::utils::translate_texture_usage;
use zangfx_common::{Error, ErrorKind, Result, Serial};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsageFlags: u16 {
        const COPY_READ = 1 << 0;
        const COPY_WRITE = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        /// Read-only storage access.
        const STORAGE_READ = 1 << 4;
        const RENDER = 1 << 5;
        /// Read-only depth-stencil attachment.
        const RENDER_READ = 1 << 6;
        /// Presentation. Cannot be combined with any other usage.
        const PRESENT = 1 << 7;
    }
}

/// Builds a [`Texture`].
#[derive(Debug, Clone)]
pub struct TextureBuilder {
    aspects: Aspects,
    num_layers: u32,
    num_mip_levels: u32,
    usage: TextureUsageFlags,
    simultaneous_access: bool,
    label: Option<String>,
}

impl Default for TextureBuilder {
    fn default() -> Self {
        Self {
            aspects: Aspects::COLOR,
            num_layers: 1,
            num_mip_levels: 1,
            usage: TextureUsageFlags::SAMPLED,
            simultaneous_access: false,
            label: None,
        }
    }
}

impl TextureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the aspects of the texture's format.
    pub fn aspects(&mut self, v: Aspects) -> &mut Self {
        self.aspects = v;
        self
    }

    pub fn num_layers(&mut self, v: u32) -> &mut Self {
        self.num_layers = v;
        self
    }

    pub fn num_mip_levels(&mut self, v: u32) -> &mut Self {
        self.num_mip_levels = v;
        self
    }

    pub fn usage(&mut self, v: TextureUsageFlags) -> &mut Self {
        self.usage = v;
        self
    }

    /// Allow the texture to be accessed by multiple queues simultaneously.
    /// Such a texture can be implicitly promoted to any state.
    pub fn simultaneous_access(&mut self, v: bool) -> &mut Self {
        self.simultaneous_access = v;
        self
    }

    pub fn label(&mut self, v: &str) -> &mut Self {
        self.label = Some(v.to_owned());
        self
    }

    pub fn build(&mut self) -> Result<TextureRef> {
        if self.aspects.is_empty() || self.num_layers == 0 || self.num_mip_levels == 0 {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                "texture has no subresources",
            ));
        }
        if self.aspects.contains(Aspects::COLOR) && self.aspects != Aspects::COLOR {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                "color cannot be combined with depth or stencil",
            ));
        }
        if self.simultaneous_access && self.aspects != Aspects::COLOR {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                "depth-stencil textures cannot be simultaneously accessed",
            ));
        }

        Ok(Arc::new(Texture {
            id: ResourceId::new(),
            aspects: self.aspects,
            num_layers: self.num_layers,
            num_mip_levels: self.num_mip_levels,
            usage: self.usage,
            simultaneous_access: self.simultaneous_access,
            label: self.label.clone(),
            state: Mutex::new(SubresourceStorage::new(
                self.aspects,
                self.num_layers,
                self.num_mip_levels,
                StateAndDecay::common(),
            )),
        }))
    }
}

/// A texture resource.
///
/// The recorded state of every subresource lives behind a mutex. Barrier
/// computation for a given texture must still happen in the order the
/// barriers are recorded.
#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    aspects: Aspects,
    num_layers: u32,
    num_mip_levels: u32,
    usage: TextureUsageFlags,
    simultaneous_access: bool,
    label: Option<String>,
    state: Mutex<SubresourceStorage<StateAndDecay>>,
}

pub type TextureRef = Arc<Texture>;

impl Texture {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn aspects(&self) -> Aspects {
        self.aspects
    }

    pub fn num_layers(&self) -> u32 {
        self.num_layers
    }

    pub fn num_mip_levels(&self) -> u32 {
        self.num_mip_levels
    }

    pub fn usage(&self) -> TextureUsageFlags {
        self.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(String::as_str)
    }

    pub fn is_depth_stencil(&self) -> bool {
        self.aspects.intersects(Aspects::DEPTH | Aspects::STENCIL)
    }

    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange::new(self.aspects, 0..self.num_layers, 0..self.num_mip_levels)
    }

    pub fn num_subresources(&self) -> u32 {
        self.full_range().num_subresources()
    }

    /// The native subresource index of a single subresource.
    pub fn subresource_index(&self, aspect: Aspects, array_layer: u32, mip_level: u32) -> u32 {
        assert_eq!(aspect.bits().count_ones(), 1, "exactly one aspect is required");
        assert!(self.aspects.contains(aspect), "aspect {:?} not present", aspect);
        let plane = (self.aspects.bits() & (aspect.bits() - 1)).count_ones();
        mip_level
            + array_layer * self.num_mip_levels
            + plane * self.num_mip_levels * self.num_layers
    }

    /// Compute the barriers required to use `range` as `usage` in the command
    /// list whose serial is `pending`, and record the new state.
    ///
    /// Panics if `range` is out of bounds.
    pub fn request_transition(
        &self,
        range: &SubresourceRange,
        usage: TextureUsageFlags,
        pending: Serial,
    ) -> Vec<Barrier> {
        let mut barriers = Vec::new();
        self.track_usage(&mut barriers, range, usage, pending);
        barriers
    }

    /// Like [`Self::request_transition`], but appends the barriers to
    /// `barriers`.
    pub fn track_usage(
        &self,
        barriers: &mut Vec<Barrier>,
        range: &SubresourceRange,
        usage: TextureUsageFlags,
        pending: Serial,
    ) {
        let new_state = translate_texture_usage(usage, self.aspects);
        self.transition_to_state(barriers, range, new_state, pending);
    }

    /// Like [`Self::track_usage`], but takes a native state directly.
    pub fn transition_to_state(
        &self,
        barriers: &mut Vec<Barrier>,
        range: &SubresourceRange,
        new_state: ResourceStates,
        pending: Serial,
    ) {
        let mut emitter = BarrierEmitter::new(self);
        self.state.lock().update(range, |sub, state| {
            let result = transition(state, new_state, pending, self.simultaneous_access);
            emitter.apply(sub, new_state, result);
        });
        emitter.finish(barriers, *range == self.full_range());
    }

    /// Transition every subresource to the state implied by its usage in a
    /// whole pass. Subresources whose usage is empty are left untouched.
    ///
    /// `usage` must have the same dimensions as the texture.
    pub fn merge_for_pass(
        &self,
        barriers: &mut Vec<Barrier>,
        usage: &SubresourceStorage<TextureUsageFlags>,
        pending: Serial,
    ) {
        let mut emitter = BarrierEmitter::new(self);
        let mut touches_all = true;
        self.state.lock().merge(usage, |sub, state, &usage| {
            if usage.is_empty() {
                touches_all = false;
                return;
            }
            let new_state = translate_texture_usage(usage, self.aspects);
            let result = transition(state, new_state, pending, self.simultaneous_access);
            emitter.apply(sub, new_state, result);
        });
        emitter.finish(barriers, touches_all);
    }

    /// Forget everything known about the texture's state. Used when the
    /// underlying native object is recreated in place.
    pub fn reset_state_to_common(&self) {
        self.state.lock().fill(StateAndDecay::common());
    }

    pub fn tracked_state(&self, aspect: Aspects, array_layer: u32, mip_level: u32) -> StateAndDecay {
        *self.state.lock().get(aspect, array_layer, mip_level)
    }

    /// Return a snapshot of the recorded states as runs of subresources.
    pub fn tracked_states(&self) -> Vec<(SubresourceRange, StateAndDecay)> {
        self.state
            .lock()
            .iter()
            .map(|(range, state)| (range, *state))
            .collect()
    }
}

/// Collects the barriers produced by a single tracking call.
struct BarrierEmitter<'a> {
    texture: &'a Texture,
    uav: bool,
    transitions: SmallVec<[Barrier; 4]>,
}

impl<'a> BarrierEmitter<'a> {
    fn new(texture: &'a Texture) -> Self {
        Self {
            texture,
            uav: false,
            transitions: SmallVec::new(),
        }
    }

    fn apply(&mut self, sub: &SubresourceRange, after: ResourceStates, result: Transition) {
        let before = match result {
            Transition::None => return,
            Transition::Uav => {
                self.uav = true;
                return;
            }
            Transition::Explicit { before } => before,
        };
        let texture = self.texture;
        let make = |subresource| Barrier::Transition {
            resource: texture.id,
            subresource,
            before,
            after,
        };

        if *sub == texture.full_range() {
            self.transitions.push(make(BarrierSubresource::All));
            return;
        }
        for aspect in sub.aspects.iter() {
            for mip in sub.mip_levels() {
                for layer in sub.layers() {
                    let index = texture.subresource_index(aspect, layer, mip);
                    self.transitions.push(make(BarrierSubresource::Index(index)));
                }
            }
        }
    }

    /// Append the collected barriers to `barriers`. If `touches_all` and every
    /// subresource went through the same explicit transition, a single
    /// all-subresources barrier is emitted instead.
    fn finish(mut self, barriers: &mut Vec<Barrier>, touches_all: bool) {
        let texture = self.texture;
        if self.uav {
            barriers.push(Barrier::Uav {
                resource: texture.id,
            });
        }

        if touches_all
            && self.transitions.len() == texture.num_subresources() as usize
            && self.transitions.len() > 1
        {
            if let Barrier::Transition { before, after, .. } = self.transitions[0] {
                let uniform = self.transitions.iter().all(|b| match *b {
                    Barrier::Transition {
                        before: b2,
                        after: a2,
                        ..
                    } => b2 == before && a2 == after,
                    Barrier::Uav { .. } => false,
                });
                if uniform {
                    self.transitions.clear();
                    self.transitions.push(Barrier::Transition {
                        resource: texture.id,
                        subresource: BarrierSubresource::All,
                        before,
                        after,
                    });
                }
            }
        }

        if !self.transitions.is_empty() {
            trace!(
                resource = ?texture.id,
                count = self.transitions.len(),
                uav = self.uav,
                "texture barriers"
            );
        }
        barriers.extend(self.transitions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(layers: u32, mips: u32) -> TextureRef {
        TextureBuilder::new()
            .num_layers(layers)
            .num_mip_levels(mips)
            .usage(TextureUsageFlags::SAMPLED | TextureUsageFlags::RENDER)
            .build()
            .unwrap()
    }

    #[test]
    fn subresource_indices() {
        let t = TextureBuilder::new()
            .aspects(Aspects::DEPTH | Aspects::STENCIL)
            .num_layers(3)
            .num_mip_levels(4)
            .build()
            .unwrap();
        assert_eq!(t.subresource_index(Aspects::DEPTH, 0, 0), 0);
        assert_eq!(t.subresource_index(Aspects::DEPTH, 1, 2), 6);
        assert_eq!(t.subresource_index(Aspects::STENCIL, 0, 0), 12);
        assert_eq!(t.subresource_index(Aspects::STENCIL, 2, 3), 23);
        assert_eq!(t.num_subresources(), 24);
    }

    #[test]
    fn partial_barriers_use_indices() {
        let t = texture(2, 2);
        let range = SubresourceRange::new(Aspects::COLOR, 1..2, 0..2);
        let barriers = t.request_transition(&range, TextureUsageFlags::RENDER, Serial(1));
        let indices: Vec<_> = barriers
            .iter()
            .map(|b| match *b {
                Barrier::Transition { subresource, .. } => subresource,
                Barrier::Uav { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(
            indices,
            vec![BarrierSubresource::Index(2), BarrierSubresource::Index(3)]
        );
    }

    #[test]
    fn uniform_full_transition_is_one_barrier() {
        let t = texture(4, 3);
        // Split the state map, then bring it back to uniform.
        t.request_transition(
            &SubresourceRange::new(Aspects::COLOR, 0..2, 0..3),
            TextureUsageFlags::RENDER,
            Serial(1),
        );
        t.request_transition(
            &SubresourceRange::new(Aspects::COLOR, 2..4, 0..3),
            TextureUsageFlags::RENDER,
            Serial(1),
        );
        let barriers =
            t.request_transition(&t.full_range(), TextureUsageFlags::COPY_WRITE, Serial(1));
        assert_eq!(
            barriers,
            vec![Barrier::Transition {
                resource: t.id(),
                subresource: BarrierSubresource::All,
                before: ResourceStates::RENDER_TARGET,
                after: ResourceStates::COPY_DEST,
            }]
        );
    }

    #[test]
    fn reset_forgets_state() {
        let t = texture(1, 1);
        t.request_transition(&t.full_range(), TextureUsageFlags::RENDER, Serial(1));
        t.reset_state_to_common();
        assert_eq!(t.tracked_state(Aspects::COLOR, 0, 0), StateAndDecay::common());
    }

    #[test]
    fn invalid_textures() {
        let e = TextureBuilder::new().num_layers(0).build().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
        let e = TextureBuilder::new()
            .aspects(Aspects::DEPTH)
            .simultaneous_access(true)
            .build()
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotSupported);
    }
}
