//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Resource usage tracking for passes.
//!
//! Within a render or compute pass, resources cannot be transitioned between
//! draws. Every usage in the pass is therefore accumulated first, and the
//! barriers for the combined usage are emitted once before the pass begins.
use std::collections::HashMap;
use tracing::trace;

use crate::arg::table::{BindGroup, BindingResource};
use crate::arg::{BindingType, BufferBindingType, StorageTextureAccess};
use crate::buffer::{BufferRef, BufferUsageFlags};
use crate::image::{TextureRef, TextureUsageFlags};
use crate::native::ResourceId;
use crate::resstate::Barrier;
use crate::subresource::{SubresourceRange, SubresourceStorage};
use zangfx_common::Serial;

/// Accumulates the usage of resources in a single pass.
#[derive(Debug, Default)]
pub struct PassResourceUsage {
    /// In the order of first use.
    textures: Vec<(TextureRef, SubresourceStorage<TextureUsageFlags>)>,
    texture_map: HashMap<ResourceId, usize>,
    /// In the order of first use.
    buffers: Vec<(BufferRef, BufferUsageFlags)>,
    buffer_map: HashMap<ResourceId, usize>,
}

impl PassResourceUsage {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty()
    }

    pub fn num_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Record that `range` of `texture` is used as `usage` in the pass.
    pub fn use_texture(
        &mut self,
        texture: &TextureRef,
        range: &SubresourceRange,
        usage: TextureUsageFlags,
    ) {
        let textures = &mut self.textures;
        let index = *self.texture_map.entry(texture.id()).or_insert_with(|| {
            textures.push((
                texture.clone(),
                SubresourceStorage::new(
                    texture.aspects(),
                    texture.num_layers(),
                    texture.num_mip_levels(),
                    TextureUsageFlags::empty(),
                ),
            ));
            textures.len() - 1
        });
        self.textures[index].1.update(range, |_, x| *x |= usage);
    }

    /// Record that `buffer` is used as `usage` in the pass.
    pub fn use_buffer(&mut self, buffer: &BufferRef, usage: BufferUsageFlags) {
        let buffers = &mut self.buffers;
        let index = *self.buffer_map.entry(buffer.id()).or_insert_with(|| {
            buffers.push((buffer.clone(), BufferUsageFlags::empty()));
            buffers.len() - 1
        });
        self.buffers[index].1 |= usage;
    }

    /// Record the usage of every resource referenced by `group`.
    pub fn use_bind_group(&mut self, group: &BindGroup) {
        for entry in group.entries() {
            let ty = group
                .layout()
                .entry(entry.binding)
                .expect("bind group entry without a layout entry")
                .ty;
            match (&entry.resource, ty) {
                (&BindingResource::Buffer { ref buffer, .. }, BindingType::Buffer { ty, .. }) => {
                    let usage = match ty {
                        BufferBindingType::Uniform => BufferUsageFlags::UNIFORM,
                        BufferBindingType::Storage => BufferUsageFlags::STORAGE,
                        BufferBindingType::ReadOnlyStorage => BufferUsageFlags::STORAGE_READ,
                    };
                    self.use_buffer(buffer, usage);
                }
                (&BindingResource::Texture { ref texture, range }, BindingType::Texture) => {
                    self.use_texture(texture, &range, TextureUsageFlags::SAMPLED);
                }
                (
                    &BindingResource::Texture { ref texture, range },
                    BindingType::StorageTexture { access },
                ) => {
                    let usage = match access {
                        StorageTextureAccess::ReadOnly => TextureUsageFlags::STORAGE_READ,
                        StorageTextureAccess::WriteOnly | StorageTextureAccess::ReadWrite => {
                            TextureUsageFlags::STORAGE
                        }
                    };
                    self.use_texture(texture, &range, usage);
                }
                (&BindingResource::Sampler(_), BindingType::Sampler) => {}
                _ => unreachable!(),
            }
        }
    }

    /// Update the tracked states of all recorded resources and return the
    /// barriers to be inserted before the pass. The recorded usage is
    /// cleared.
    pub fn commit(&mut self, pending: Serial) -> Vec<Barrier> {
        let mut barriers = Vec::new();
        for (texture, usage) in self.textures.drain(..) {
            texture.merge_for_pass(&mut barriers, &usage, pending);
        }
        for (buffer, usage) in self.buffers.drain(..) {
            buffer.track_usage(&mut barriers, usage, pending);
        }
        self.texture_map.clear();
        self.buffer_map.clear();

        trace!(num_barriers = barriers.len(), ?pending, "committed pass usage");
        barriers
    }
}
