//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Bind group layouts and the descriptor range planner.
//!
//! A layout's bindings are split into two descriptor tables: the *view*
//! table (`CbvSrvUav` heap) and the *sampler* table. Each binding gets an
//! offset within its table and a shader register equal to its binding number.
//! Runs of bindings with the same range type and contiguous registers share a
//! single [`DescriptorRange`].
use itertools::Itertools;
use std::sync::Arc;

use super::{translate_descriptor_range_type, BindingType, DescriptorCount, DescriptorRangeType};
use crate::limits::{MAX_SAMPLERS_PER_BIND_GROUP, MAX_VIEWS_PER_BIND_GROUP};
use zangfx_common::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutEntry {
    pub binding: u32,
    pub ty: BindingType,
}

/// `D3D12_DESCRIPTOR_RANGE`, minus the register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub ty: DescriptorRangeType,
    pub num_descriptors: u32,
    pub base_shader_register: u32,
    pub offset_in_table: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    View,
    Sampler,
}

/// Where a binding's descriptor goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingPlacement {
    Table {
        table: TableKind,
        ty: DescriptorRangeType,
        shader_register: u32,
        offset: u32,
    },
    /// Bound directly as a root descriptor. `index` counts the layout's
    /// dynamic-offset buffers in binding order.
    RootDescriptor {
        ty: DescriptorRangeType,
        shader_register: u32,
        index: u32,
    },
}

/// The result of [`plan_descriptor_ranges`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPlan {
    /// Sorted by binding number.
    bindings: Vec<(u32, BindingPlacement)>,
    view_ranges: Vec<DescriptorRange>,
    sampler_ranges: Vec<DescriptorRange>,
    count: DescriptorCount,
    num_root_descriptors: u32,
}

impl DescriptorPlan {
    pub fn placement(&self, binding: u32) -> Option<&BindingPlacement> {
        self.bindings
            .binary_search_by_key(&binding, |&(b, _)| b)
            .ok()
            .map(|i| &self.bindings[i].1)
    }

    pub fn bindings(&self) -> &[(u32, BindingPlacement)] {
        &self.bindings
    }

    pub fn view_ranges(&self) -> &[DescriptorRange] {
        &self.view_ranges
    }

    pub fn sampler_ranges(&self) -> &[DescriptorRange] {
        &self.sampler_ranges
    }

    /// The number of descriptors in tables, by range type. Root
    /// descriptors are not counted.
    pub fn count(&self) -> &DescriptorCount {
        &self.count
    }

    pub fn num_view_descriptors(&self) -> u32 {
        self.count.num_views()
    }

    pub fn num_sampler_descriptors(&self) -> u32 {
        self.count.num_samplers()
    }

    pub fn num_root_descriptors(&self) -> u32 {
        self.num_root_descriptors
    }
}

/// Compute the descriptor plan for a set of bindings.
///
/// The result depends only on the set of entries, not on their order.
/// Panics if a binding number appears twice.
pub fn plan_descriptor_ranges(entries: &[BindingLayoutEntry]) -> DescriptorPlan {
    let sorted: Vec<_> = entries.iter().sorted_by_key(|e| e.binding).collect();
    if let Some((a, _)) = sorted.iter().tuple_windows().find(|(a, b)| a.binding == b.binding) {
        panic!("duplicate binding number {}", a.binding);
    }

    let mut plan = DescriptorPlan {
        bindings: Vec::with_capacity(sorted.len()),
        view_ranges: Vec::new(),
        sampler_ranges: Vec::new(),
        count: DescriptorCount::new(),
        num_root_descriptors: 0,
    };

    for entry in sorted {
        let ty = translate_descriptor_range_type(entry.ty);
        let shader_register = entry.binding;

        if let BindingType::Buffer {
            has_dynamic_offset: true,
            ..
        } = entry.ty
        {
            plan.bindings.push((
                entry.binding,
                BindingPlacement::RootDescriptor {
                    ty,
                    shader_register,
                    index: plan.num_root_descriptors,
                },
            ));
            plan.num_root_descriptors += 1;
            continue;
        }

        let (table, ranges, offset) = if ty == DescriptorRangeType::Sampler {
            (TableKind::Sampler, &mut plan.sampler_ranges, plan.count.num_samplers())
        } else {
            (TableKind::View, &mut plan.view_ranges, plan.count.num_views())
        };
        plan.count[ty] += 1;

        match ranges.last_mut() {
            Some(prev)
                if prev.ty == ty
                    && prev.base_shader_register + prev.num_descriptors == shader_register =>
            {
                prev.num_descriptors += 1;
            }
            _ => ranges.push(DescriptorRange {
                ty,
                num_descriptors: 1,
                base_shader_register: shader_register,
                offset_in_table: offset,
            }),
        }

        plan.bindings.push((
            entry.binding,
            BindingPlacement::Table {
                table,
                ty,
                shader_register,
                offset,
            },
        ));
    }

    plan
}

/// Builds a [`BindGroupLayout`].
#[derive(Debug, Clone)]
pub struct BindGroupLayoutBuilder {
    entries: Vec<Option<BindingType>>,
    max_views: u32,
    max_samplers: u32,
    label: Option<String>,
}

impl Default for BindGroupLayoutBuilder {
    fn default() -> Self {
        Self::with_limits(MAX_VIEWS_PER_BIND_GROUP, MAX_SAMPLERS_PER_BIND_GROUP)
    }
}

impl BindGroupLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_limits(max_views: u32, max_samplers: u32) -> Self {
        Self {
            entries: Vec::new(),
            max_views,
            max_samplers,
            label: None,
        }
    }

    /// Define the binding `binding`, replacing an existing one if any.
    pub fn entry(&mut self, binding: u32, ty: BindingType) -> &mut Self {
        let index = binding as usize;
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(ty);
        self
    }

    pub fn label(&mut self, v: &str) -> &mut Self {
        self.label = Some(v.to_owned());
        self
    }

    pub fn build(&mut self) -> Result<BindGroupLayoutRef> {
        let entries: Vec<_> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(binding, ty)| {
                ty.map(|ty| BindingLayoutEntry {
                    binding: binding as u32,
                    ty,
                })
            })
            .collect();

        let plan = plan_descriptor_ranges(&entries);
        if plan.num_view_descriptors() > self.max_views {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                format!(
                    "{} view descriptors exceed the limit of {}",
                    plan.num_view_descriptors(),
                    self.max_views
                ),
            ));
        }
        if plan.num_sampler_descriptors() > self.max_samplers {
            return Err(Error::with_detail(
                ErrorKind::NotSupported,
                format!(
                    "{} samplers exceed the limit of {}",
                    plan.num_sampler_descriptors(),
                    self.max_samplers
                ),
            ));
        }

        Ok(Arc::new(BindGroupLayout {
            entries,
            plan,
            label: self.label.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct BindGroupLayout {
    /// Sorted by binding number.
    entries: Vec<BindingLayoutEntry>,
    plan: DescriptorPlan,
    label: Option<String>,
}

pub type BindGroupLayoutRef = Arc<BindGroupLayout>;

impl BindGroupLayout {
    pub fn entries(&self) -> &[BindingLayoutEntry] {
        &self.entries
    }

    pub fn entry(&self, binding: u32) -> Option<&BindingLayoutEntry> {
        self.entries
            .binary_search_by_key(&binding, |e| e.binding)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn plan(&self) -> &DescriptorPlan {
        &self.plan
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::{BufferBindingType, StorageTextureAccess};

    fn uniform(binding: u32) -> BindingLayoutEntry {
        BindingLayoutEntry {
            binding,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
            },
        }
    }

    fn texture(binding: u32) -> BindingLayoutEntry {
        BindingLayoutEntry {
            binding,
            ty: BindingType::Texture,
        }
    }

    fn sampler(binding: u32) -> BindingLayoutEntry {
        BindingLayoutEntry {
            binding,
            ty: BindingType::Sampler,
        }
    }

    #[test]
    fn contiguous_bindings_coalesce() {
        let plan = plan_descriptor_ranges(&[
            uniform(0),
            uniform(1),
            texture(2),
            texture(3),
            texture(5),
            sampler(4),
            sampler(6),
        ]);
        assert_eq!(
            plan.view_ranges(),
            &[
                DescriptorRange {
                    ty: DescriptorRangeType::Cbv,
                    num_descriptors: 2,
                    base_shader_register: 0,
                    offset_in_table: 0,
                },
                DescriptorRange {
                    ty: DescriptorRangeType::Srv,
                    num_descriptors: 2,
                    base_shader_register: 2,
                    offset_in_table: 2,
                },
                DescriptorRange {
                    ty: DescriptorRangeType::Srv,
                    num_descriptors: 1,
                    base_shader_register: 5,
                    offset_in_table: 4,
                },
            ]
        );
        assert_eq!(plan.sampler_ranges().len(), 2);
        assert_eq!(plan.num_view_descriptors(), 5);
        assert_eq!(plan.num_sampler_descriptors(), 2);
        assert_eq!(
            plan.placement(6),
            Some(&BindingPlacement::Table {
                table: TableKind::Sampler,
                ty: DescriptorRangeType::Sampler,
                shader_register: 6,
                offset: 1,
            })
        );
    }

    #[test]
    fn dynamic_buffers_are_root_descriptors() {
        let plan = plan_descriptor_ranges(&[
            uniform(0),
            BindingLayoutEntry {
                binding: 1,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Storage,
                    has_dynamic_offset: true,
                },
            },
            BindingLayoutEntry {
                binding: 2,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                },
            },
        ]);
        assert_eq!(plan.num_root_descriptors(), 1);
        assert_eq!(plan.num_view_descriptors(), 2);
        assert_eq!(
            plan.placement(1),
            Some(&BindingPlacement::RootDescriptor {
                ty: DescriptorRangeType::Uav,
                shader_register: 1,
                index: 0,
            })
        );
        assert_eq!(
            plan.placement(2),
            Some(&BindingPlacement::Table {
                table: TableKind::View,
                ty: DescriptorRangeType::Uav,
                shader_register: 2,
                offset: 1,
            })
        );
    }

    #[test]
    fn order_independent() {
        let a = plan_descriptor_ranges(&[sampler(3), texture(1), uniform(0), texture(2)]);
        let b = plan_descriptor_ranges(&[uniform(0), texture(1), texture(2), sampler(3)]);
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic]
    fn duplicate_bindings() {
        plan_descriptor_ranges(&[uniform(0), texture(0)]);
    }

    #[test]
    fn limits_are_enforced() {
        let mut builder = BindGroupLayoutBuilder::with_limits(2, 1);
        builder.entry(0, BindingType::Texture).entry(1, BindingType::Texture);
        assert!(builder.build().is_ok());
        builder.entry(2, BindingType::Texture);
        assert_eq!(builder.build().unwrap_err().kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn builder_replaces_entries() {
        let layout = BindGroupLayoutBuilder::new()
            .entry(3, BindingType::Texture)
            .entry(3, BindingType::Sampler)
            .build()
            .unwrap();
        assert_eq!(layout.entries().len(), 1);
        assert_eq!(layout.entry(3).unwrap().ty, BindingType::Sampler);
        assert_eq!(layout.plan().num_sampler_descriptors(), 1);
    }
}
