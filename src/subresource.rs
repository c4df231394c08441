//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Subresource ranges and per-subresource storage.
//!
//! A texture's subresources form a three dimensional space: aspect, array
//! layer, and mipmap level. [`SubresourceStorage`] associates a value with
//! every subresource without storing one value per subresource. An aspect
//! holding a single value is stored as that value. Otherwise each (aspect, mip
//! level) pair is a *plane*, and each plane holds a sorted list of
//! non-overlapping runs of array layers. Large textures mostly share a single
//! state, so the number of runs stays proportional to the number of distinct
//! states.
use bitflags::bitflags;
use smallvec::SmallVec;
use std::ops::Range;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Aspects: u8 {
        const COLOR = 0b001;
        const DEPTH = 0b010;
        const STENCIL = 0b100;
    }
}

/// Identifies a rectangular region of a resource's subresources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub aspects: Aspects,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub base_mip_level: u32,
    pub level_count: u32,
}

impl SubresourceRange {
    pub fn new(aspects: Aspects, layers: Range<u32>, mip_levels: Range<u32>) -> Self {
        assert!(layers.start <= layers.end && mip_levels.start <= mip_levels.end);
        Self {
            aspects,
            base_array_layer: layers.start,
            layer_count: layers.end - layers.start,
            base_mip_level: mip_levels.start,
            level_count: mip_levels.end - mip_levels.start,
        }
    }

    pub fn single(aspect: Aspects, array_layer: u32, mip_level: u32) -> Self {
        Self::new(aspect, array_layer..array_layer + 1, mip_level..mip_level + 1)
    }

    pub fn layers(&self) -> Range<u32> {
        self.base_array_layer..self.base_array_layer + self.layer_count
    }

    pub fn mip_levels(&self) -> Range<u32> {
        self.base_mip_level..self.base_mip_level + self.level_count
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty() || self.layer_count == 0 || self.level_count == 0
    }

    /// The number of subresources in the range.
    pub fn num_subresources(&self) -> u32 {
        self.aspects.bits().count_ones() * self.layer_count * self.level_count
    }

    pub fn intersects(&self, other: &Self) -> bool {
        fn overlap(a: Range<u32>, b: Range<u32>) -> bool {
            a.start < b.end && b.start < a.end
        }
        self.aspects.intersects(other.aspects)
            && overlap(self.layers(), other.layers())
            && overlap(self.mip_levels(), other.mip_levels())
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.aspects.contains(other.aspects)
            && self.base_array_layer <= other.base_array_layer
            && other.layers().end <= self.layers().end
            && self.base_mip_level <= other.base_mip_level
            && other.mip_levels().end <= self.mip_levels().end
    }
}

/// A sorted run list covering `0..num_layers` of a single plane.
#[derive(Debug, Clone, PartialEq)]
struct LayerRuns<T> {
    runs: SmallVec<[(Range<u32>, T); 1]>,
}

impl<T: Clone + PartialEq> LayerRuns<T> {
    fn new(num_layers: u32, value: T) -> Self {
        let mut runs = SmallVec::new();
        runs.push((0..num_layers, value));
        Self { runs }
    }

    /// Split runs so that `layers` is covered by a contiguous set of runs and
    /// return that set.
    fn isolate(&mut self, layers: &Range<u32>) -> &mut [(Range<u32>, T)] {
        debug_assert!(layers.start < layers.end);

        let mut start_pos = self
            .runs
            .iter()
            .position(|(range, _)| range.end > layers.start)
            .expect("layer out of range");

        if self.runs[start_pos].0.start < layers.start {
            let (range, value) = self.runs[start_pos].clone();
            self.runs[start_pos].0.end = layers.start;
            self.runs
                .insert(start_pos + 1, (layers.start..range.end, value));
            start_pos += 1;
        }

        let mut end_pos = start_pos;
        loop {
            let range = self.runs[end_pos].0.clone();
            if range.end > layers.end {
                let value = self.runs[end_pos].1.clone();
                self.runs[end_pos].0.end = layers.end;
                self.runs.insert(end_pos + 1, (layers.end..range.end, value));
            }
            end_pos += 1;
            if range.end >= layers.end {
                break;
            }
        }

        &mut self.runs[start_pos..end_pos]
    }

    /// Merge adjacent runs holding equal values.
    fn coalesce(&mut self) {
        let mut i = 1;
        while i < self.runs.len() {
            if self.runs[i - 1].1 == self.runs[i].1 {
                let end = self.runs[i].0.end;
                self.runs[i - 1].0.end = end;
                self.runs.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn single_value(&self) -> Option<&T> {
        if self.runs.len() == 1 {
            Some(&self.runs[0].1)
        } else {
            None
        }
    }
}

/// The values of a single aspect.
#[derive(Debug, Clone, PartialEq)]
enum AspectData<T> {
    /// Every subresource of the aspect holds the same value.
    Uniform(T),
    /// One run list per mipmap level.
    Mips(Vec<LayerRuns<T>>),
}

impl<T: Clone + PartialEq> AspectData<T> {
    fn uniform_value(&self) -> Option<&T> {
        match *self {
            AspectData::Uniform(ref value) => Some(value),
            AspectData::Mips(_) => None,
        }
    }

    fn num_runs(&self) -> usize {
        match *self {
            AspectData::Uniform(_) => 1,
            AspectData::Mips(ref mips) => mips.iter().map(|p| p.runs.len()).sum(),
        }
    }

    /// Expand into per-mip run lists.
    fn decompress(&mut self, num_layers: u32, num_mip_levels: u32) -> &mut [LayerRuns<T>] {
        if let AspectData::Uniform(ref value) = *self {
            let mips = (0..num_mip_levels)
                .map(|_| LayerRuns::new(num_layers, value.clone()))
                .collect();
            *self = AspectData::Mips(mips);
        }
        match *self {
            AspectData::Mips(ref mut mips) => mips,
            AspectData::Uniform(_) => unreachable!(),
        }
    }

    /// Collapse into `Uniform` if every subresource holds the same value.
    fn recompress(&mut self) {
        let value = match *self {
            AspectData::Mips(ref mips) => {
                let first = match mips[0].single_value() {
                    Some(x) => x,
                    None => return,
                };
                if !mips[1..].iter().all(|p| p.single_value() == Some(first)) {
                    return;
                }
                first.clone()
            }
            AspectData::Uniform(_) => return,
        };
        *self = AspectData::Uniform(value);
    }
}

/// Stores a value of type `T` for every subresource of a texture.
///
/// An aspect whose subresources all hold the same value is stored as a single
/// value. Otherwise each of its mipmap levels holds a run list.
#[derive(Debug, Clone, PartialEq)]
pub struct SubresourceStorage<T> {
    aspects: Aspects,
    num_layers: u32,
    num_mip_levels: u32,
    /// Indexed by the position of the aspect bit within `aspects`.
    data: SmallVec<[AspectData<T>; 2]>,
}

impl<T: Clone + PartialEq> SubresourceStorage<T> {
    pub fn new(aspects: Aspects, num_layers: u32, num_mip_levels: u32, value: T) -> Self {
        assert!(!aspects.is_empty(), "no aspects");
        assert!(num_layers > 0 && num_mip_levels > 0, "empty subresource space");
        Self {
            aspects,
            num_layers,
            num_mip_levels,
            data: (0..aspects.bits().count_ones())
                .map(|_| AspectData::Uniform(value.clone()))
                .collect(),
        }
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

    /// The range covering every subresource.
    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange::new(self.aspects, 0..self.num_layers, 0..self.num_mip_levels)
    }

    fn aspect_index(&self, aspect: Aspects) -> usize {
        debug_assert_eq!(aspect.bits().count_ones(), 1);
        (self.aspects.bits() & (aspect.bits() - 1)).count_ones() as usize
    }

    fn aspect_range(&self, aspect: Aspects) -> SubresourceRange {
        SubresourceRange::new(aspect, 0..self.num_layers, 0..self.num_mip_levels)
    }

    fn check_range(&self, range: &SubresourceRange) {
        assert!(
            self.full_range().contains(range),
            "subresource range {:?} is out of bounds (aspects {:?}, {} layers, {} mips)",
            range,
            self.aspects,
            self.num_layers,
            self.num_mip_levels
        );
    }

    /// Returns the value shared by every subresource, if there is one.
    pub fn uniform_value(&self) -> Option<&T> {
        let first = self.data[0].uniform_value()?;
        if self.data[1..]
            .iter()
            .all(|d| d.uniform_value() == Some(first))
        {
            Some(first)
        } else {
            None
        }
    }

    /// Replace every value with `value`.
    pub fn fill(&mut self, value: T) {
        for data in self.data.iter_mut() {
            *data = AspectData::Uniform(value.clone());
        }
    }

    pub fn get(&self, aspect: Aspects, array_layer: u32, mip_level: u32) -> &T {
        self.check_range(&SubresourceRange::single(aspect, array_layer, mip_level));
        match self.data[self.aspect_index(aspect)] {
            AspectData::Uniform(ref value) => value,
            AspectData::Mips(ref mips) => mips[mip_level as usize]
                .runs
                .iter()
                .find(|(range, _)| range.contains(&array_layer))
                .map(|(_, value)| value)
                .expect("layer runs must cover every layer"),
        }
    }

    /// Call `f` for every run of `range`, giving it mutable access to the
    /// stored value. Each subresource of `range` is visited exactly once.
    ///
    /// Panics if `range` is not within the storage's bounds.
    pub fn update(&mut self, range: &SubresourceRange, mut f: impl FnMut(&SubresourceRange, &mut T)) {
        self.check_range(range);
        if range.is_empty() {
            return;
        }

        if *range == self.full_range() {
            if let Some(value) = self.uniform_value() {
                let mut value = value.clone();
                f(range, &mut value);
                self.fill(value);
                return;
            }
        }

        let (num_layers, num_mip_levels) = (self.num_layers, self.num_mip_levels);
        let layers = range.layers();
        let covers_aspect =
            layers == (0..num_layers) && range.mip_levels() == (0..num_mip_levels);
        for aspect in range.aspects.iter() {
            let aspect_range = self.aspect_range(aspect);
            let index = self.aspect_index(aspect);
            let data = &mut self.data[index];

            if covers_aspect {
                if let AspectData::Uniform(ref mut value) = *data {
                    f(&aspect_range, value);
                    continue;
                }
            }

            let mips = data.decompress(num_layers, num_mip_levels);
            for mip_level in range.mip_levels() {
                let plane = &mut mips[mip_level as usize];
                for (run, value) in plane.isolate(&layers).iter_mut() {
                    let sub = SubresourceRange::new(aspect, run.clone(), mip_level..mip_level + 1);
                    f(&sub, value);
                }
                plane.coalesce();
            }
            data.recompress();
        }
    }

    /// Call `f` for every run of the intersection of `self` and `other`'s run
    /// boundaries. `other` must have the same dimensions as `self`.
    pub fn merge<U: Clone + PartialEq>(
        &mut self,
        other: &SubresourceStorage<U>,
        mut f: impl FnMut(&SubresourceRange, &mut T, &U),
    ) {
        assert!(
            self.aspects == other.aspects
                && self.num_layers == other.num_layers
                && self.num_mip_levels == other.num_mip_levels,
            "subresource storage dimensions mismatch"
        );

        if let (Some(value), Some(other_value)) = (self.uniform_value(), other.uniform_value()) {
            let mut value = value.clone();
            f(&self.full_range(), &mut value, other_value);
            self.fill(value);
            return;
        }

        let (num_layers, num_mip_levels) = (self.num_layers, self.num_mip_levels);
        for aspect in self.aspects.iter() {
            let aspect_range = self.aspect_range(aspect);
            let index = self.aspect_index(aspect);
            let data = &mut self.data[index];

            let other_mips = match other.data[index] {
                AspectData::Uniform(ref other_value) => {
                    if let AspectData::Uniform(ref mut value) = *data {
                        f(&aspect_range, value, other_value);
                        continue;
                    }
                    None
                }
                AspectData::Mips(ref other_mips) => Some(other_mips),
            };

            let mips = data.decompress(num_layers, num_mip_levels);
            for (mip_level, plane) in (0..num_mip_levels).zip(mips.iter_mut()) {
                let whole_plane;
                let other_runs: &[(Range<u32>, U)] = match other_mips {
                    Some(other_mips) => &other_mips[mip_level as usize].runs,
                    None => {
                        whole_plane = [(0..num_layers, other.get(aspect, 0, mip_level).clone())];
                        &whole_plane
                    }
                };
                for (other_run, other_value) in other_runs.iter() {
                    for (run, value) in plane.isolate(other_run).iter_mut() {
                        let sub =
                            SubresourceRange::new(aspect, run.clone(), mip_level..mip_level + 1);
                        f(&sub, value, other_value);
                    }
                }
                plane.coalesce();
            }
            data.recompress();
        }
    }

    /// Iterate over every stored run.
    pub fn iter(&self) -> impl Iterator<Item = (SubresourceRange, &T)> + '_ {
        if let Some(value) = self.uniform_value() {
            return itertools::Either::Left(std::iter::once((self.full_range(), value)));
        }
        itertools::Either::Right(self.aspects.iter().zip(self.data.iter()).flat_map(
            move |(aspect, data)| match *data {
                AspectData::Uniform(ref value) => itertools::Either::Left(std::iter::once((
                    self.aspect_range(aspect),
                    value,
                ))),
                AspectData::Mips(ref mips) => {
                    itertools::Either::Right((0u32..).zip(mips.iter()).flat_map(
                        move |(mip_level, plane)| {
                            plane.runs.iter().map(move |(run, value)| {
                                (
                                    SubresourceRange::new(
                                        aspect,
                                        run.clone(),
                                        mip_level..mip_level + 1,
                                    ),
                                    value,
                                )
                            })
                        },
                    ))
                }
            },
        ))
    }

    /// The number of stored runs. Used to observe compaction.
    pub fn num_runs(&self) -> usize {
        self.data.iter().map(AspectData::num_runs).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(layers: Range<u32>, mips: Range<u32>) -> SubresourceRange {
        SubresourceRange::new(Aspects::COLOR, layers, mips)
    }

    #[test]
    fn update_visits_each_subresource_once() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 8, 4, 0u32);
        let mut visited = 0;
        s.update(&color(2..5, 1..3), |r, v| {
            visited += r.num_subresources();
            *v += 1;
        });
        assert_eq!(visited, 3 * 2);

        for layer in 0..8 {
            for mip in 0..4 {
                let expected = (2..5).contains(&layer) && (1..3).contains(&mip);
                assert_eq!(*s.get(Aspects::COLOR, layer, mip), expected as u32);
            }
        }
    }

    #[test]
    fn uniform_full_range_is_visited_once() {
        let mut s = SubresourceStorage::new(Aspects::DEPTH | Aspects::STENCIL, 6, 10, 'a');
        let full = s.full_range();
        let mut calls = Vec::new();
        s.update(&full, |r, v| {
            calls.push(*r);
            *v = 'b';
        });
        assert_eq!(calls, vec![full]);
        assert_eq!(s.uniform_value(), Some(&'b'));
        assert_eq!(s.num_runs(), 2);
    }

    #[test]
    fn uniform_aspects_are_compressed() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 6, 12, 0u8);
        assert_eq!(s.num_runs(), 1);

        s.update(&color(2..4, 5..6), |_, v| *v = 1);
        assert_eq!(s.num_runs(), 12 + 2);
        assert_eq!(*s.get(Aspects::COLOR, 3, 5), 1);
        assert_eq!(*s.get(Aspects::COLOR, 3, 4), 0);

        s.update(&color(2..4, 5..6), |_, v| *v = 0);
        assert_eq!(s.num_runs(), 1);
        assert_eq!(s.uniform_value(), Some(&0));
    }

    #[test]
    fn whole_aspect_is_visited_once() {
        let mut s = SubresourceStorage::new(Aspects::DEPTH | Aspects::STENCIL, 4, 8, 0u8);
        s.update(&SubresourceRange::new(Aspects::DEPTH, 0..4, 3..4), |_, v| *v = 1);

        let full = s.full_range();
        let mut calls = Vec::new();
        s.update(&full, |r, v| {
            calls.push(*r);
            *v += 1;
        });
        // Depth is split per mip; stencil is still a single value
        assert_eq!(calls.len(), 8 + 1);
        assert_eq!(
            calls.last(),
            Some(&SubresourceRange::new(Aspects::STENCIL, 0..4, 0..8))
        );
        assert_eq!(s.num_runs(), 8 + 1);
        assert_eq!(*s.get(Aspects::DEPTH, 0, 3), 2);
        assert_eq!(*s.get(Aspects::STENCIL, 0, 3), 1);
    }

    #[test]
    fn merge_with_uniform_aspect() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 4, 2, 0u32);
        s.update(&color(0..1, 1..2), |_, v| *v = 5);
        let usage = SubresourceStorage::new(Aspects::COLOR, 4, 2, 1u32);

        let mut visited = 0;
        s.merge(&usage, |r, v, u| {
            visited += r.num_subresources();
            *v += *u;
        });
        assert_eq!(visited, 8);
        assert_eq!(*s.get(Aspects::COLOR, 0, 1), 6);
        assert_eq!(*s.get(Aspects::COLOR, 3, 0), 1);
        assert_eq!(s.num_runs(), 3);
    }

    #[test]
    fn runs_coalesce_back() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 16, 1, 0u8);
        s.update(&color(3..7, 0..1), |_, v| *v = 1);
        assert_eq!(s.num_runs(), 3);
        s.update(&color(0..3, 0..1), |_, v| *v = 1);
        assert_eq!(s.num_runs(), 2);
        s.update(&color(7..16, 0..1), |_, v| *v = 1);
        assert_eq!(s.num_runs(), 1);
        assert_eq!(s.uniform_value(), Some(&1));
    }

    #[test]
    fn aspects_are_independent() {
        let mut s = SubresourceStorage::new(Aspects::DEPTH | Aspects::STENCIL, 2, 2, 0u8);
        s.update(&SubresourceRange::new(Aspects::STENCIL, 0..2, 0..2), |r, v| {
            assert_eq!(r.aspects, Aspects::STENCIL);
            *v = 7;
        });
        assert_eq!(*s.get(Aspects::DEPTH, 1, 1), 0);
        assert_eq!(*s.get(Aspects::STENCIL, 1, 1), 7);
    }

    #[test]
    fn merge_follows_other_boundaries() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 8, 2, 0u32);
        let mut usage = SubresourceStorage::new(Aspects::COLOR, 8, 2, 0u32);
        usage.update(&color(1..3, 0..1), |_, v| *v = 10);
        usage.update(&color(5..8, 1..2), |_, v| *v = 20);

        let mut visited = 0;
        s.merge(&usage, |r, v, u| {
            visited += r.num_subresources();
            *v += *u;
        });
        assert_eq!(visited, 16);
        assert_eq!(*s.get(Aspects::COLOR, 2, 0), 10);
        assert_eq!(*s.get(Aspects::COLOR, 3, 0), 0);
        assert_eq!(*s.get(Aspects::COLOR, 6, 1), 20);
        assert_eq!(*s.get(Aspects::COLOR, 6, 0), 0);
    }

    #[test]
    fn iter_covers_everything() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 4, 3, false);
        s.update(&color(1..2, 2..3), |_, v| *v = true);
        let total: u32 = s.iter().map(|(r, _)| r.num_subresources()).sum();
        assert_eq!(total, 12);
        let set: Vec<_> = s.iter().filter(|(_, v)| **v).map(|(r, _)| r).collect();
        assert_eq!(set, vec![color(1..2, 2..3)]);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_range_is_fatal() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 4, 1, 0u8);
        s.update(&color(2..5, 0..1), |_, _| {});
    }

    #[test]
    #[should_panic]
    fn missing_aspect_is_fatal() {
        let mut s = SubresourceStorage::new(Aspects::COLOR, 4, 1, 0u8);
        s.update(&SubresourceRange::new(Aspects::DEPTH, 0..1, 0..1), |_, _| {});
    }

    #[test]
    fn range_predicates() {
        let a = color(0..4, 0..2);
        assert!(a.intersects(&color(3..5, 1..2)));
        assert!(!a.intersects(&color(4..5, 0..2)));
        assert!(!a.intersects(&SubresourceRange::new(Aspects::DEPTH, 0..4, 0..2)));
        assert!(a.contains(&color(1..3, 1..2)));
        assert!(!a.contains(&color(1..5, 1..2)));
        assert_eq!(a.num_subresources(), 8);
    }
}
