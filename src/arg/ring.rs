//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A FIFO ring allocator whose allocations are released in bulk by serial.
use xalloc::{Ring, RingRegion};
use zangfx_common::{Serial, SerialQueue};

/// Wraps `xalloc::Ring`. Space allocated for serial `s` is reclaimed by
/// `deallocate(c)` once `s <= c`.
///
/// Serials passed to `allocate` must be non-decreasing.
#[derive(Debug)]
pub struct RingBufferAllocator {
    ring: Ring<u32>,
    in_flight: SerialQueue<RingRegion<u32>>,
}

impl RingBufferAllocator {
    pub fn new(size: u32) -> Self {
        Self {
            ring: Ring::new(size),
            in_flight: SerialQueue::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Allocate `size` contiguous units for serial `serial`. Returns the
    /// start offset, or `None` if there is no room.
    pub fn allocate(&mut self, size: u32, serial: Serial) -> Option<u32> {
        assert_ne!(size, 0, "zero-sized allocation");
        let (region, offset) = self.ring.alloc_back(size)?;
        self.in_flight.enqueue(region, serial);
        Some(offset)
    }

    /// Reclaim the space of every allocation whose serial is `<= completed`.
    pub fn deallocate(&mut self, completed: Serial) {
        for region in self.in_flight.drain_up_to(completed) {
            self.ring.dealloc_front(region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn fill_and_reclaim() {
        let mut ring = RingBufferAllocator::new(16);
        assert_eq!(ring.allocate(4, Serial(1)), Some(0));
        assert_eq!(ring.allocate(4, Serial(2)), Some(4));
        assert_eq!(ring.allocate(4, Serial(2)), Some(8));
        assert_eq!(ring.allocate(9, Serial(2)), None);

        ring.deallocate(Serial(1));
        assert!(!ring.is_empty());
        ring.deallocate(Serial(2));
        assert!(ring.is_empty());
    }

    #[test]
    fn wraps_around() {
        let mut ring = RingBufferAllocator::new(10);
        assert_eq!(ring.allocate(6, Serial(1)), Some(0));
        assert_eq!(ring.allocate(2, Serial(2)), Some(6));
        ring.deallocate(Serial(1));

        // 2 units left at the tail; 3 do not fit there
        assert_eq!(ring.allocate(3, Serial(3)), Some(0));
        ring.deallocate(Serial(3));
        assert!(ring.is_empty());
    }

    #[test]
    fn oversized_requests() {
        let mut ring = RingBufferAllocator::new(4);
        assert_eq!(ring.allocate(5, Serial(1)), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn live_allocations_never_overlap() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ring = RingBufferAllocator::new(64);
        let mut live: Vec<(Serial, u32, u32)> = Vec::new();
        let mut serial = 1;
        let mut completed = 0;

        for _ in 0..5000 {
            match rng.gen_range(0..10) {
                0..=5 => {
                    let size = *[1, 3, 8, 17].choose(&mut rng).unwrap();
                    if let Some(start) = ring.allocate(size, Serial(serial)) {
                        assert!(start + size <= 64);
                        for &(_, s, e) in &live {
                            assert!(start + size <= s || e <= start);
                        }
                        live.push((Serial(serial), start, start + size));
                    }
                }
                6..=7 => serial += 1,
                _ => {
                    if completed < serial {
                        completed += 1;
                        ring.deallocate(Serial(completed));
                        live.retain(|&(s, _, _)| s > Serial(completed));
                    }
                }
            }
        }

        ring.deallocate(Serial(serial));
        assert!(ring.is_empty());
    }
}
