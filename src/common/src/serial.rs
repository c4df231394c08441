//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Submission serials and serial-ordered queues.
use std::collections::VecDeque;
use std::fmt;

/// A monotonically increasing counter identifying a batch of GPU work.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Serial(pub u64);

impl Serial {
    pub const ZERO: Self = Serial(0);

    /// A serial that is never reached by any submission.
    pub const MAX: Self = Serial(u64::max_value());

    pub fn next(self) -> Self {
        Serial(self.0.checked_add(1).expect("serial overflow"))
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Serial::MAX {
            write!(f, "Serial(MAX)")
        } else {
            write!(f, "Serial({})", self.0)
        }
    }
}

/// A FIFO of values tagged with the serial they belong to.
///
/// Serials must be enqueued in non-decreasing order.
#[derive(Debug, Clone)]
pub struct SerialQueue<T> {
    items: VecDeque<(Serial, T)>,
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> SerialQueue<T> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn enqueue(&mut self, value: T, serial: Serial) {
        if let Some(&(last, _)) = self.items.back() {
            assert!(serial >= last, "serials must be enqueued in order");
        }
        self.items.push_back((serial, value));
    }

    /// Remove and return every value whose serial is `<= serial`, oldest
    /// first.
    pub fn drain_up_to(&mut self, serial: Serial) -> impl Iterator<Item = T> + '_ {
        let count = self
            .items
            .iter()
            .position(|&(s, _)| s > serial)
            .unwrap_or(self.items.len());
        self.items.drain(..count).map(|(_, x)| x)
    }

    /// The serial of the oldest value.
    pub fn first_serial(&self) -> Option<Serial> {
        self.items.front().map(|&(s, _)| s)
    }

    /// The serial of the newest value.
    pub fn last_serial(&self) -> Option<Serial> {
        self.items.back().map(|&(s, _)| s)
    }

    /// Remove the oldest value if its serial is `<= serial`.
    pub fn pop_front_if_completed(&mut self, serial: Serial) -> Option<T> {
        match self.items.front() {
            Some(&(s, _)) if s <= serial => self.items.pop_front().map(|(_, x)| x),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Serial, &T)> {
        self.items.iter().map(|&(s, ref x)| (s, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_inclusive_and_ordered() {
        let mut q = SerialQueue::new();
        q.enqueue("a", Serial(1));
        q.enqueue("b", Serial(2));
        q.enqueue("c", Serial(2));
        q.enqueue("d", Serial(5));

        assert_eq!(q.drain_up_to(Serial(0)).count(), 0);
        assert_eq!(q.drain_up_to(Serial(2)).collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(q.first_serial(), Some(Serial(5)));
        assert_eq!(q.pop_front_if_completed(Serial(4)), None);
        assert_eq!(q.pop_front_if_completed(Serial(5)), Some("d"));
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic]
    fn out_of_order_enqueue() {
        let mut q = SerialQueue::new();
        q.enqueue((), Serial(3));
        q.enqueue((), Serial(2));
    }

    #[test]
    fn max_is_never_reached() {
        assert!(Serial(u64::max_value() - 1) < Serial::MAX);
        assert_eq!(format!("{:?}", Serial::MAX), "Serial(MAX)");
    }
}
