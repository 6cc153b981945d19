//! Fixed-capacity circular sample history.
//!
//! The ring is a preallocated arena of [`RingNode`]s addressed by index.
//! Every tick the current index moves forward one slot and that slot is
//! recycled for the new sample, overwriting the oldest entry.

use crate::acquisition::Reading;
use crate::core::page::Timestamps;

/// One slot of the ring.
#[derive(Debug, Clone)]
pub struct RingNode {
    pub step: u64,
    pub time: Timestamps,
    /// One value vector per recorded channel
    pub values: Vec<Vec<f64>>,
    /// False when the slot holds nothing that may be written out
    pub has_data: bool,
}

impl RingNode {
    fn empty(elements: &[usize]) -> Self {
        Self {
            step: 0,
            time: Timestamps::default(),
            values: elements.iter().map(|&n| vec![f64::NAN; n]).collect(),
            has_data: false,
        }
    }
}

/// Circular buffer of `capacity` nodes.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    nodes: Vec<RingNode>,
    current: usize,
}

impl RingBuffer {
    /// Create a ring whose nodes hold one vector per entry of `elements`.
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize, elements: &[usize]) -> Self {
        let capacity = capacity.max(1);
        Self {
            nodes: (0..capacity).map(|_| RingNode::empty(elements)).collect(),
            // The first advance lands on slot 0.
            current: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Move to the next slot and stamp it; the slot starts out empty.
    pub fn advance(&mut self, step: u64, time: Timestamps) {
        self.current = (self.current + 1) % self.nodes.len();
        let node = &mut self.nodes[self.current];
        node.step = step;
        node.time = time;
        node.has_data = false;
    }

    /// Copy readings into the current slot and mark it as holding data.
    pub fn store<'a, I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        let node = &mut self.nodes[self.current];
        for (slot, reading) in node.values.iter_mut().zip(readings) {
            let width = slot.len();
            slot.clear();
            slot.extend(reading.values.iter().copied().take(width));
            // Short vectors are padded so every row keeps the column width.
            slot.resize(width, f64::NAN);
        }
        node.has_data = true;
    }

    pub fn current(&self) -> &RingNode {
        &self.nodes[self.current]
    }

    /// Nodes from oldest to newest, ending with the current one.
    pub fn chronological(&self) -> impl Iterator<Item = &RingNode> {
        let len = self.nodes.len();
        let start = (self.current + 1) % len;
        (0..len).map(move |i| &self.nodes[(start + i) % len])
    }

    /// Number of slots currently holding data.
    pub fn buffered(&self) -> usize {
        self.nodes.iter().filter(|n| n.has_data).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Severity;

    fn r(v: f64) -> Reading {
        Reading::new(vec![v], Severity::NoAlarm)
    }

    fn push(ring: &mut RingBuffer, step: u64) {
        ring.advance(step, Timestamps::default());
        ring.store([&r(step as f64)]);
    }

    #[test]
    fn test_overwrites_oldest() {
        let mut ring = RingBuffer::new(3, &[1]);
        for step in 1..=5 {
            push(&mut ring, step);
        }
        let steps: Vec<u64> = ring.chronological().map(|n| n.step).collect();
        assert_eq!(steps, vec![3, 4, 5]);
        assert_eq!(ring.current().step, 5);
        assert_eq!(ring.current().values[0], vec![5.0]);
    }

    #[test]
    fn test_partial_fill_keeps_empty_slots() {
        let mut ring = RingBuffer::new(4, &[1]);
        push(&mut ring, 1);
        push(&mut ring, 2);
        assert_eq!(ring.buffered(), 2);
        let flags: Vec<bool> = ring.chronological().map(|n| n.has_data).collect();
        assert_eq!(flags, vec![false, false, true, true]);
    }

    #[test]
    fn test_advance_clears_data_flag() {
        let mut ring = RingBuffer::new(2, &[1]);
        push(&mut ring, 1);
        push(&mut ring, 2);
        ring.advance(3, Timestamps::default());
        assert!(!ring.current().has_data);
        assert_eq!(ring.buffered(), 1);
    }

    #[test]
    fn test_vector_width_is_preserved() {
        let mut ring = RingBuffer::new(2, &[3]);
        ring.advance(1, Timestamps::default());
        ring.store([&Reading::new(vec![1.0, 2.0, 3.0, 4.0], Severity::NoAlarm)]);
        assert_eq!(ring.current().values[0], vec![1.0, 2.0, 3.0]);

        ring.advance(2, Timestamps::default());
        ring.store([&Reading::new(vec![9.0], Severity::NoAlarm)]);
        let row = &ring.current().values[0];
        assert_eq!(row.len(), 3);
        assert_eq!(row[0], 9.0);
        assert!(row[2].is_nan());
    }
}
