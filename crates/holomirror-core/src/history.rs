//! Bounded history ring used to replay recent events ("the ghost").

use std::collections::VecDeque;

use holomirror_types::Event;

/// Fixed-capacity, append-only buffer of the most recent events.
///
/// Appending to a full ring evicts the oldest event. Reads hand out owned
/// copies so callers never observe a concurrent mutation.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    events: VecDeque<Event>,
    capacity: usize,
}

impl HistoryRing {
    /// Create an empty ring holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, returning the evicted one if the ring was full.
    ///
    /// A zero-capacity ring keeps nothing and hands the event straight back.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        if self.capacity == 0 {
            return Some(event);
        }
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Owned copy of the buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the ring holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use holomirror_types::{Event, WorkerId};

    use super::*;

    fn numbered(n: u64) -> Event {
        Event::result(WorkerId::from("w"), serde_json::json!(n))
    }

    fn numbers(ring: &HistoryRing) -> Vec<serde_json::Value> {
        ring.snapshot()
            .into_iter()
            .filter_map(|e| e.payload.get("result").cloned())
            .collect()
    }

    #[test]
    fn keeps_insertion_order_below_capacity() {
        let mut ring = HistoryRing::new(4);
        for n in 0..3 {
            assert!(ring.push(numbered(n)).is_none());
        }
        assert_eq!(numbers(&ring), vec![0, 1, 2]);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut ring = HistoryRing::new(3);
        for n in 0..3 {
            ring.push(numbered(n));
        }
        let evicted = ring.push(numbered(3));
        assert_eq!(
            evicted.and_then(|e| e.payload.get("result").cloned()),
            Some(serde_json::json!(0))
        );
        assert_eq!(ring.len(), 3);
        assert_eq!(numbers(&ring), vec![1, 2, 3]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut ring = HistoryRing::new(0);
        assert!(ring.push(numbered(1)).is_some());
        assert!(ring.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_pushes() {
        let mut ring = HistoryRing::new(2);
        ring.push(numbered(1));
        let before = ring.snapshot();
        ring.push(numbered(2));
        ring.push(numbered(3));
        assert_eq!(before.len(), 1);
        assert_eq!(ring.len(), 2);
    }
}
