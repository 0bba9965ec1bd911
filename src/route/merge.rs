use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use crate::midi::MidiEvent;

/// Events kept without reallocating the queue.
pub const MERGE_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Pending {
    timestamp: u64,
    seq: u64,
    event: MidiEvent,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.seq).cmp(&(other.timestamp, other.seq))
    }
}

/// Single ordering of the pending events of all sessions, by timestamp
/// with ties going to the earlier arrival.
#[derive(Debug)]
pub struct MidiMerger {
    queue: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    last_timestamp: u64,
}

impl Default for MidiMerger {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::with_capacity(MERGE_QUEUE_CAPACITY),
            next_seq: 0,
            last_timestamp: 0,
        }
    }
}

impl MidiMerger {
    /// Queues an event. Outside multi mode there is a single stream to
    /// deliver in arrival order, so its timestamp is clamped to be no
    /// earlier than the previous one.
    pub fn push(&mut self, mut event: MidiEvent, multi_mode: bool) {
        if !multi_mode && event.timestamp < self.last_timestamp {
            event.timestamp = self.last_timestamp;
        }
        self.last_timestamp = self.last_timestamp.max(event.timestamp);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Pending {
            timestamp: event.timestamp,
            seq,
            event,
        }));
    }

    /// Takes the earliest event due at or before `limit`.
    pub fn pop_due(&mut self, limit: u64) -> Option<MidiEvent> {
        if self.queue.peek()?.0.timestamp > limit {
            return None;
        }
        self.queue.pop().map(|Reverse(p)| p.event)
    }

    pub fn pop(&mut self) -> Option<MidiEvent> {
        self.queue.pop().map(|Reverse(p)| p.event)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.last_timestamp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{MidiEventKind, SessionId};

    fn short(session: u64, msg: u32, timestamp: u64) -> MidiEvent {
        MidiEvent {
            session: SessionId(session),
            kind: MidiEventKind::Short(msg),
            timestamp,
        }
    }

    fn drain_due(merger: &mut MidiMerger, limit: u64) -> Vec<(u64, u64)> {
        std::iter::from_fn(|| merger.pop_due(limit))
            .map(|e| (e.timestamp, e.session.0))
            .collect()
    }

    #[test]
    fn merges_two_sessions_by_timestamp() {
        let mut merger = MidiMerger::default();
        for (session, ts) in [(0, 0), (0, 10), (0, 30)] {
            merger.push(short(session, 0x90, ts), true);
        }
        for (session, ts) in [(1, 5), (1, 20)] {
            merger.push(short(session, 0x80, ts), true);
        }
        assert_eq!(
            drain_due(&mut merger, 25),
            vec![(0, 0), (5, 1), (10, 0), (20, 1)]
        );
        assert_eq!(merger.len(), 1);
        assert_eq!(drain_due(&mut merger, 50), vec![(30, 0)]);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let mut merger = MidiMerger::default();
        merger.push(short(1, 1, 7), true);
        merger.push(short(0, 2, 7), true);
        merger.push(short(2, 3, 7), true);
        let sessions: Vec<u64> = drain_due(&mut merger, 7).into_iter().map(|e| e.1).collect();
        assert_eq!(sessions, vec![1, 0, 2]);
    }

    #[test]
    fn single_stream_is_delivered_in_arrival_order() {
        let mut merger = MidiMerger::default();
        merger.push(short(0, 1, 100), false);
        merger.push(short(0, 2, 40), false);
        let first = merger.pop().unwrap();
        let second = merger.pop().unwrap();
        assert_eq!(first.kind, MidiEventKind::Short(1));
        assert_eq!(second.kind, MidiEventKind::Short(2));
        assert_eq!(second.timestamp, 100);
    }

    #[test]
    fn limit_is_inclusive() {
        let mut merger = MidiMerger::default();
        merger.push(short(0, 1, 25), true);
        assert!(merger.pop_due(24).is_none());
        assert!(merger.pop_due(25).is_some());
        assert!(merger.is_empty());
    }
}
