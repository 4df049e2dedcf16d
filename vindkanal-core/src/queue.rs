//! ## vindkanal-core::queue
//! **Time-ordered delay queue with FIFO-preserving tie-breaking**
//!
//! A 1-indexed binary min-heap keyed lexicographically by
//! `(due_at, sequence)`. Slot 0 holds a sentinel whose key is smaller than
//! every real entry, which lets the sift-up loop terminate without a bounds
//! check. In FIFO mode the due time of every enqueued packet is forced to
//! be monotone, so a single emulated link never reorders packets even when
//! per-packet delay samples vary.

use crate::packet::{Direction, Packet};

/// Backing storage grows in fixed chunks, not per element.
const QUEUE_CHUNK: usize = 100;

#[derive(Debug)]
struct QueueEntry {
    packet: Packet,
    due_at: u64,
    sequence: u64,
}

impl QueueEntry {
    #[inline]
    fn key(&self) -> (u64, u64) {
        (self.due_at, self.sequence)
    }
}

/// Min-heap of packets pending future transmission.
#[derive(Debug)]
pub struct DelayQueue {
    /// `entries[0]` is the sentinel; real entries live at `1..=len`.
    entries: Vec<QueueEntry>,
    byte_size: [usize; 2],
    fifo: bool,
    last_due_at: u64,
    counter: u64,
}

impl DelayQueue {
    pub fn new(fifo: bool) -> Self {
        let mut entries = Vec::with_capacity(QUEUE_CHUNK);
        entries.push(QueueEntry {
            packet: Packet::empty(Direction::LeftToRight),
            due_at: 0,
            sequence: 0,
        });
        Self {
            entries,
            byte_size: [0, 0],
            fifo,
            last_due_at: 0,
            counter: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_fifo(&self) -> bool {
        self.fifo
    }

    /// Switching discipline also resets the FIFO bookkeeping, so stale
    /// `last_due_at` values cannot delay packets after a toggle.
    pub fn set_fifo(&mut self, fifo: bool) {
        self.fifo = fifo;
        self.last_due_at = 0;
        self.counter = 0;
    }

    /// Queued bytes currently pending for one direction.
    #[inline]
    pub fn byte_size(&self, direction: Direction) -> usize {
        self.byte_size[direction.index()]
    }

    /// Due time of the earliest entry, `None` when empty.
    pub fn peek_due_at(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.entries[1].due_at)
        }
    }

    /// Inserts a packet scheduled for `due_at` (epoch nanoseconds).
    ///
    /// FIFO mode: a due time later than everything seen so far is accepted
    /// and resets the tie-break counter; anything else is forced up to
    /// `last_due_at` and ordered by the counter, so dequeue order matches
    /// arrival order.
    pub fn enqueue(&mut self, packet: Packet, mut due_at: u64) {
        if self.fifo {
            if due_at > self.last_due_at {
                self.last_due_at = due_at;
                self.counter = 0;
            } else {
                due_at = self.last_due_at;
                self.counter += 1;
            }
        }

        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve(QUEUE_CHUNK);
        }

        self.byte_size[packet.direction.index()] += packet.len();
        let entry = QueueEntry {
            packet,
            due_at,
            sequence: self.counter,
        };

        // Sift up; the sentinel's (0, 0) key stops the loop at the root.
        self.entries.push(entry);
        let mut k = self.entries.len() - 1;
        while self.entries[k].key() < self.entries[k >> 1].key() {
            self.entries.swap(k, k >> 1);
            k >>= 1;
        }
    }

    /// Removes and returns the earliest-due packet.
    pub fn dequeue(&mut self) -> Option<Packet> {
        if self.is_empty() {
            return None;
        }

        let last = self.entries.len() - 1;
        self.entries.swap(1, last);
        let entry = self.entries.pop().expect("non-empty heap");
        self.byte_size[entry.packet.direction.index()] -= entry.packet.len();

        // Sift the relocated tail down, following the smaller child.
        let len = self.entries.len() - 1;
        let mut k = 1;
        while k * 2 <= len {
            let mut child = k * 2;
            if child < len && self.entries[child + 1].key() < self.entries[child].key() {
                child += 1;
            }
            if self.entries[k].key() <= self.entries[child].key() {
                break;
            }
            self.entries.swap(k, child);
            k = child;
        }

        Some(entry.packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(tag: u8, direction: Direction) -> Packet {
        Packet::new(vec![tag; 4], direction, 0)
    }

    #[test]
    fn dequeues_in_due_time_order() {
        let mut queue = DelayQueue::new(false);
        queue.enqueue(packet(3, Direction::LeftToRight), 300);
        queue.enqueue(packet(1, Direction::LeftToRight), 100);
        queue.enqueue(packet(2, Direction::LeftToRight), 200);

        assert_eq!(queue.peek_due_at(), Some(100));
        assert_eq!(queue.dequeue().unwrap().payload[0], 1);
        assert_eq!(queue.dequeue().unwrap().payload[0], 2);
        assert_eq!(queue.dequeue().unwrap().payload[0], 3);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn fifo_mode_never_reorders() {
        let mut queue = DelayQueue::new(true);
        // Second packet samples a smaller delay than the first.
        queue.enqueue(packet(1, Direction::LeftToRight), 500);
        queue.enqueue(packet(2, Direction::LeftToRight), 100);
        queue.enqueue(packet(3, Direction::LeftToRight), 400);
        queue.enqueue(packet(4, Direction::LeftToRight), 900);

        let order: Vec<u8> = std::iter::from_fn(|| queue.dequeue())
            .map(|p| p.payload[0])
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn non_fifo_mode_permits_reordering() {
        let mut queue = DelayQueue::new(false);
        queue.enqueue(packet(1, Direction::LeftToRight), 500);
        queue.enqueue(packet(2, Direction::LeftToRight), 100);

        assert_eq!(queue.dequeue().unwrap().payload[0], 2);
        assert_eq!(queue.dequeue().unwrap().payload[0], 1);
    }

    #[test]
    fn byte_occupancy_tracks_both_directions() {
        let mut queue = DelayQueue::new(false);
        queue.enqueue(packet(1, Direction::LeftToRight), 10);
        queue.enqueue(packet(2, Direction::RightToLeft), 20);
        queue.enqueue(packet(3, Direction::RightToLeft), 30);

        assert_eq!(queue.byte_size(Direction::LeftToRight), 4);
        assert_eq!(queue.byte_size(Direction::RightToLeft), 8);

        queue.dequeue();
        assert_eq!(queue.byte_size(Direction::LeftToRight), 0);
        queue.dequeue();
        queue.dequeue();
        assert_eq!(queue.byte_size(Direction::RightToLeft), 0);
    }

    #[test]
    fn grows_past_the_first_chunk() {
        let mut queue = DelayQueue::new(false);
        for i in 0..500u64 {
            queue.enqueue(packet((i % 256) as u8, Direction::LeftToRight), 1000 - i);
        }
        assert_eq!(queue.len(), 500);

        let mut previous = 0;
        while let Some(_) = queue.peek_due_at() {
            let due = queue.peek_due_at().unwrap();
            assert!(due >= previous);
            previous = due;
            queue.dequeue();
        }
    }

    #[test]
    fn fifo_toggle_resets_bookkeeping() {
        let mut queue = DelayQueue::new(true);
        queue.enqueue(packet(1, Direction::LeftToRight), 5_000);
        assert_eq!(queue.dequeue().unwrap().payload[0], 1);

        queue.set_fifo(false);
        queue.set_fifo(true);
        // A small due time is accepted again after the toggle.
        queue.enqueue(packet(2, Direction::LeftToRight), 10);
        assert_eq!(queue.peek_due_at(), Some(10));
    }
}
