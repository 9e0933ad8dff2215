//! The shared move queue.
//!
//! Step moves for every stepper OID live in one bounded pool; the capacity
//! advertised to the host in the `config` response is the capacity of this
//! queue.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// One block of ramped-interval step pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub interval: u32,
    pub count: u16,
    pub add: i16,
    pub dir: u8,
}

#[derive(Default)]
struct Pool {
    queues: HashMap<u8, VecDeque<Move>>,
    elems: usize,
}

/// Bounded per-OID FIFOs drawing from one element pool.
pub struct MoveQueue {
    pool: Mutex<Pool>,
    capacity: usize,
}

impl MoveQueue {
    pub fn new(capacity: usize) -> Self {
        MoveQueue {
            pool: Mutex::new(Pool::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a move for `oid`. Returns false when the pool is full.
    pub fn put(&self, oid: u8, item: Move) -> bool {
        let mut pool = self.pool.lock();
        if pool.elems >= self.capacity {
            return false;
        }
        pool.elems += 1;
        pool.queues.entry(oid).or_default().push_back(item);
        true
    }

    /// Removes and returns the next move for `oid`.
    pub fn pop(&self, oid: u8) -> Option<Move> {
        let mut pool = self.pool.lock();
        let item = pool.queues.get_mut(&oid)?.pop_front();
        if item.is_some() {
            pool.elems -= 1;
        }
        item
    }

    pub fn is_empty(&self, oid: u8) -> bool {
        let pool = self.pool.lock();
        pool.queues.get(&oid).map_or(true, |q| q.is_empty())
    }

    /// Drops all moves queued for `oid`.
    pub fn clear_oid(&self, oid: u8) {
        let mut pool = self.pool.lock();
        if let Some(queue) = pool.queues.get_mut(&oid) {
            let dropped = queue.len();
            queue.clear();
            pool.elems -= dropped;
        }
    }

    /// Drops every queued move.
    pub fn clear_all(&self) {
        let mut pool = self.pool.lock();
        pool.queues.clear();
        pool.elems = 0;
    }

    pub fn len(&self) -> usize {
        self.pool.lock().elems
    }

    pub fn is_drained(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(interval: u32) -> Move {
        Move {
            interval,
            count: 1,
            add: 0,
            dir: 0,
        }
    }

    #[test]
    fn test_fifo_per_oid() {
        let queue = MoveQueue::new(16);
        queue.put(1, mv(10));
        queue.put(2, mv(20));
        queue.put(1, mv(11));
        assert_eq!(queue.pop(1).unwrap().interval, 10);
        assert_eq!(queue.pop(1).unwrap().interval, 11);
        assert_eq!(queue.pop(2).unwrap().interval, 20);
        assert!(queue.pop(1).is_none());
    }

    #[test]
    fn test_capacity_is_global() {
        let queue = MoveQueue::new(2);
        assert!(queue.put(1, mv(1)));
        assert!(queue.put(2, mv(2)));
        assert!(!queue.put(3, mv(3)));
        queue.pop(1);
        assert!(queue.put(3, mv(3)));
    }

    #[test]
    fn test_clear_oid_releases_capacity() {
        let queue = MoveQueue::new(2);
        queue.put(1, mv(1));
        queue.put(1, mv(2));
        queue.clear_oid(1);
        assert_eq!(queue.len(), 0);
        assert!(queue.put(2, mv(3)));
    }
}
