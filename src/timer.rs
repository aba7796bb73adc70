use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use ahash::{HashMap, HashMapExt};

/// Identity of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

struct Entry<K> {
    deadline: Instant,
    key: K,
}

/// One-shot timers over a binary heap with lazy deletion.
///
/// Cancel and re-arm never dig entries out of the heap; a slot whose
/// deadline no longer matches its entry is skipped when it surfaces, so
/// every operation stays O(log n). Directors drive the queue from their
/// select loop, which puts expirations in the same serialization domain
/// as I/O: a callback never observes a half-updated actor, and a timer
/// whose actor is already gone expires into a no-op.
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, Entry<K>>,
    next_id: u64,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `key` to expire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, key: K) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, Entry { deadline, key });
        self.heap.push(Reverse((deadline, id)));
        TimerHandle(id)
    }

    /// Cancel a timer. Cancelling one that already fired or was already
    /// cancelled is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.entries.remove(&handle.0);
    }

    /// Move a pending timer to a new deadline, keeping its identity.
    ///
    /// Returns false when the timer already fired or was cancelled.
    pub fn rearm(&mut self, handle: TimerHandle, deadline: Instant) -> bool {
        match self.entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.deadline = deadline;
                self.heap.push(Reverse((deadline, handle.0)));
                true
            }
            None => false,
        }
    }

    /// The earliest pending deadline, discarding stale heap slots on the
    /// way.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            match self.entries.get(&id) {
                Some(entry) if entry.deadline == deadline => return Some(deadline),
                _ => {
                    self.heap.pop();
                }
            }
        }

        None
    }

    /// Pop every timer whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        let mut fired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            let live = matches!(self.entries.get(&id), Some(e) if e.deadline == deadline);
            if !live {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                break;
            }

            self.heap.pop();
            if let Some(entry) = self.entries.remove(&id) {
                fired.push(entry.key);
            }
        }

        fired
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expires_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();

        timers.schedule(now + Duration::from_secs(3), "c");
        timers.schedule(now + Duration::from_secs(1), "a");
        timers.schedule(now + Duration::from_secs(2), "b");

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(timers.expire(now), Vec::<&str>::new());
        assert_eq!(timers.expire(now + Duration::from_secs(2)), vec!["a", "b"]);
        assert_eq!(timers.expire(now + Duration::from_secs(3)), vec!["c"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();

        let keep = timers.schedule(now + Duration::from_secs(1), "keep");
        let gone = timers.schedule(now + Duration::from_secs(1), "gone");

        timers.cancel(gone);
        // Idempotent, also on a handle that never fired.
        timers.cancel(gone);

        assert_eq!(timers.expire(now + Duration::from_secs(1)), vec!["keep"]);

        // A handle that already fired is equally inert.
        timers.cancel(keep);
        assert!(timers.is_empty());
    }

    #[test]
    fn rearm_moves_the_deadline_and_keeps_identity() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();

        let handle = timers.schedule(now + Duration::from_secs(1), "x");
        assert!(timers.rearm(handle, now + Duration::from_secs(5)));

        // The original deadline passes without firing.
        assert_eq!(timers.expire(now + Duration::from_secs(1)), Vec::<&str>::new());
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(5)));
        assert_eq!(timers.expire(now + Duration::from_secs(5)), vec!["x"]);

        // Re-arming after the fire reports failure.
        assert!(!timers.rearm(handle, now + Duration::from_secs(9)));
    }

    #[test]
    fn rearm_can_pull_a_deadline_closer() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();

        let handle = timers.schedule(now + Duration::from_secs(10), "x");
        assert!(timers.rearm(handle, now + Duration::from_secs(1)));

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(timers.expire(now + Duration::from_secs(1)), vec!["x"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn repeated_rearm_fires_exactly_once() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();

        let handle = timers.schedule(now + Duration::from_secs(1), "x");
        for i in 2..20u64 {
            assert!(timers.rearm(handle, now + Duration::from_secs(i)));
        }

        let fired = timers.expire(now + Duration::from_secs(60));
        assert_eq!(fired, vec!["x"]);
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
