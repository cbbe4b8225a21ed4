/// Timer service — monotonic scheduled-task facility (§2.7)
///
/// Modeled per the design notes (§9, "Scheduled tasks via cancellable
/// handles") as a timer wheel keyed by deadline, with a generation
/// counter per handle so a cancel-and-reschedule is safe against a
/// stale firing that was already queued. The caller drives the clock
/// by calling [`TimerWheel::poll`]; this crate does not spawn threads
/// (§1 excludes thread-pool wiring).
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Opaque handle to a scheduled timer. Carries a generation so that
/// firing a handle whose generation has since been bumped by a
/// reschedule is a safe no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    generation: u32,
}

#[derive(Eq, PartialEq)]
struct Scheduled {
    deadline: Instant,
    id: u64,
    generation: u32,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A monotonic-clock timer wheel. `T` is the caller-defined payload
/// delivered when a timer fires (e.g. a retransmission attempt number,
/// a dedup-entry key, or an observation heartbeat marker).
pub struct TimerWheel<T> {
    heap: BinaryHeap<Reverse<Scheduled>>,
    payloads: std::collections::HashMap<u64, (u32, T)>,
    next_id: u64,
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        TimerWheel {
            heap: BinaryHeap::new(),
            payloads: std::collections::HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `payload` to fire at `deadline`, returning a handle
    /// that can later be used to cancel or reschedule it.
    pub fn schedule(&mut self, deadline: Instant, payload: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let generation = 0;
        self.payloads.insert(id, (generation, payload));
        self.heap.push(Reverse(Scheduled {
            deadline,
            id,
            generation,
        }));
        TimerHandle { id, generation }
    }

    /// Cancel a previously scheduled timer. Returns the payload if it
    /// had not already fired.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        match self.payloads.remove(&handle.id) {
            Some((generation, payload)) if generation == handle.generation => Some(payload),
            Some(entry) => {
                // generation mismatch: a newer reschedule owns this id,
                // put it back untouched.
                self.payloads.insert(handle.id, entry);
                None
            }
            None => None,
        }
    }

    /// Cancel and reschedule a timer in one step, bumping its
    /// generation so any already-queued stale firing is ignored by
    /// [`poll`](Self::poll).
    pub fn reschedule(&mut self, handle: TimerHandle, new_deadline: Instant) -> Option<TimerHandle> {
        let (generation, payload) = self.payloads.remove(&handle.id)?;
        if generation != handle.generation {
            self.payloads.insert(handle.id, (generation, payload));
            return None;
        }
        let new_generation = generation + 1;
        self.payloads.insert(handle.id, (new_generation, payload));
        self.heap.push(Reverse(Scheduled {
            deadline: new_deadline,
            id: handle.id,
            generation: new_generation,
        }));
        Some(TimerHandle {
            id: handle.id,
            generation: new_generation,
        })
    }

    /// Pop every timer whose deadline is at or before `now`, dropping
    /// stale (superseded-generation or cancelled) entries along the
    /// way.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(scheduled) = self.heap.pop().unwrap();
            match self.payloads.get(&scheduled.id) {
                Some((generation, _)) if *generation == scheduled.generation => {
                    let (_, payload) = self.payloads.remove(&scheduled.id).unwrap();
                    fired.push(payload);
                }
                _ => {
                    // stale firing: either cancelled or superseded by a
                    // reschedule whose newer entry is still pending.
                }
            }
        }
        fired
    }

    /// Earliest deadline currently pending, if any (useful for a
    /// caller computing how long to sleep before the next `poll`).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}
