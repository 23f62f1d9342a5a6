//! Deferred time-translation queries
//!
//! A query that cannot be answered yet (not enough input processed) is
//! parked here together with its callback. The callback is a boxed
//! `FnOnce` owned by the queue: whichever thread later pops the entry is
//! the only one that can invoke it, which makes exactly-once delivery a
//! property of ownership transfer rather than of discipline.

use std::collections::VecDeque;

/// Capability invoked with the resolved playout time, in microseconds
///
/// Runs on whichever thread drains the queue (typically the one pulling
/// output), never on a dedicated callback thread. Must not block.
pub type TimestampCallback = Box<dyn FnOnce(u64) + Send>;

/// A deferred media-to-playout translation request
pub struct PendingQuery {
    /// Queried media time, in microseconds
    pub input_time_us: u64,
    /// Invoked exactly once with the playout time
    pub callback: TimestampCallback,
}

/// FIFO of deferred queries, ordered by arrival
///
/// The admission contract (strictly increasing query times) makes arrival
/// order and `input_time_us` order the same thing, so resolving from the
/// front until the first unresolvable entry is always correct.
#[derive(Default)]
pub struct QueryQueue {
    entries: VecDeque<PendingQuery>,
}

impl QueryQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, query: PendingQuery) {
        self.entries.push_back(query);
    }

    /// Media time of the oldest pending query, if any
    pub fn head_input_time_us(&self) -> Option<u64> {
        self.entries.front().map(|query| query.input_time_us)
    }

    /// Remove and return the oldest pending query
    pub fn pop(&mut self) -> Option<PendingQuery> {
        self.entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
