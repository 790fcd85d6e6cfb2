//! Reordering queue for numbered callbacks.
//!
//! The test service reports what its client observed through independent HTTP requests,
//! each carrying a sequence number. Requests are handled concurrently, so they can arrive
//! in any order. [`MessageSortingQueue`] buffers early arrivals and releases items to a
//! single consumer strictly in counter order, starting at 1.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// What happened to an accepted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The item and `n - 1` buffered successors were released.
    Released(usize),
    /// The item is waiting for a predecessor.
    Deferred,
    /// The counter was already released or is already buffered; the item was dropped.
    Stale,
    /// The queue was closed; the item was dropped.
    Closed,
}

struct QueueState<T> {
    last_released: u64,
    /// Sorted by counter, ascending, no duplicates.
    deferred: Vec<(u64, T)>,
    output: Option<mpsc::UnboundedSender<T>>,
}

/// Releases items in counter order regardless of arrival order.
///
/// `accept` may be called from any number of request workers at once; releases happen
/// under the queue's lock, so the output order is exactly the counter order.
pub struct MessageSortingQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> MessageSortingQueue<T> {
    /// Creates a queue and the receiving half of its output.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            state: Mutex::new(QueueState {
                last_released: 0,
                deferred: Vec::new(),
                output: Some(tx),
            }),
        };
        (queue, rx)
    }

    /// Inserts `item` at position `counter`.
    pub fn accept(&self, counter: u64, item: T) -> Disposition {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(output) = state.output.clone() else {
            return Disposition::Closed;
        };

        if counter <= state.last_released {
            tracing::warn!(
                counter,
                last_released = state.last_released,
                "Dropping callback with an already-delivered sequence number"
            );
            return Disposition::Stale;
        }

        if counter > state.last_released + 1 {
            let pos = state.deferred.partition_point(|(c, _)| *c < counter);
            if state.deferred.get(pos).is_some_and(|(c, _)| *c == counter) {
                tracing::warn!(counter, "Dropping duplicate callback sequence number");
                return Disposition::Stale;
            }
            state.deferred.insert(pos, (counter, item));
            return Disposition::Deferred;
        }

        state.last_released = counter;
        if output.send(item).is_err() {
            state.output = None;
            return Disposition::Closed;
        }
        let mut released = 1;

        let ready = state
            .deferred
            .iter()
            .zip(counter + 1..)
            .take_while(|((c, _), expected)| c == expected)
            .count();
        for (c, next) in state.deferred.drain(..ready) {
            state.last_released = c;
            if output.send(next).is_err() {
                break;
            }
            released += 1;
        }

        Disposition::Released(released)
    }

    /// Delivers an item immediately, outside the counter sequence.
    ///
    /// Used to surface protocol errors that have no usable counter.
    pub fn inject(&self, item: T) -> bool {
        let state = self.state.lock();
        match &state.output {
            Some(output) => output.send(item).is_ok(),
            None => false,
        }
    }

    /// Counters of the items still waiting for a predecessor, ascending.
    pub fn deferred_counters(&self) -> Vec<u64> {
        self.state.lock().deferred.iter().map(|(c, _)| *c).collect()
    }

    pub fn last_released(&self) -> u64 {
        self.state.lock().last_released
    }

    /// Terminates the output and discards anything still deferred. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.output = None;
        state.deferred.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().output.is_none()
    }
}
