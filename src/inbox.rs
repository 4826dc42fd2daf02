//! Inbox protocol (§4.5)
//!
//! A fixed-capacity FIFO of pending messages, each `(sender, value)`. Two
//! synchronization primitives guard it, matching §5's lock-ordering rule
//! exactly: `inbox_lock` serializes the data structure itself (push from a
//! sender, compaction from the receiver); the separate `inbox_block` +
//! `inbox_waiting` condvar pair implements blocking receive without forcing
//! every sender to also contend for `inbox_lock` while a receiver sleeps.
//!
//! Compaction is the straightforward O(n) `Vec::remove(0)` this capacity
//! (1024) comfortably affords (§9 design note: "a reimplementation may
//! substitute a per-sender queue map... at the cost of memory" — not done
//! here, the reference's own tradeoff is kept).

use std::sync::Arc;
use std::time::Duration;

use crate::machine::Machine;
use crate::value::Value;

/// Blocking receive re-checks on this period while waiting; a liveness
/// backstop with no other observable purpose (§9 open question (b) — the
/// behavior is preserved, its rationale is not invented here).
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(3);

pub const CAPACITY: usize = 1024;

pub struct InboxEntry {
    pub sender: Arc<Machine>,
    pub value: Value,
}

pub(crate) struct InboxState {
    entries: Vec<InboxEntry>,
    capacity: usize,
}

impl InboxState {
    pub fn new(capacity: usize) -> InboxState {
        InboxState {
            entries: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn push(&mut self, entry: InboxEntry) {
        self.entries.push(entry);
    }

    /// Scan from the head for the first slot matching `sender` (any slot if
    /// `sender` is `None`).
    pub fn find(&self, sender: Option<&Arc<Machine>>) -> Option<usize> {
        match sender {
            None => {
                if self.entries.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
            Some(s) => self
                .entries
                .iter()
                .position(|e| Arc::ptr_eq(&e.sender, s)),
        }
    }

    /// Clone the sender `Arc` at `idx` without removing the entry
    /// (`Machine::check`'s non-destructive peek).
    pub fn sender_at(&self, idx: usize) -> Arc<Machine> {
        Arc::clone(&self.entries[idx].sender)
    }

    /// Remove and return the entry at `idx`, sliding later entries down
    /// (§4.5 receive step 5: "compact the inbox").
    pub fn take(&mut self, idx: usize) -> InboxEntry {
        self.entries.remove(idx)
    }

    pub fn roots_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.entries.iter_mut().map(|e| &mut e.value)
    }
}

/// Outcome of `Machine::send` (§4.5 step 1, §7 recoverable errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Recipient was not active; the message was silently dropped (§4.5
    /// step 1, §8 boundary behavior).
    Dropped,
}

/// A received message (§6 `Msg`): owns a strong reference to the sender so
/// the caller can identify who sent it even if the sender later tears down.
pub struct Msg {
    pub sender: Arc<Machine>,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_machine() -> Arc<Machine> {
        Machine::new(256, 4096, 4)
    }

    #[test]
    fn find_matches_sender_and_any() {
        let a = test_machine();
        let b = test_machine();
        let mut inbox = InboxState::new(4);
        inbox.push(InboxEntry {
            sender: Arc::clone(&a),
            value: Value::from_int(1),
        });
        inbox.push(InboxEntry {
            sender: Arc::clone(&b),
            value: Value::from_int(2),
        });
        assert_eq!(inbox.find(Some(&b)), Some(1));
        assert_eq!(inbox.find(None), Some(0));
    }

    #[test]
    fn take_compacts_in_order() {
        let a = test_machine();
        let mut inbox = InboxState::new(4);
        inbox.push(InboxEntry {
            sender: Arc::clone(&a),
            value: Value::from_int(10),
        });
        inbox.push(InboxEntry {
            sender: Arc::clone(&a),
            value: Value::from_int(20),
        });
        let first = inbox.take(0);
        assert_eq!(first.value.as_int(), 10);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.find(None), Some(0));
        let second = inbox.take(0);
        assert_eq!(second.value.as_int(), 20);
        assert!(!inbox.is_full());
    }
}
