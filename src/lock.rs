//! Reentrant allocation lock
//!
//! The allocation lock guards a machine's heap against a peer thread
//! performing a cross-machine copy into it (see `copy.rs`) while the owning
//! thread is itself allocating. It must be reentrant because garbage
//! collection can recursively drive allocation through C-heap finalizer
//! callbacks (see `cheap.rs`), and a thread that already holds the lock
//! must not deadlock against itself.
//!
//! This mirrors the `Mutex` + `Condvar` shutdown-barrier idiom used
//! elsewhere in this crate's ancestry, specialized to add reentrancy via a
//! held-by/count pair.

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct State {
    holder: Option<ThreadId>,
    depth: u32,
}

/// A mutex that the same thread may acquire more than once.
///
/// Unlike the other synchronization primitives in this crate (`inbox_lock`,
/// `inbox_block`), this one is intentionally reentrant: see §4.3 of the
/// design notes.
pub struct ReentrantLock {
    state: Mutex<State>,
    free: Condvar,
}

/// RAII guard released on drop. Re-locking by the same thread only
/// increments the depth counter; the underlying mutex is released only
/// when the outermost guard is dropped.
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl ReentrantLock {
    pub fn new() -> Self {
        ReentrantLock {
            state: Mutex::new(State {
                holder: None,
                depth: 0,
            }),
            free: Condvar::new(),
        }
    }

    pub fn lock(&self) -> ReentrantGuard<'_> {
        let me = thread::current().id();
        let mut guard = self.state.lock().expect("alloc_lock poisoned");
        loop {
            match guard.holder {
                Some(h) if h == me => {
                    guard.depth += 1;
                    break;
                }
                None => {
                    guard.holder = Some(me);
                    guard.depth = 1;
                    break;
                }
                Some(_) => {
                    guard = self.free.wait(guard).expect("alloc_lock wait poisoned");
                }
            }
        }
        ReentrantGuard { lock: self }
    }

    fn unlock(&self) {
        let mut guard = self.state.lock().expect("alloc_lock poisoned");
        guard.depth -= 1;
        if guard.depth == 0 {
            guard.holder = None;
            self.free.notify_one();
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reentrant_same_thread_does_not_deadlock() {
        let lock = ReentrantLock::new();
        let _g1 = lock.lock();
        let _g2 = lock.lock();
        let _g3 = lock.lock();
    }

    #[test]
    fn excludes_other_threads() {
        let lock = Arc::new(ReentrantLock::new());
        let lock2 = Arc::clone(&lock);
        let g1 = lock.lock();
        let handle = thread::spawn(move || {
            let _g = lock2.lock();
        });
        drop(g1);
        handle.join().unwrap();
    }
}
