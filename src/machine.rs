//! Machine: a self-contained execution context (§3, §4.6)
//!
//! A `Machine` owns a value stack, a managed heap, a finalizer-tracked
//! auxiliary heap, statistics, and — always, in this crate; there is no
//! single-threaded build — a message inbox. Machines interact only by
//! copying a value tree from one machine's heap into another's and
//! enqueuing a reference to the copy in the recipient's inbox (`copy.rs`,
//! `inbox.rs`).
//!
//! Process-wide state (the thread-local "current machine" slot, the
//! ignored-SIGPIPE setup, the nullary table) is initialized exactly once,
//! mirroring this crate's ancestor's one-time runtime bootstrap.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::time::Instant;

use crate::cell::{CellHeader, HEADER_SIZE, Tag};
use crate::cheap::CHeap;
use crate::copy;
use crate::diagnostics;
use crate::error::fatal;
use crate::guard::AllocGuard;
use crate::heap::Heap;
use crate::inbox::{self, InboxEntry, InboxState, Msg, SendOutcome, RECEIVE_TIMEOUT};
use crate::lock::ReentrantLock;
use crate::stats::{Stats, StatsSnapshot};
use crate::valstack::ValStack;
use crate::value::Value;

static PROCESS_INIT: Once = Once::new();

thread_local! {
    static CURRENT: RefCell<Option<Arc<Machine>>> = const { RefCell::new(None) };
}

/// A single execution context: stack, heap, C-heap, stats, and inbox.
pub struct Machine {
    heap: UnsafeCell<Heap>,
    valstack: UnsafeCell<ValStack>,
    c_heap: UnsafeCell<CHeap>,
    stats: Stats,
    ret: Cell<Value>,
    reg1: Cell<Value>,
    inbox: Mutex<InboxState>,
    inbox_block: Mutex<()>,
    inbox_waiting: Condvar,
    alloc_lock: ReentrantLock,
    processes: AtomicUsize,
    active: AtomicBool,
    started_at: Instant,
}

// Safety: `heap`, `valstack`, `c_heap`, `ret`, and `reg1` are mutated either
// by the single owning thread, or by a peer that first acquires
// `alloc_lock` (cross-machine copy, `copy.rs`). `inbox`/`inbox_block` are
// plain `Mutex`es and already `Sync`. No field is ever mutated without one
// of those two disciplines, so sharing a `Machine` across threads behind an
// `Arc` is sound even though `UnsafeCell` itself is not `Sync`.
unsafe impl Sync for Machine {}
unsafe impl Send for Machine {}

impl Machine {
    /// `init_machine` (§4.6): allocate stack and heap, initialize the
    /// C-heap and inbox, and perform process-wide one-time setup the first
    /// time any machine is created.
    pub fn new(stack_words: usize, heap_bytes: usize, _max_peers: usize) -> Arc<Machine> {
        process_init();

        let m = Arc::new(Machine {
            heap: UnsafeCell::new(Heap::new(heap_bytes)),
            valstack: UnsafeCell::new(ValStack::new(stack_words)),
            c_heap: UnsafeCell::new(CHeap::new()),
            stats: Stats::new(),
            ret: Cell::new(Value::from_int(0)),
            reg1: Cell::new(Value::from_int(0)),
            inbox: Mutex::new(InboxState::new(inbox::CAPACITY)),
            inbox_block: Mutex::new(()),
            inbox_waiting: Condvar::new(),
            alloc_lock: ReentrantLock::new(),
            processes: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            started_at: Instant::now(),
        });
        diagnostics::register_machine(&m);
        m
    }

    /// The machine currently bound to this OS thread, if any (§4.6
    /// per-thread binding).
    pub fn current() -> Option<Arc<Machine>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Bind `m` as the current machine for this OS thread.
    pub fn bind_current(m: &Arc<Machine>) {
        CURRENT.with(|c| *c.borrow_mut() = Some(Arc::clone(m)));
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn processes(&self) -> usize {
        self.processes.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// `(bytes_used, capacity)` of the active semispace, or `None` if the
    /// heap is momentarily inaccessible (kept for symmetry with the other
    /// `try_lock`-style diagnostics accessors; the heap has no lock of its
    /// own on the fast path, so this never actually fails).
    pub fn heap_snapshot(&self) -> Option<(usize, usize)> {
        let heap = unsafe { &*self.heap.get() };
        Some((heap.bytes_used(), heap.space_capacity()))
    }

    pub fn inbox_depth(&self) -> Option<usize> {
        self.inbox.try_lock().ok().map(|i| i.len())
    }

    /// `space(machine, size)` (§6): non-invasive check of whether `size`
    /// bytes could be bump-allocated right now without a collection.
    pub fn space(&self, size: usize) -> bool {
        let heap = unsafe { &*self.heap.get() };
        let avail = heap.end as usize - heap.next as usize;
        avail >= size + HEADER_SIZE
    }

    /// Normal (`M`) allocation: may trigger a collection (§4.2).
    pub fn allocate(&self, payload_len: usize, tag: Tag) -> Value {
        let _lock = self.maybe_lock();
        if let Some(v) = self.try_bump_raw(payload_len, tag) {
            return v;
        }
        self.collect_garbage();
        self.try_bump_raw(payload_len, tag)
            .unwrap_or_else(|| fatal("heap exhausted after collection"))
    }

    /// Bump-allocate without triggering GC; `None` if it would not fit.
    /// Used both by the guarded (`Mc`) path and by cross-machine copy,
    /// which is itself responsible for collecting and retrying from
    /// scratch on failure (`copy.rs`).
    pub(crate) fn try_bump_raw(&self, payload_len: usize, tag: Tag) -> Option<Value> {
        let heap = unsafe { &mut *self.heap.get() };
        let alloc = heap.try_bump(payload_len, tag)?;
        self.stats
            .record_allocation(unsafe { (*alloc.header).chunk_size() } as u64);
        Some(Value::from_ptr(alloc.payload))
    }

    /// `require_alloc`/`Require` (§4.3): declare an upper bound, collect up
    /// front if needed, and (while peers are attached) hold `alloc_lock` for
    /// the guard's lifetime. `Done` is simply dropping the returned guard.
    pub fn require_alloc(&self, n: usize) -> AllocGuard<'_> {
        let lock = self.maybe_lock();
        if !self.space(n) {
            self.collect_garbage();
        }
        AllocGuard {
            machine: self,
            _lock: lock,
        }
    }

    fn maybe_lock(&self) -> Option<crate::lock::ReentrantGuard<'_>> {
        if self.processes() > 0 {
            Some(self.alloc_lock.lock())
        } else {
            None
        }
    }

    pub fn ret(&self) -> Value {
        self.ret.get()
    }

    pub fn set_ret(&self, v: Value) {
        self.ret.set(v);
    }

    pub fn reg1(&self) -> Value {
        self.reg1.get()
    }

    pub fn set_reg1(&self, v: Value) {
        self.reg1.set(v);
    }

    /// Push a value onto the value stack. Exposed so an embedding
    /// interpreter (out of scope here, §1) can drive the stack the
    /// allocator and collector both treat as a root set.
    pub fn push_value(&self, v: Value) {
        let valstack = unsafe { &mut *self.valstack.get() };
        valstack.push(v);
    }

    /// Read the value stack slot at `index` without popping it.
    pub fn stack_get(&self, index: usize) -> Value {
        let valstack = unsafe { &*self.valstack.get() };
        valstack.get(index)
    }

    pub fn c_heap(&self) -> &CHeap {
        unsafe { &*self.c_heap.get() }
    }

    /// # Safety
    /// Caller must not alias this with another live `&CHeap` and must not
    /// hold it across a collection.
    #[allow(clippy::mut_from_ref)]
    fn c_heap_mut(&self) -> &mut CHeap {
        unsafe { &mut *self.c_heap.get() }
    }

    /// `cdata_allocate` (§6 C-heap integration): allocate `size` bytes
    /// outside the managed heap, owned by `owner`, finalized when `owner`
    /// is released from the C-heap.
    pub fn cdata_allocate(&self, size: usize, owner: Value, finalizer: Option<crate::cheap::Finalizer>) -> *mut u8 {
        self.c_heap_mut().allocate(size, owner, finalizer)
    }

    /// `cdata_manage` (§6): register an already-owned externally allocated
    /// pointer for finalizer tracking.
    pub fn cdata_manage(&self, ptr: *mut u8, size: usize, owner: Value, finalizer: Option<crate::cheap::Finalizer>) {
        self.c_heap_mut().manage(ptr, size, owner, finalizer);
    }

    /// Full copying collection (§4.2.1). Swaps semispaces, then relocates
    /// every root: value-stack slots, `ret`, `reg1`, every inbox entry, and
    /// every C-heap entry (treated as an unconditional root here — see
    /// DESIGN.md's note on the simplified liveness contract).
    pub fn collect_garbage(&self) {
        let heap = unsafe { &mut *self.heap.get() };
        heap.begin_collection();

        let valstack = unsafe { &mut *self.valstack.get() };
        for slot in valstack.roots_mut() {
            *slot = relocate(heap, *slot);
        }

        self.ret.set(relocate(heap, self.ret.get()));
        self.reg1.set(relocate(heap, self.reg1.get()));

        if let Ok(mut inbox) = self.inbox.lock() {
            for slot in inbox.roots_mut() {
                *slot = relocate(heap, *slot);
            }
        }

        let c_heap = unsafe { &mut *self.c_heap.get() };
        c_heap.sweep(|owner| Some(relocate(heap, owner)));

        self.stats.record_collection();
    }

    /// `terminate` (§4.6): release synchronization state and mark the
    /// machine inactive. The record itself is retained (it lives inside the
    /// `Arc` the caller still holds, or weakly in the diagnostics registry)
    /// so late sends observe `active == false` and drop rather than crash.
    pub fn terminate(&self) -> StatsSnapshot {
        self.active.store(false, Ordering::Release);
        self.stats.snapshot()
    }

    /// `send` (§4.5 steps 1-8, §7): deep-copy `value` into `recipient`'s
    /// heap under its `alloc_lock`, then enqueue it and wake any blocked
    /// receiver.
    pub fn send(self: &Arc<Self>, recipient: &Arc<Machine>, value: Value) -> SendOutcome {
        if !recipient.is_active() {
            return SendOutcome::Dropped;
        }

        // Held for the whole loop, not just each copy attempt: a collection
        // triggered here must not race the recipient's own thread allocating
        // concurrently (§4.4 "the copy executes with B's alloc_lock held").
        let _g = recipient.alloc_lock.lock();
        let mut attempts = 0u32;
        let copied = loop {
            match copy::copy_into(recipient, value) {
                Some(v) => break v,
                None => {
                    attempts += 1;
                    if attempts > 1 {
                        fatal("heap exhausted while copying a message");
                    }
                    recipient.collect_garbage();
                }
            }
        };
        drop(_g);

        let mut inbox = recipient.inbox.lock().expect("inbox poisoned");
        if inbox.is_full() {
            fatal("inbox overflow");
        }
        inbox.push(InboxEntry {
            sender: Arc::clone(self),
            value: copied,
        });
        drop(inbox);

        {
            let _g = recipient
                .inbox_block
                .lock()
                .expect("inbox_block poisoned");
            recipient.inbox_waiting.notify_all();
        }

        self.stats.record_send();
        SendOutcome::Sent
    }

    /// `check` (§4.5, non-blocking): the sender of the first matching
    /// pending message, if any.
    pub fn check(&self, sender: Option<&Arc<Machine>>) -> Option<Arc<Machine>> {
        let inbox = self.inbox.lock().expect("inbox poisoned");
        inbox.find(sender).map(|idx| inbox.sender_at(idx))
    }

    /// `check_timeout` (§4.5): a non-blocking check, then (if empty) wait on
    /// `inbox_waiting` up to `delay`, then re-check once.
    pub fn check_timeout(
        &self,
        sender: Option<&Arc<Machine>>,
        delay: std::time::Duration,
    ) -> Option<Arc<Machine>> {
        if let Some(m) = self.check(sender) {
            return Some(m);
        }
        let guard = self.inbox_block.lock().expect("inbox_block poisoned");
        let _ = self.inbox_waiting.wait_timeout(guard, delay);
        self.check(sender)
    }

    /// `recv` (§4.5 steps 1-6, blocking): wait until a matching message
    /// exists, then remove and return it, compacting the inbox in place.
    pub fn recv(&self, sender: Option<&Arc<Machine>>) -> Msg {
        loop {
            {
                let mut inbox = self.inbox.lock().expect("inbox poisoned");
                if let Some(idx) = inbox.find(sender) {
                    let entry = inbox.take(idx);
                    drop(inbox);
                    self.stats.record_receive();
                    return Msg {
                        sender: entry.sender,
                        value: entry.value,
                    };
                }
            }
            let guard = self.inbox_block.lock().expect("inbox_block poisoned");
            let _ = self.inbox_waiting.wait_timeout(guard, RECEIVE_TIMEOUT);
        }
    }

    /// `spawn` (§4.6): create a peer machine with matching stack/heap sizes,
    /// copy `arg` into it, increment `processes`, and run `f` on a new OS
    /// thread bound to the peer. `processes` is decremented and the peer
    /// torn down when `f` returns.
    pub fn spawn<F>(
        self: &Arc<Self>,
        stack_words: usize,
        heap_bytes: usize,
        arg: Value,
        f: F,
    ) -> Arc<Machine>
    where
        F: FnOnce(Arc<Machine>, Value) + Send + 'static,
    {
        let peer = Machine::new(stack_words, heap_bytes, 0);
        let copied_arg = {
            let _g = peer.alloc_lock.lock();
            let mut attempts = 0u32;
            loop {
                match copy::copy_into(&peer, arg) {
                    Some(v) => break v,
                    None => {
                        attempts += 1;
                        if attempts > 1 {
                            fatal("heap too small for spawn argument");
                        }
                        peer.collect_garbage();
                    }
                }
            }
        };

        self.processes.fetch_add(1, Ordering::AcqRel);

        let parent = Arc::clone(self);
        let peer_for_thread = Arc::clone(&peer);
        std::thread::spawn(move || {
            Machine::bind_current(&peer_for_thread);
            f(Arc::clone(&peer_for_thread), copied_arg);
            peer_for_thread.terminate();
            parent.processes.fetch_sub(1, Ordering::AcqRel);
        });

        peer
    }
}

/// Relocate `v` into the (already active) to-space `heap`, copying its cell
/// if not already forwarded. Integers and nullary-table cells pass through
/// untouched.
fn relocate(heap: &mut Heap, v: Value) -> Value {
    if v.is_int() {
        return v;
    }
    let ptr = v.as_ptr();
    if crate::nullary::is_nullary_cell(ptr) {
        return v;
    }

    let header_ptr = unsafe { ptr.sub(HEADER_SIZE) } as *mut CellHeader;
    let header = unsafe { &*header_ptr };

    if header.tag() == Tag::Forward {
        let new_bits = unsafe { *(ptr as *const usize) };
        return Value::from_bits(new_bits);
    }

    let tag = header.tag();
    let chunk = header.chunk_size();
    let payload_len = chunk - HEADER_SIZE;

    let alloc = heap
        .try_bump(payload_len, tag)
        .unwrap_or_else(|| fatal("to-space exhausted during collection"));
    unsafe { std::ptr::copy_nonoverlapping(ptr, alloc.payload, payload_len) };
    let new_value = Value::from_ptr(alloc.payload);

    unsafe {
        header_ptr.write(CellHeader::new(chunk, Tag::Forward));
        (ptr as *mut usize).write(new_value.to_bits());
    }

    match tag {
        Tag::Constructor => {
            let arity = unsafe { *(alloc.payload.add(4) as *const u32) };
            for i in 0..arity {
                let slot = unsafe { alloc.payload.add(8 + i as usize * 8) } as *mut usize;
                let child = Value::from_bits(unsafe { *slot });
                let relocated = relocate(heap, child);
                unsafe { slot.write(relocated.to_bits()) };
            }
        }
        Tag::StrSlice => {
            let slot = alloc.payload as *mut usize;
            let root = Value::from_bits(unsafe { *slot });
            let relocated = relocate(heap, root);
            unsafe { slot.write(relocated.to_bits()) };
        }
        _ => {}
    }

    new_value
}

fn process_init() {
    PROCESS_INIT.call_once(|| {
        #[cfg(unix)]
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        let _ = crate::nullary::nullary_cell(0);
        diagnostics::install_signal_handler();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::string_payload_len;

    #[test]
    fn allocate_returns_zeroed_aligned_payload() {
        let m = Machine::new(64, 4096, 0);
        let v = m.allocate(string_payload_len(3), Tag::Str);
        assert_eq!(v.as_ptr() as usize % 8, 0);
    }

    #[test]
    fn cdata_allocate_is_tracked_in_the_c_heap() {
        let m = Machine::new(64, 4096, 0);
        let owner = Value::from_int(1);
        m.cdata_allocate(16, owner, None);
        assert_eq!(m.c_heap().len(), 1);
    }

    #[test]
    fn collect_garbage_preserves_stack_roots() {
        let m = Machine::new(64, 65536, 0);
        let valstack = unsafe { &mut *m.valstack.get() };
        let mut pushed = Vec::new();
        for i in 0..10u8 {
            let text = format!("string-{i}");
            let bytes = text.as_bytes();
            let v = m.allocate(string_payload_len(bytes.len()), Tag::Str);
            unsafe {
                let payload = v.as_ptr();
                (payload as *mut u64).write(bytes.len() as u64);
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), payload.add(8), bytes.len());
            }
            valstack.push(v);
            pushed.push(text);
        }

        m.collect_garbage();

        let valstack = unsafe { &*m.valstack.get() };
        for (i, text) in pushed.iter().enumerate() {
            let v = valstack.get(i);
            unsafe {
                let len = *(v.as_ptr() as *const u64) as usize;
                let slice = std::slice::from_raw_parts(v.as_ptr().add(8), len);
                assert_eq!(slice, text.as_bytes());
            }
        }
    }

    #[test]
    fn terminate_marks_inactive_and_drops_sends() {
        let parent = Machine::new(64, 4096, 1);
        let child = Machine::new(64, 4096, 0);
        child.terminate();
        assert_eq!(parent.send(&child, Value::from_int(1)), SendOutcome::Dropped);
    }

    #[test]
    fn spawn_send_receive_round_trip() {
        let parent = Machine::new(256, 65536, 1);
        let arg = Value::from_int(7);
        let parent_clone = Arc::clone(&parent);
        let peer = parent.spawn(256, 65536, arg, move |peer_machine, peer_arg| {
            assert_eq!(peer_arg.as_int(), 7);
            peer_machine.send(&parent_clone, Value::from_int(8));
        });
        let msg = parent.recv(Some(&peer));
        assert_eq!(msg.value.as_int(), 8);
        assert!(Arc::ptr_eq(&msg.sender, &peer));
    }
}
