//! C-heap: finalizer-tracked auxiliary heap (§3 `c_heap`, §4 component 4)
//!
//! Only the *interface* is specified: a linked list of records describing
//! externally owned payloads, each tied to an owning cell in the managed
//! heap. The collector consults this list after relocating roots: any
//! record whose owner was not relocated (i.e. is unreachable) is finalized
//! and unlinked; every other record is kept, with its owner reference
//! updated to the new address, same as any other root.

use crate::value::Value;

pub type Finalizer = unsafe extern "C" fn(*mut u8, usize);

struct Record {
    ptr: *mut u8,
    size: usize,
    finalizer: Option<Finalizer>,
    owner: Value,
    next: Option<Box<Record>>,
}

/// A machine's finalizer-tracked auxiliary heap.
#[derive(Default)]
pub struct CHeap {
    head: Option<Box<Record>>,
}

impl CHeap {
    pub fn new() -> CHeap {
        CHeap { head: None }
    }

    /// `cdata_allocate`: allocate `size` bytes outside the managed heap,
    /// registering them under `owner` with `finalizer` to run when `owner`
    /// is determined unreachable.
    pub fn allocate(&mut self, size: usize, owner: Value, finalizer: Option<Finalizer>) -> *mut u8 {
        let layout = std::alloc::Layout::array::<u8>(size.max(1)).expect("cdata layout overflow");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        self.manage(ptr, size, owner, finalizer);
        ptr
    }

    /// `cdata_manage`: register an already-owned externally allocated
    /// pointer for finalizer tracking.
    pub fn manage(&mut self, ptr: *mut u8, size: usize, owner: Value, finalizer: Option<Finalizer>) {
        let record = Box::new(Record {
            ptr,
            size,
            finalizer,
            owner,
            next: self.head.take(),
        });
        self.head = Some(record);
    }

    /// Visit every owner `Value` currently tracked (GC root set
    /// contribution, §4.2.1: "all C-heap entries that report live").
    pub fn for_each_owner(&self, mut f: impl FnMut(Value)) {
        let mut cur = &self.head;
        while let Some(record) = cur {
            f(record.owner);
            cur = &record.next;
        }
    }

    /// Update every record's owner reference in place (after relocation),
    /// then drop and finalize any record whose `is_live` predicate now
    /// returns false.
    pub fn sweep(&mut self, mut relocate: impl FnMut(Value) -> Option<Value>) {
        let mut head = self.head.take();
        let mut kept: Option<Box<Record>> = None;
        let mut kept_tail: *mut Option<Box<Record>> = &mut kept;

        while let Some(mut record) = head {
            head = record.next.take();
            match relocate(record.owner) {
                Some(new_owner) => {
                    record.owner = new_owner;
                    unsafe {
                        *kept_tail = Some(record);
                        kept_tail = &mut (*kept_tail).as_mut().unwrap().next;
                    }
                }
                None => {
                    if let Some(f) = record.finalizer {
                        unsafe { f(record.ptr, record.size) };
                    } else {
                        let layout = std::alloc::Layout::array::<u8>(record.size.max(1))
                            .expect("cdata layout overflow");
                        unsafe { std::alloc::dealloc(record.ptr, layout) };
                    }
                }
            }
        }

        self.head = kept;
    }

    /// Finalize and unlink the record for `ptr` immediately, without waiting
    /// for a collection. Returns `false` if no record for `ptr` is tracked.
    pub fn release(&mut self, ptr: *mut u8) -> bool {
        let mut head = self.head.take();
        let mut kept: Option<Box<Record>> = None;
        let mut kept_tail: *mut Option<Box<Record>> = &mut kept;
        let mut released = false;

        while let Some(mut record) = head {
            head = record.next.take();
            if !released && record.ptr == ptr {
                if let Some(f) = record.finalizer {
                    unsafe { f(record.ptr, record.size) };
                } else {
                    let layout = std::alloc::Layout::array::<u8>(record.size.max(1))
                        .expect("cdata layout overflow");
                    unsafe { std::alloc::dealloc(record.ptr, layout) };
                }
                released = true;
            } else {
                unsafe {
                    *kept_tail = Some(record);
                    kept_tail = &mut (*kept_tail).as_mut().unwrap().next;
                }
            }
        }

        self.head = kept;
        released
    }

    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = &self.head;
        while let Some(record) = cur {
            n += 1;
            cur = &record.next;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl Drop for CHeap {
    fn drop(&mut self) {
        let mut head = self.head.take();
        while let Some(mut record) = head {
            head = record.next.take();
            if let Some(f) = record.finalizer {
                unsafe { f(record.ptr, record.size) };
            } else {
                let layout =
                    std::alloc::Layout::array::<u8>(record.size.max(1)).expect("cdata layout overflow");
                unsafe { std::alloc::dealloc(record.ptr, layout) };
            }
        }
    }
}
