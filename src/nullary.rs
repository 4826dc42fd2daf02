//! Nullary interning + globals (§3 "Nullary cell table", §9 design note)
//!
//! A process-wide table of 256 pre-allocated zero-arity constructor cells,
//! one per small tag, shared by every machine and never garbage-collected.
//! `copy::copy_into` consults this table so that nullary constructors with
//! `tag < 256` are shared by reference across machines instead of being
//! deep-copied (§4.4).
//!
//! The table lives outside any machine's heap in a small leaked buffer,
//! initialized exactly once behind a `OnceLock`, mirroring this crate's
//! ancestor's `OnceLock`-backed global registries (e.g. the cross-thread
//! memory-stats registry).

use std::sync::OnceLock;

use crate::cell::{CellHeader, HEADER_SIZE, Tag, constructor_payload_len};
use crate::value::Value;

const TABLE_SIZE: usize = 256;

struct NullaryTable {
    base: *mut u8,
    entry_stride: usize,
}

// Safety: the table is written exactly once at construction time and is
// read-only (shared, immortal) ever after.
unsafe impl Sync for NullaryTable {}
unsafe impl Send for NullaryTable {}

static TABLE: OnceLock<NullaryTable> = OnceLock::new();

fn table() -> &'static NullaryTable {
    TABLE.get_or_init(|| {
        let payload_len = constructor_payload_len(0);
        let stride = HEADER_SIZE + payload_len;
        let total = stride * TABLE_SIZE;
        let mut buf: Vec<u8> = vec![0u8; total];
        let base = buf.as_mut_ptr();
        std::mem::forget(buf); // leak: this table lives for the process

        for tag in 0u32..TABLE_SIZE as u32 {
            unsafe {
                let entry = base.add(tag as usize * stride);
                let header = entry as *mut CellHeader;
                header.write(CellHeader::new(stride, Tag::Constructor));
                let payload = entry.add(HEADER_SIZE);
                // packed tag+arity word: tag in the low u32, arity (0) in the high u32
                (payload as *mut u32).write(tag);
                (payload.add(4) as *mut u32).write(0);
            }
        }

        NullaryTable {
            base,
            entry_stride: stride,
        }
    })
}

/// The process-wide global cell for nullary constructor `tag` (must be `< 256`).
pub fn nullary_cell(tag: u8) -> Value {
    let t = table();
    let entry = unsafe { t.base.add(tag as usize * t.entry_stride) };
    let payload = unsafe { entry.add(HEADER_SIZE) };
    Value::from_ptr(payload)
}

/// True if `ptr` is the payload address of some entry in the global nullary table.
pub fn is_nullary_cell(ptr: *mut u8) -> bool {
    let t = table();
    let base = t.base as usize;
    let end = base + t.entry_stride * TABLE_SIZE;
    let addr = ptr as usize;
    addr >= base + HEADER_SIZE && addr < end
}
