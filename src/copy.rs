//! Cross-machine copy (§4.4)
//!
//! `copy_into(dest, x)` produces a structurally identical deep copy of `x`
//! in `dest`'s heap. Integers pass through unchanged; nullary constructors
//! with `tag < 256` are shared by reference via the global table
//! (`nullary.rs`) instead of copied; everything else is recursively
//! deep-copied, per the table in §4.4.
//!
//! This function never triggers GC itself — it returns `None` the moment it
//! cannot fit the next cell, so the caller (`Machine::send`) can collect
//! `dest` and restart the whole traversal from scratch, exactly the retry
//! discipline §4.4 describes ("the first attempt's pointers are
//! invalidated").

use crate::cell::{CellHeader, HEADER_SIZE, STRING_SLICE_PAYLOAD_LEN, Tag, constructor_payload_len};
use crate::machine::Machine;
use crate::nullary;
use crate::value::Value;

/// Deep-copy `v` (which must belong to some *other* machine's heap) into
/// `dest`. Returns `None` if `dest` ran out of room partway through; the
/// caller is responsible for collecting `dest` and calling this again from
/// scratch.
pub fn copy_into(dest: &Machine, v: Value) -> Option<Value> {
    if v.is_int() {
        return Some(v);
    }

    let ptr = v.as_ptr();
    if nullary::is_nullary_cell(ptr) {
        return Some(v);
    }

    let header = unsafe { &*(ptr.sub(HEADER_SIZE) as *const CellHeader) };
    let tag = header.tag();
    let payload_len = header.chunk_size() - HEADER_SIZE;

    match tag {
        Tag::Constructor => {
            let arity = unsafe { *(ptr.add(4) as *const u32) };
            let new_v = dest.try_bump_raw(constructor_payload_len(arity), Tag::Constructor)?;
            let new_ptr = new_v.as_ptr();
            unsafe { std::ptr::copy_nonoverlapping(ptr, new_ptr, 8) };
            for i in 0..arity {
                let slot = unsafe { ptr.add(8 + i as usize * 8) as *const usize };
                let child = Value::from_bits(unsafe { *slot });
                let new_child = copy_into(dest, child)?;
                let new_slot = unsafe { new_ptr.add(8 + i as usize * 8) as *mut usize };
                unsafe { new_slot.write(new_child.to_bits()) };
            }
            Some(new_v)
        }
        Tag::StrSlice => {
            let root = Value::from_bits(unsafe { *(ptr as *const usize) });
            let offset = unsafe { *(ptr.add(8) as *const usize) };
            let new_root = copy_into(dest, root)?;
            let new_v = dest.try_bump_raw(STRING_SLICE_PAYLOAD_LEN, Tag::StrSlice)?;
            let new_ptr = new_v.as_ptr();
            unsafe {
                (new_ptr as *mut usize).write(new_root.to_bits());
                (new_ptr.add(8) as *mut usize).write(offset);
            }
            Some(new_v)
        }
        Tag::Forward => unreachable!("a live value never points at a forwarded cell"),
        _ => {
            let new_v = dest.try_bump_raw(payload_len, tag)?;
            unsafe { std::ptr::copy_nonoverlapping(ptr, new_v.as_ptr(), payload_len) };
            Some(new_v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::string_payload_len;

    #[test]
    fn integers_pass_through_unchanged() {
        let dest = Machine::new(64, 4096, 0);
        let v = Value::from_int(42);
        assert_eq!(copy_into(&dest, v), Some(v));
    }

    #[test]
    fn string_is_deep_copied() {
        let src = Machine::new(64, 4096, 0);
        let bytes = b"hello";
        let s = src.require_alloc(string_payload_len(bytes.len()));
        let v = s.alloc(string_payload_len(bytes.len()), Tag::Str);
        unsafe {
            let payload = v.as_ptr();
            (payload as *mut u64).write(bytes.len() as u64);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), payload.add(8), bytes.len());
        }
        drop(s);

        let dest = Machine::new(64, 4096, 0);
        let copied = copy_into(&dest, v).expect("room for a 5-byte string");
        assert_ne!(copied.as_ptr(), v.as_ptr());
        unsafe {
            let len = *(copied.as_ptr() as *const u64) as usize;
            assert_eq!(len, 5);
            let slice = std::slice::from_raw_parts(copied.as_ptr().add(8), len);
            assert_eq!(slice, bytes);
        }
    }

    #[test]
    fn nullary_cells_are_shared_not_copied() {
        let dest = Machine::new(64, 4096, 0);
        let n = nullary::nullary_cell(3);
        assert_eq!(copy_into(&dest, n), Some(n));
    }
}
