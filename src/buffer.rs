//! Byte-buffer primitives (§1, §6: direct heap-cell accessors kept in
//! scope even though most system-call-adjacent leaves are not)
//!
//! Thin accessors over `ManagedPtr`/`RawBlob` cell payloads: peek, poke,
//! memset, memmove, and typed peek/poke of a pointer-sized or `f64` word at
//! a byte offset. Bounds are the caller's responsibility, same as the
//! reference crate's C-level equivalents — these are leaves, not a safe
//! buffer abstraction.

use crate::cell::{CellHeader, HEADER_SIZE, Tag};
use crate::value::Value;

fn payload_and_len(v: Value) -> (*mut u8, usize) {
    let ptr = v.as_ptr();
    let header = unsafe { &*(ptr.sub(HEADER_SIZE) as *const CellHeader) };
    match header.tag() {
        Tag::ManagedPtr | Tag::RawBlob => {
            let len = unsafe { *(ptr as *const u64) } as usize;
            (unsafe { ptr.add(8) }, len)
        }
        other => panic!("buffer op: not a managed-pointer or raw-blob cell: {other:?}"),
    }
}

/// `peek(buf, offset) -> u8`.
pub fn peek(v: Value, offset: usize) -> u8 {
    let (base, len) = payload_and_len(v);
    assert!(offset < len, "peek: offset out of range");
    unsafe { *base.add(offset) }
}

/// `poke(buf, offset, byte)`.
pub fn poke(v: Value, offset: usize, byte: u8) {
    let (base, len) = payload_and_len(v);
    assert!(offset < len, "poke: offset out of range");
    unsafe { base.add(offset).write(byte) };
}

/// `memset(buf, offset, byte, count)`.
pub fn memset(v: Value, offset: usize, byte: u8, count: usize) {
    let (base, len) = payload_and_len(v);
    assert!(offset + count <= len, "memset: range out of bounds");
    unsafe { std::ptr::write_bytes(base.add(offset), byte, count) };
}

/// `memmove(dst, dst_offset, src, src_offset, count)`: may be the same
/// buffer with overlapping ranges, hence `copy` (not `copy_nonoverlapping`).
pub fn memmove(dst: Value, dst_offset: usize, src: Value, src_offset: usize, count: usize) {
    let (dst_base, dst_len) = payload_and_len(dst);
    let (src_base, src_len) = payload_and_len(src);
    assert!(dst_offset + count <= dst_len, "memmove: destination out of bounds");
    assert!(src_offset + count <= src_len, "memmove: source out of bounds");
    unsafe { std::ptr::copy(src_base.add(src_offset), dst_base.add(dst_offset), count) };
}

/// Peek a pointer-sized (`usize`) word at a byte offset.
pub fn peek_ptr(v: Value, offset: usize) -> usize {
    let (base, len) = payload_and_len(v);
    assert!(offset + size_of::<usize>() <= len, "peek_ptr: offset out of range");
    unsafe { (base.add(offset) as *const usize).read_unaligned() }
}

/// Poke a pointer-sized (`usize`) word at a byte offset.
pub fn poke_ptr(v: Value, offset: usize, word: usize) {
    let (base, len) = payload_and_len(v);
    assert!(offset + size_of::<usize>() <= len, "poke_ptr: offset out of range");
    unsafe { (base.add(offset) as *mut usize).write_unaligned(word) };
}

/// Peek an `f64` at a byte offset.
pub fn peek_double(v: Value, offset: usize) -> f64 {
    let (base, len) = payload_and_len(v);
    assert!(offset + size_of::<f64>() <= len, "peek_double: offset out of range");
    unsafe { (base.add(offset) as *const f64).read_unaligned() }
}

/// Poke an `f64` at a byte offset.
pub fn poke_double(v: Value, offset: usize, word: f64) {
    let (base, len) = payload_and_len(v);
    assert!(offset + size_of::<f64>() <= len, "poke_double: offset out of range");
    unsafe { (base.add(offset) as *mut f64).write_unaligned(word) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::blob_payload_len;
    use crate::machine::Machine;

    fn make_blob(m: &Machine, len: usize) -> Value {
        let v = m.allocate(blob_payload_len(len), Tag::RawBlob);
        unsafe { (v.as_ptr() as *mut u64).write(len as u64) };
        v
    }

    #[test]
    fn poke_then_peek_round_trips() {
        let m = Machine::new(64, 4096, 0);
        let buf = make_blob(&m, 8);
        poke(buf, 3, 0xAB);
        assert_eq!(peek(buf, 3), 0xAB);
    }

    #[test]
    fn memset_fills_range() {
        let m = Machine::new(64, 4096, 0);
        let buf = make_blob(&m, 8);
        memset(buf, 2, 0x11, 4);
        for i in 2..6 {
            assert_eq!(peek(buf, i), 0x11);
        }
        assert_eq!(peek(buf, 0), 0);
        assert_eq!(peek(buf, 6), 0);
    }

    #[test]
    fn memmove_handles_overlap() {
        let m = Machine::new(64, 4096, 0);
        let buf = make_blob(&m, 8);
        for i in 0..8u8 {
            poke(buf, i as usize, i);
        }
        memmove(buf, 2, buf, 0, 4);
        for i in 0..4u8 {
            assert_eq!(peek(buf, 2 + i as usize), i);
        }
    }

    #[test]
    fn ptr_and_double_round_trip() {
        let m = Machine::new(64, 4096, 0);
        let buf = make_blob(&m, 16);
        poke_ptr(buf, 0, 0xdead_beef);
        assert_eq!(peek_ptr(buf, 0), 0xdead_beef);
        poke_double(buf, 8, 3.5);
        assert_eq!(peek_double(buf, 8), 3.5);
    }
}
