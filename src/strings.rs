//! String primitives (§6 "String primitives")
//!
//! Out of scope in general (§1: "external collaborators"), but the
//! end-to-end scenarios in §8 exercise string construction, concatenation,
//! tail-slicing, and integer conversion directly, so those are implemented
//! as thin leaves over the cell layouts in `cell.rs`.
//!
//! A string cell's payload is `[len: u64][bytes...][NUL]`; a string-slice
//! cell's payload is `[root: Value][offset: usize]`. Taking the tail of a
//! slice flattens the chain to a single hop against the root string, per
//! the invariant in §3 ("every string-slice cell's root chain terminates at
//! a string cell in at most one hop").

use crate::cell::{STRING_SLICE_PAYLOAD_LEN, Tag, string_payload_len};
use crate::error::{RuntimeError, set_last_error};
use crate::machine::Machine;
use crate::value::Value;

/// `MKSTR` (§8 scenario 1): allocate a new string cell holding `s`'s bytes.
pub fn mkstr(m: &Machine, s: &str) -> Value {
    let bytes = s.as_bytes();
    let v = m.allocate(string_payload_len(bytes.len()), Tag::Str);
    write_str_payload(v, bytes);
    v
}

fn write_str_payload(v: Value, bytes: &[u8]) {
    unsafe {
        let payload = v.as_ptr();
        (payload as *mut u64).write(bytes.len() as u64);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), payload.add(8), bytes.len());
        *payload.add(8 + bytes.len()) = 0; // NUL terminator
    }
}

/// Read back a cell's bytes, resolving one level of string-slice
/// indirection if needed (§3 invariant: at most one hop).
///
/// The `'static` lifetime is a convenience, not a guarantee: like every
/// other raw dereference of a `Value` in this crate, the returned slice is
/// only valid until the owning machine's next collection.
pub fn str_bytes(v: Value) -> &'static [u8] {
    let ptr = v.as_ptr();
    let header = unsafe { &*(ptr.sub(crate::cell::HEADER_SIZE) as *const crate::cell::CellHeader) };
    match header.tag() {
        Tag::Str => unsafe {
            let len = *(ptr as *const u64) as usize;
            std::slice::from_raw_parts(ptr.add(8), len)
        },
        Tag::StrSlice => unsafe {
            let root = Value::from_bits(*(ptr as *const usize));
            let offset = *(ptr.add(8) as *const usize);
            &str_bytes(root)[offset..]
        },
        other => panic!("str_bytes: not a string or string-slice cell: {other:?}"),
    }
}

/// Length in bytes. (§6 names "length in code points"; every string this
/// crate constructs is validated UTF-8 at construction, so callers that
/// need code-point length can decode the bytes themselves.)
pub fn str_len(v: Value) -> usize {
    str_bytes(v).len()
}

/// `concat` (§8 scenario 2).
pub fn concat(m: &Machine, a: Value, b: Value) -> Value {
    let a_bytes = str_bytes(a);
    let b_bytes = str_bytes(b);
    let mut combined = Vec::with_capacity(a_bytes.len() + b_bytes.len());
    combined.extend_from_slice(a_bytes);
    combined.extend_from_slice(b_bytes);
    let v = m.allocate(string_payload_len(combined.len()), Tag::Str);
    write_str_payload(v, &combined);
    v
}

/// `tail` (§8 scenario 3): drop the first byte, flattening any existing
/// slice chain so the new slice's root is always a real string cell.
pub fn tail(m: &Machine, v: Value) -> Value {
    // §4.3: reserve before reading `root` off the current heap. `root` is a
    // raw reference, not copied bytes, so it must not be read on one side of
    // a GC-triggering allocation and written unchanged on the other —
    // `require_alloc` performs any needed collection up front, so the
    // guarded `alloc` below is guaranteed not to collect between the two.
    let guard = m.require_alloc(STRING_SLICE_PAYLOAD_LEN);
    let ptr = v.as_ptr();
    let header = unsafe { &*(ptr.sub(crate::cell::HEADER_SIZE) as *const crate::cell::CellHeader) };
    let (root, offset) = match header.tag() {
        Tag::Str => (v, 0usize),
        Tag::StrSlice => unsafe {
            let root = Value::from_bits(*(ptr as *const usize));
            let offset = *(ptr.add(8) as *const usize);
            (root, offset)
        },
        other => panic!("tail: not a string or string-slice cell: {other:?}"),
    };
    let new_offset = offset + 1;
    let slice = guard.alloc(STRING_SLICE_PAYLOAD_LEN, Tag::StrSlice);
    unsafe {
        let payload = slice.as_ptr();
        (payload as *mut usize).write(root.to_bits());
        (payload.add(8) as *mut usize).write(new_offset);
    }
    slice
}

/// `int_to_str` (§8 scenario 4).
pub fn int_to_str(m: &Machine, n: i64) -> Value {
    mkstr(m, &n.to_string())
}

/// `str_to_int` (§8 scenario 4, §7: malformed input returns zero).
pub fn str_to_int(v: Value) -> i64 {
    let bytes = str_bytes(v);
    match std::str::from_utf8(bytes).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => n,
        None => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            set_last_error(RuntimeError::MalformedInput(text));
            0
        }
    }
}

/// Lexicographic comparison, byte-wise.
pub fn str_compare(a: Value, b: Value) -> std::cmp::Ordering {
    str_bytes(a).cmp(str_bytes(b))
}
