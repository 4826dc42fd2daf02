//! End-to-end scenarios (§8) exercised through the public API only.

use std::sync::Arc;
use std::time::Duration;

use machine_runtime::cell::{Tag, string_payload_len};
use machine_runtime::machine::Machine;
use machine_runtime::strings;
use machine_runtime::value::Value;

#[test]
fn construct_and_read_back_a_string() {
    let m = Machine::new(256, 65536, 0);
    let v = strings::mkstr(&m, "hello");
    assert_eq!(strings::str_bytes(v), b"hello");
    assert_eq!(strings::str_len(v), 5);
}

#[test]
fn string_concat() {
    let m = Machine::new(256, 65536, 0);
    let a = strings::mkstr(&m, "foo");
    let b = strings::mkstr(&m, "bar");
    let c = strings::concat(&m, a, b);
    assert_eq!(strings::str_bytes(c), b"foobar");
    assert_eq!(strings::str_len(c), 6);
}

#[test]
fn string_tail_preserves_slice_flatness() {
    let m = Machine::new(256, 65536, 0);
    let s = strings::mkstr(&m, "abc");
    let t1 = strings::tail(&m, s);
    let t2 = strings::tail(&m, t1);
    assert_eq!(strings::str_bytes(t2), b"c");

    let ptr = t2.as_ptr();
    let root = Value::from_bits(unsafe { *(ptr as *const usize) });
    let offset = unsafe { *(ptr.add(8) as *const usize) };
    assert_eq!(root, s);
    assert_eq!(offset, 2);
}

#[test]
fn integer_round_trip() {
    let m = Machine::new(256, 65536, 0);
    let s = strings::int_to_str(&m, 42);
    assert_eq!(strings::str_bytes(s), b"42");
    assert_eq!(strings::str_to_int(s), 42);

    let bad = strings::mkstr(&m, "42x");
    assert_eq!(strings::str_to_int(bad), 0);
}

#[test]
fn spawn_send_receive() {
    let parent = Machine::new(256, 65536, 1);
    let parent_for_peer = Arc::clone(&parent);
    let peer = parent.spawn(256, 65536, Value::from_int(7), move |peer_machine, arg| {
        assert_eq!(arg.as_int(), 7);
        let outcome = peer_machine.send(&parent_for_peer, Value::from_int(8));
        assert_eq!(outcome, machine_runtime::SendOutcome::Sent);
    });

    let msg = parent.recv(Some(&peer));
    assert_eq!(msg.value.as_int(), 8);
    assert!(Arc::ptr_eq(&msg.sender, &peer));
}

#[test]
fn gc_preserves_stack_roots() {
    let m = Machine::new(256, 65536, 0);
    let mut expected = Vec::new();
    for i in 0..10 {
        let text = format!("stack-root-{i}");
        let v = strings::mkstr(&m, &text);
        m.push_value(v);
        expected.push(text);
    }

    // Force a collection by allocating past the remaining headroom.
    for _ in 0..64 {
        let _ = m.allocate(string_payload_len(64), Tag::Str);
    }

    for (i, text) in expected.iter().enumerate() {
        let v = m.stack_get(i);
        assert_eq!(strings::str_bytes(v), text.as_bytes());
    }
}

#[test]
fn send_to_inactive_machine_is_dropped() {
    let parent = Machine::new(256, 65536, 1);
    let child = Machine::new(256, 65536, 0);
    child.terminate();
    let outcome = parent.send(&child, Value::from_int(1));
    assert_eq!(outcome, machine_runtime::SendOutcome::Dropped);
    assert_eq!(child.inbox_depth(), Some(0));
}

#[test]
fn require_alloc_window_guarantees_no_gc() {
    let m = Machine::new(256, 65536, 0);
    let before = m.stats().collections();
    {
        let guard = m.require_alloc(string_payload_len(5) * 3);
        let _a = guard.alloc(string_payload_len(5), Tag::Str);
        let _b = guard.alloc(string_payload_len(5), Tag::Str);
    }
    assert_eq!(m.stats().collections(), before);
}

#[test]
fn exact_fit_allocation_boundary() {
    use machine_runtime::cell::HEADER_SIZE;
    let m = Machine::new(256, 4096, 0);
    let (used, cap) = m.heap_snapshot().unwrap();
    let avail = cap - used;
    let exact_payload = avail - HEADER_SIZE;
    let before = m.stats().collections();
    let _ = m.allocate(exact_payload, Tag::RawBlob);
    assert_eq!(m.stats().collections(), before, "exact fit must not collect");
}

#[test]
fn check_timeout_returns_none_when_nothing_arrives() {
    let m = Machine::new(256, 65536, 0);
    let found = m.check_timeout(None, Duration::from_millis(20));
    assert!(found.is_none());
}
