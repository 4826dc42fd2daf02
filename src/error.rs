//! Runtime error handling (§7 ERROR HANDLING DESIGN)
//!
//! The taxonomy is small and coarse: fatal/unrecoverable conditions abort
//! the process with a short diagnostic; recoverable conditions are
//! reported through thread-local last-error state instead of panicking,
//! the same FFI-safe pattern this crate's ancestor uses so that embedders
//! calling across a C boundary never have to deal with an unwind.
//!
//! There is no global error channel and errors are never thrown across
//! machine boundaries (§7). `last_error_cstr` exposes the pending error as
//! an opaque C string, the shape an FFI-style entry point would hand back,
//! even though this crate does not itself export `extern "C"` symbols.

use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;
use std::ptr;

/// Coarse error taxonomy for pure-Rust callers (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Send to an inactive recipient: the message was dropped, not an error
    /// in the usual sense, but surfaced through the same channel.
    Dropped,
    /// A malformed conversion (e.g. `str_to_int` on a non-numeric string).
    MalformedInput(String),
    /// End-of-file or a read error on an input source.
    EndOfInput,
    /// Anything else a caller chose to report through `set_last_error`.
    Other(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Dropped => write!(f, "message dropped: recipient is not active"),
            RuntimeError::MalformedInput(s) => write!(f, "malformed input: {s}"),
            RuntimeError::EndOfInput => write!(f, "end of input"),
            RuntimeError::Other(s) => write!(f, "{s}"),
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<RuntimeError>> = const { RefCell::new(None) };
    static ERROR_CSTRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record a recoverable error on the current thread (§7 "recoverable at the call site").
pub fn set_last_error(err: RuntimeError) {
    ERROR_CSTRING.with(|cs| *cs.borrow_mut() = None);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(err));
}

/// Take (and clear) the last recorded error.
pub fn take_last_error() -> Option<RuntimeError> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn has_error() -> bool {
    LAST_ERROR.with(|e| e.borrow().is_some())
}

pub fn clear_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    ERROR_CSTRING.with(|e| *e.borrow_mut() = None);
}

/// Fatal, unrecoverable condition (§7): value-stack overflow, inbox
/// overflow, heap exhausted after a retried GC, or an invalid cell tag
/// encountered during copy. Writes a short diagnostic to stderr and aborts
/// the process — never unwinds, matching §10.2's requirement that a fatal
/// condition cannot look like a recoverable one to a caller across what
/// would be an FFI boundary in the reference crate.
pub fn fatal(msg: &str) -> ! {
    eprintln!("machine-runtime: fatal: {msg}");
    std::process::abort();
}

/// FFI-safe accessor: current error as a C string, or null if none pending.
///
/// The returned pointer is valid only until the next call to
/// `set_last_error`, `last_error_cstr`, `take_last_error_cstr`, or
/// `clear_error` on this thread.
pub fn last_error_cstr() -> *const std::os::raw::c_char {
    LAST_ERROR.with(|e| {
        let err = e.borrow();
        match &*err {
            Some(msg) => ERROR_CSTRING.with(|cs| {
                let safe = msg.to_string().replace('\0', "?");
                let cstring = CString::new(safe).expect("null bytes already replaced");
                let ptr = cstring.as_ptr();
                *cs.borrow_mut() = Some(cstring);
                ptr
            }),
            None => ptr::null(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_take_error() {
        clear_error();
        assert!(!has_error());
        set_last_error(RuntimeError::EndOfInput);
        assert!(has_error());
        assert_eq!(take_last_error(), Some(RuntimeError::EndOfInput));
        assert!(!has_error());
    }

    #[test]
    fn clear_removes_pending_error() {
        set_last_error(RuntimeError::Dropped);
        assert!(has_error());
        clear_error();
        assert!(!has_error());
        assert!(take_last_error().is_none());
    }

    #[test]
    fn last_error_cstr_reflects_message() {
        clear_error();
        set_last_error(RuntimeError::MalformedInput("42x".to_string()));
        let ptr = last_error_cstr();
        assert!(!ptr.is_null());
        let s = unsafe { std::ffi::CStr::from_ptr(ptr) }.to_str().unwrap();
        assert!(s.contains("42x"));
    }
}
