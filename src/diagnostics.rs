//! Runtime diagnostics for production debugging
//!
//! Provides a SIGQUIT (`kill -3`) handler that dumps per-machine runtime
//! statistics to stderr, similar to a JVM thread dump. This is the ambient
//! observability layer this crate carries in place of a `tracing`/`log`
//! dependency, matching its ancestor's choice to ship a signal-triggered
//! stderr dump rather than a structured logging framework.
//!
//! ```bash
//! kill -3 <pid>
//! ```

use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::config::{Config, ReportFormat};
use crate::machine::Machine;

/// One machine's diagnostics fields, shared by the text and JSON dumps.
#[derive(serde::Serialize)]
struct MachineDiagnostics {
    active: bool,
    processes: usize,
    heap_used: Option<usize>,
    heap_capacity: Option<usize>,
    collections: u64,
    inbox_depth: Option<usize>,
}

impl MachineDiagnostics {
    fn snapshot(m: &Machine) -> MachineDiagnostics {
        let (heap_used, heap_capacity) = match m.heap_snapshot() {
            Some((used, cap)) => (Some(used), Some(cap)),
            None => (None, None),
        };
        MachineDiagnostics {
            active: m.is_active(),
            processes: m.processes(),
            heap_used,
            heap_capacity,
            collections: m.stats().collections(),
            inbox_depth: m.inbox_depth(),
        }
    }
}

static SIGNAL_HANDLER_INIT: std::sync::Once = std::sync::Once::new();
static REGISTRY: OnceLock<Mutex<Vec<Weak<Machine>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<Weak<Machine>>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a machine so it shows up in future diagnostics dumps. Called by
/// `Machine::new`. Holds only a `Weak` reference: a torn-down machine whose
/// record has otherwise been dropped simply disappears from the dump.
pub fn register_machine(m: &std::sync::Arc<Machine>) {
    if let Ok(mut guard) = registry().try_lock() {
        guard.push(std::sync::Arc::downgrade(m));
    }
}

/// Install the SIGQUIT signal handler for diagnostics.
///
/// Safe to call multiple times (idempotent via `Once`). Behind the
/// `diagnostics` feature; a no-op on non-Unix targets.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(all(unix, feature = "diagnostics"))]
        {
            unsafe {
                let _ = signal_hook::low_level::register(signal_hook::consts::SIGQUIT, || {
                    dump_diagnostics();
                });
            }
        }
        #[cfg(not(all(unix, feature = "diagnostics")))]
        {
            // Signal handling unavailable; dump_diagnostics() can still be
            // called directly.
        }
    });
}

/// Dump runtime diagnostics to stderr. Can be called directly, or is
/// triggered by SIGQUIT once `install_signal_handler` has run. Format is
/// selected by `MRT_REPORT` (§10.1/§10.3): unset or anything but `json`
/// gives the human-readable dump below; `json` (only meaningful with the
/// `report-json` feature) serializes the same fields via `serde_json`.
///
/// Every field read here uses `try_lock` or a relaxed atomic load only, so
/// this function cannot deadlock against application code holding a
/// machine's locks (best-effort, matching the tradeoff this crate's
/// ancestor makes for its own SIGQUIT handler).
pub fn dump_diagnostics() {
    use std::io::Write;
    let mut out = std::io::stderr().lock();

    let machines: Vec<Arc<Machine>> = match registry().try_lock() {
        Ok(guard) => guard.iter().filter_map(Weak::upgrade).collect(),
        Err(_) => {
            let _ = writeln!(out, "\n=== machine-runtime diagnostics ===");
            let _ = writeln!(out, "machines: (unavailable - registry locked)");
            let _ = writeln!(out, "=== end diagnostics ===\n");
            return;
        }
    };

    let body = match Config::from_env().report {
        #[cfg(feature = "report-json")]
        ReportFormat::Json => format_json(&machines),
        ReportFormat::Text => format_text(&machines),
    };
    let _ = writeln!(out, "{body}");
}

fn format_text(machines: &[Arc<Machine>]) -> String {
    let mut out = String::new();
    out.push_str("\n=== machine-runtime diagnostics ===\n");
    out.push_str(&format!("timestamp: {:?}\n", std::time::SystemTime::now()));
    out.push_str(&format!("machines: {}\n", machines.len()));
    for (idx, m) in machines.iter().enumerate() {
        let d = MachineDiagnostics::snapshot(m);
        out.push_str(&format!("\n[machine {idx}]\n"));
        out.push_str(&format!("  active: {}\n", d.active));
        out.push_str(&format!("  processes: {}\n", d.processes));
        match (d.heap_used, d.heap_capacity) {
            (Some(used), Some(cap)) => out.push_str(&format!("  heap: {used}/{cap} bytes\n")),
            _ => out.push_str("  heap: (unavailable - locked)\n"),
        }
        out.push_str(&format!("  collections: {}\n", d.collections));
        match d.inbox_depth {
            Some(depth) => out.push_str(&format!("  inbox: {depth} pending\n")),
            None => out.push_str("  inbox: (unavailable - locked)\n"),
        }
    }
    out.push_str("\n=== end diagnostics ===\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(machines: &[Arc<Machine>]) -> String {
    #[derive(serde::Serialize)]
    struct Report {
        timestamp: String,
        machines: Vec<MachineDiagnostics>,
    }
    let report = Report {
        timestamp: format!("{:?}", std::time::SystemTime::now()),
        machines: machines.iter().map(|m| MachineDiagnostics::snapshot(m)).collect(),
    };
    serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_diagnostics_does_not_panic() {
        dump_diagnostics();
    }

    #[test]
    fn install_signal_handler_is_idempotent() {
        install_signal_handler();
        install_signal_handler();
    }

    #[test]
    #[cfg(feature = "report-json")]
    fn format_json_serializes_machine_fields() {
        let m = Machine::new(64, 4096, 0);
        let json = format_json(&[m]);
        assert!(json.contains("\"active\":true"));
        assert!(json.contains("\"collections\":0"));
        assert!(json.contains("\"machines\":["));
    }
}
