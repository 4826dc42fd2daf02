//! Runtime configuration (§10.3)
//!
//! There is no configuration file. `Machine::new` takes explicit sizes;
//! this module exists purely as an additive convenience for an embedder's
//! `main`, reading the handful of environment variables the reference
//! crate's own top-level binaries read once at startup.

use std::env;

const DEFAULT_STACK_WORDS: usize = 4096;
const DEFAULT_HEAP_BYTES: usize = 1 << 20;
const DEFAULT_MAX_PEERS: usize = 16;

/// Report-snapshot format selected via `MRT_REPORT` (§10.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    #[cfg(feature = "report-json")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub stack_words: usize,
    pub heap_bytes: usize,
    pub max_peers: usize,
    pub report: ReportFormat,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            stack_words: DEFAULT_STACK_WORDS,
            heap_bytes: DEFAULT_HEAP_BYTES,
            max_peers: DEFAULT_MAX_PEERS,
            report: ReportFormat::Text,
        }
    }
}

impl Config {
    /// Read `MRT_STACK_WORDS`, `MRT_HEAP_BYTES`, `MRT_MAX_PEERS`, and
    /// `MRT_REPORT` from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Config {
        let mut cfg = Config::default();
        if let Some(v) = parse_env("MRT_STACK_WORDS") {
            cfg.stack_words = v;
        }
        if let Some(v) = parse_env("MRT_HEAP_BYTES") {
            cfg.heap_bytes = v;
        }
        if let Some(v) = parse_env("MRT_MAX_PEERS") {
            cfg.max_peers = v;
        }
        if let Ok(report) = env::var("MRT_REPORT") {
            #[cfg(feature = "report-json")]
            if report.eq_ignore_ascii_case("json") {
                cfg.report = ReportFormat::Json;
            }
            let _ = report;
        }
        cfg
    }
}

fn parse_env(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_nonzero() {
        let cfg = Config::default();
        assert!(cfg.stack_words > 0);
        assert!(cfg.heap_bytes > 0);
        assert!(cfg.max_peers > 0);
    }

    #[test]
    fn unset_env_falls_back_to_defaults() {
        // SAFETY: tests run single-threaded for env mutation purposes here;
        // no other test in this module touches these variables.
        unsafe {
            std::env::remove_var("MRT_STACK_WORDS");
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.stack_words, DEFAULT_STACK_WORDS);
    }
}
