//! Line-oriented status output on stdout, consumed by the front-end.
//!
//! Every message carries a severity prefix; the single `FOUND:` line is the
//! machine-readable success marker. Lines are flushed immediately so a piped
//! consumer sees them as they happen.

use std::io::{self, Write};

fn emit(line: &str) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

pub fn info(message: &str) {
    emit(&format!("INFO: {message}"));
}

pub fn warn(message: &str) {
    emit(&format!("WARN: {message}"));
}

pub fn error(message: &str) {
    emit(&format!("ERROR: {message}"));
}

pub fn fatal(message: &str) {
    emit(&format!("FATAL: {message}"));
}

/// Reports the recovered password. Emitted at most once per run.
pub fn found(password: &str) {
    emit(&format!("FOUND:{password}"));
}
