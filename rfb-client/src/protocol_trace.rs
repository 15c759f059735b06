//! Opt-in wire trace. Enabled with `RUST_VNC_TRACE=1` (or at runtime with
//! [`set_enabled`]) and logged at info level under the `protocol_trace`
//! target, one line per message.

use once_cell::sync::Lazy;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

static TRACE_ENABLED: Lazy<AtomicBool> = Lazy::new(|| {
    let on = std::env::var("RUST_VNC_TRACE")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE"))
        .unwrap_or(false);
    AtomicBool::new(on)
});

/// Whether tracing is on.
#[inline]
pub fn enabled() -> bool {
    TRACE_ENABLED.load(Ordering::Relaxed)
}

/// Turn the trace on or off for the whole process.
#[inline]
pub fn set_enabled(on: bool) {
    TRACE_ENABLED.store(on, Ordering::Relaxed)
}

/// Trace a client-to-server message. `fields` is only built when enabled.
#[inline]
pub fn out_msg(label: &str, name: &str, fields: impl FnOnce() -> String) {
    if enabled() {
        tracing::info!(target: "protocol_trace", "[{}] OUT {} {}", label, name, fields());
    }
}

/// Trace a server-to-client message.
#[inline]
pub fn in_msg(label: &str, name: &str, fields: impl FnOnce() -> String) {
    if enabled() {
        tracing::info!(target: "protocol_trace", "[{}] IN  {} {}", label, name, fields());
    }
}

/// Hex dump of at most `max` bytes, 16 per line.
pub fn hexdump(label: &str, data: &[u8], max: usize) {
    if !enabled() || data.is_empty() {
        return;
    }
    for chunk in data[..max.min(data.len())].chunks(16) {
        let mut line = String::with_capacity(chunk.len() * 3);
        for b in chunk {
            let _ = write!(line, " {:02X}", b);
        }
        tracing::info!(target: "protocol_trace", "[{}]{}", label, line);
    }
}
