//! Backtrace capture and frame shaping
//!
//! Turns `std::backtrace::Backtrace` output into the ordered frame strings
//! the record model carries, and trims the capture machinery off the top
//! so the first frame of an origin is the panic site, not the panic hook.

use std::backtrace::Backtrace;

/// Frame symbols that sit between the hook and the real panic site. They
/// form a contiguous prefix of the capture: backtrace helpers, the
/// interceptor itself, then the std panic plumbing down to the panic site.
const MACHINERY_MARKERS: &[&str] = &[
    "core::panicking",
    "std::panic",
    "rust_begin_unwind",
    "__rust_",
    "std::backtrace",
    "backtrace::backtrace",
    "faultline_agent::interceptor",
    "faultline_agent::snapshot",
];

/// Captures the current thread's stack as shaped frame strings, with the
/// capture machinery trimmed off.
pub fn capture_origin_frames() -> Vec<String> {
    let backtrace = Backtrace::force_capture().to_string();
    trim_machinery(parse_frames(&backtrace))
}

/// Name of the current thread, with a stable fallback for unnamed threads.
pub fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}

/// Parses the multi-line `Backtrace` display format into one string per
/// frame: `symbol` or `symbol (at file:line:col)`.
pub fn parse_frames(backtrace: &str) -> Vec<String> {
    let mut frames: Vec<String> = Vec::new();
    for line in backtrace.lines() {
        let trimmed = line.trim();
        if let Some((index, symbol)) = trimmed.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(symbol.trim().to_string());
                continue;
            }
        }
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(last) = frames.last_mut() {
                last.push_str(&format!(" (at {location})"));
            }
        }
    }
    frames
}

/// Drops the leading run of capture-machinery frames. Deeper runtime
/// frames (e.g. `std::panicking::try` under `lang_start`) are kept; a
/// backtrace with no leading machinery comes back unchanged.
pub fn trim_machinery(frames: Vec<String>) -> Vec<String> {
    let first_user = frames
        .iter()
        .position(|frame| !MACHINERY_MARKERS.iter().any(|m| frame.contains(m)));

    match first_user {
        Some(0) => frames,
        Some(index) => frames[index..].to_vec(),
        None => Vec::new(),
    }
}
