//! Debug logging for tempmail
//!
//! Appends timestamped lines to ~/.config/tempmail/debug.log when enabled.
//! The TUI owns the terminal in raw mode, so nothing may go to stderr.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Instant;

use crate::config;

const LOG_FILE: &str = "debug.log";

static DEBUG_STATE: OnceLock<Mutex<DebugState>> = OnceLock::new();

struct DebugState {
    file: Option<File>,
    start_time: Instant,
}

/// Opens the log for appending and marks the start of a session
fn open_log(path: &Path) -> Option<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()?;
    let _ = writeln!(
        file,
        "\n========== tempmail session started at {} ==========",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    Some(file)
}

/// Initializes debug logging. Only the first call has any effect.
pub fn init(enabled: bool) {
    let file = if enabled {
        config::ensure_config_dir()
            .ok()
            .and_then(|dir| open_log(&dir.join(LOG_FILE)))
    } else {
        None
    };

    let _ = DEBUG_STATE.set(Mutex::new(DebugState {
        file,
        start_time: Instant::now(),
    }));
}

/// Returns true when log lines are actually written somewhere
pub fn is_enabled() -> bool {
    DEBUG_STATE
        .get()
        .and_then(|state| state.lock().ok().map(|guard| guard.file.is_some()))
        .unwrap_or(false)
}

/// Logs a message with the time since startup. No-op when disabled.
pub fn log(message: &str) {
    if let Some(state) = DEBUG_STATE.get()
        && let Ok(mut guard) = state.lock()
    {
        let elapsed = guard.start_time.elapsed();
        if let Some(ref mut file) = guard.file {
            let _ = writeln!(file, "[{:>8.3}s] {}", elapsed.as_secs_f64(), message);
            let _ = file.flush();
        }
    }
}

/// Logs a formatted debug message.
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        $crate::debug::log(&format!($($arg)*))
    };
}
