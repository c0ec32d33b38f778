//! Central kernel logger for the `log` facade, with optional in-memory
//! capture for later inspection.
//!
//! Every record becomes one line `[LEVEL] target: message`. The line goes to
//! the installed sink (the serial port on bare metal) and, while capture is
//! enabled, into a bounded buffer tagged with its target.

use core::fmt::{self, Write as _};

use log::{LevelFilter, Metadata, Record};

use crate::sync::spinlock::SpinLock;

const CAPTURE_BUF_SIZE: usize = 16 * 1024;

/// Longest formatted line; longer lines are cut.
const LINE_MAX: usize = 256;

/// Receives each formatted log line (without trailing newline).
pub type LogSink = fn(&str);

struct LogState {
    sink: Option<LogSink>,
    capture_enabled: bool,
    capture_len: usize,
    capture_overflow: bool,
    capture_buf: [u8; CAPTURE_BUF_SIZE],
}

pub struct KernelLogger {
    // Leaf lock: taken while the scheduler lock may be held, never the
    // other way around.
    state: SpinLock<LogState>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self {
            state: SpinLock::new(LogState {
                sink: None,
                capture_enabled: false,
                capture_len: 0,
                capture_overflow: false,
                capture_buf: [0; CAPTURE_BUF_SIZE],
            }),
        }
    }
}

static LOGGER: KernelLogger = KernelLogger::new();

/// Fixed-size line under construction.
struct LineBuffer {
    buf: [u8; LINE_MAX],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; LINE_MAX],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // Truncation in `write_str` only ever cuts at char boundaries.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_MAX - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

impl LogState {
    /// Appends `target|line\n`, truncating on overflow.
    fn capture(&mut self, target: &str, line: &str) {
        for part in [target, "|", line, "\n"] {
            let bytes = part.as_bytes();
            let remaining = CAPTURE_BUF_SIZE.saturating_sub(self.capture_len);
            let write_len = remaining.min(bytes.len());

            if write_len > 0 {
                let start = self.capture_len;
                let end = start + write_len;
                self.capture_buf[start..end].copy_from_slice(&bytes[..write_len]);
                self.capture_len = end;
            }
            if write_len < bytes.len() {
                self.capture_overflow = true;
                return;
            }
        }
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = LineBuffer::new();
        let _ = write!(
            line,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );

        let mut state = self.state.lock();
        if let Some(sink) = state.sink {
            sink(line.as_str());
        }
        if state.capture_enabled {
            state.capture(record.target(), line.as_str());
        }
    }

    fn flush(&self) {}
}

/// Installs the kernel logger with `level` and `sink`.
///
/// Calling it again replaces the sink and level; the logger itself stays
/// installed.
pub fn init(level: LevelFilter, sink: LogSink) {
    LOGGER.state.lock().sink = Some(sink);
    // Fails only when a logger is already installed, which is fine on re-init.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Discards every line. Handy when only capture is wanted.
pub fn null_sink(_line: &str) {}

/// Enable/disable the capture buffer and reset it.
pub fn set_capture_enabled(enabled: bool) {
    let mut state = LOGGER.state.lock();
    state.capture_enabled = enabled;
    state.capture_len = 0;
    state.capture_overflow = false;
}

/// Whether captured output was cut because the buffer filled up.
pub fn captured_overflowed() -> bool {
    LOGGER.state.lock().capture_overflow
}

/// Calls `f` with each captured line of `target`, oldest first.
///
/// `f` runs under the logger lock and must not log.
pub fn with_captured(target: &str, mut f: impl FnMut(&str)) {
    let state = LOGGER.state.lock();
    let bytes = &state.capture_buf[..state.capture_len];
    // Overflow may have cut the last character in half.
    let text = match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => core::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or(""),
    };

    for raw_line in text.split('\n') {
        let Some((line_target, line)) = raw_line.split_once('|') else {
            continue;
        };
        if line_target == target {
            f(line);
        }
    }
}
