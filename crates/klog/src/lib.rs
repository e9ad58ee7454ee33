//! Kernel logging subsystem.
//!
//! A `log`-facade backend for freestanding kernels: each record is
//! rendered into a fixed stack buffer (records never allocate) with a
//! colored level prefix, then handed to the sink registered at init.
#![no_std]

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

/// Output sink: receives one fully rendered line per record.
pub type Sink = fn(&str);

/// Longest rendered line; anything longer is truncated.
const LINE_CAP: usize = 256;

static SINK: Once<Sink> = Once::new();
static LOGGER: KernelLogger = KernelLogger;

struct KernelLogger;

fn color(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "\x1b[90m", // Gray
        log::Level::Debug => "\x1b[36m", // Cyan
        log::Level::Info => "\x1b[32m",  // Green
        log::Level::Warn => "\x1b[33m",  // Yellow
        log::Level::Error => "\x1b[31m", // Red
    }
}

fn tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRACE",
        log::Level::Debug => "DEBUG",
        log::Level::Info => " INFO",
        log::Level::Warn => " WARN",
        log::Level::Error => "ERROR",
    }
}

/// Fixed-capacity line buffer that silently truncates.
struct Line {
    buf: [u8; LINE_CAP],
    len: usize,
}

impl Line {
    const fn new() -> Self {
        Self { buf: [0; LINE_CAP], len: 0 }
    }

    fn as_str(&self) -> &str {
        // Only ever filled through `write_str` with valid UTF-8, cut at
        // a boundary checked in `write_str`.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_CAP - self.len;
        let mut take = s.len().min(room);
        // Back off to a char boundary when truncating mid-string.
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        SINK.get().is_some()
    }

    fn log(&self, record: &Record) {
        let Some(sink) = SINK.get() else { return };
        let mut line = Line::new();
        let _ = write!(
            line,
            "{}[{}]\x1b[0m {}\n",
            color(record.level()),
            tag(record.level()),
            record.args()
        );
        sink(line.as_str());
    }

    fn flush(&self) {}
}

/// Install the kernel logger behind the `log` facade.
///
/// Safe to call more than once; the first sink wins and later calls are
/// no-ops, so re-entrant init paths (and test harnesses) need no guard.
pub fn init(sink: Sink) {
    SINK.call_once(|| sink);
    // Errors only when a logger is already set, which is exactly the
    // repeated-init case we tolerate.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Debug);
}
