//! Console channel.
//!
//! Two output streams share the device: `out` carries user-visible
//! console writes (`sys_cputs` and the monitor), `diag` carries kernel
//! log lines. Input is a small non-blocking queue.
//!
//! Both streams are captured in fixed ring buffers so tests can inject
//! keystrokes and assert on exactly what reached the screen.

use spin::Mutex;

const OUT_CAP: usize = 16 * 1024;
const DIAG_CAP: usize = 8 * 1024;
const IN_CAP: usize = 256;

struct Ring<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Ring<N> {
    const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    fn push(&mut self, bytes: &[u8]) {
        // Oldest output scrolls off the top once the buffer fills.
        for &b in bytes {
            if self.len == N {
                self.buf.copy_within(1.., 0);
                self.len -= 1;
            }
            self.buf[self.len] = b;
            self.len += 1;
        }
    }
}

static OUT: Mutex<Ring<OUT_CAP>> = Mutex::new(Ring::new());
static DIAG: Mutex<Ring<DIAG_CAP>> = Mutex::new(Ring::new());
static INPUT: Mutex<Ring<IN_CAP>> = Mutex::new(Ring::new());

/// Write user-visible bytes to the console.
pub fn write_bytes(bytes: &[u8]) {
    OUT.lock().push(bytes);
}

/// Write a kernel diagnostic line (the log sink).
pub fn diag_write(s: &str) {
    DIAG.lock().push(s.as_bytes());
}

/// Non-blocking read of one input byte. `None` when no input waits.
pub fn getc() -> Option<u8> {
    let mut q = INPUT.lock();
    if q.len == 0 {
        return None;
    }
    let b = q.buf[0];
    q.buf.copy_within(1.., 0);
    q.len -= 1;
    Some(b)
}

/// Queue bytes as pending console input.
pub fn push_input(bytes: &[u8]) {
    INPUT.lock().push(bytes);
}

/// Run `f` over everything written to the user console so far.
pub fn with_output<R>(f: impl FnOnce(&[u8]) -> R) -> R {
    let out = OUT.lock();
    f(&out.buf[..out.len])
}

/// Run `f` over the captured diagnostic stream.
pub fn with_diag<R>(f: impl FnOnce(&[u8]) -> R) -> R {
    let diag = DIAG.lock();
    f(&diag.buf[..diag.len])
}

/// Drop all captured output and pending input.
pub fn reset() {
    OUT.lock().len = 0;
    DIAG.lock().len = 0;
    INPUT.lock().len = 0;
}
