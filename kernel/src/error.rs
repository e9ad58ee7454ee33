//! Kernel error taxonomy.
//!
//! System calls report errors as negative 32-bit values with stable
//! codes; internal routines carry the same codes upward as `KernError`.

use core::fmt;

/// Result type used throughout the kernel core.
pub type KernResult<T> = Result<T, KernError>;

/// The error kinds visible at the system-call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KernError {
    /// Environment id invalid, dead, or permission denied.
    BadEnv = 2,
    /// Argument failed validation (alignment, range, permission mask,
    /// inadmissible status).
    Inval = 3,
    /// Physical page or page-table allocation failed.
    NoMem = 4,
    /// Environment table full.
    NoFreeEnv = 5,
    /// IPC target is not in receive state.
    IpcNotRecv = 7,
}

impl KernError {
    /// The negative value returned through the system-call register.
    #[inline]
    pub const fn code(self) -> i32 {
        -(self as i32)
    }

    /// Decode a negative system-call return value.
    pub const fn from_code(code: i32) -> Option<Self> {
        match -code {
            2 => Some(Self::BadEnv),
            3 => Some(Self::Inval),
            4 => Some(Self::NoMem),
            5 => Some(Self::NoFreeEnv),
            7 => Some(Self::IpcNotRecv),
            _ => None,
        }
    }
}

impl fmt::Display for KernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::BadEnv => "bad environment",
            Self::Inval => "invalid parameter",
            Self::NoMem => "out of memory",
            Self::NoFreeEnv => "out of environments",
            Self::IpcNotRecv => "env is not recving",
        };
        f.write_str(msg)
    }
}
