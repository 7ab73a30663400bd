//! ringecho error types.

use std::fmt;

/// Fatal substrate failures.
///
/// Per-connection I/O outcomes (EOF, reset, timeout cancellation) travel
/// in completion results and never surface here; anything that does reach
/// this type is unrecoverable and terminates the server loop.
#[derive(Debug)]
pub enum RingError {
    /// Ring setup failed.
    Setup(i32),
    /// Submitting queued entries failed.
    Submit(i32),
    /// Waiting for a completion failed.
    Wait(i32),
    /// OS error with errno (socket setup and other startup paths).
    Os(i32),
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "ring setup: errno {}", e),
            Self::Submit(e) => write!(f, "ring submit: errno {}", e),
            Self::Wait(e) => write!(f, "ring wait: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for RingError {}

pub type Result<T> = std::result::Result<T, RingError>;
