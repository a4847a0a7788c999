use std::fmt;

use thiserror::Error;

/// Termination signals that trigger a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, usually Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl Signal {
    /// POSIX signal number.
    pub fn number(&self) -> i32 {
        match self {
            Signal::Interrupt => 2,
            Signal::Terminate => 15,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "interrupt"),
            Signal::Terminate => write!(f, "terminated"),
        }
    }
}

/// Records which signal cancelled a `ShutdownContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("received signal: {signal}")]
pub struct SignalError {
    pub signal: Signal,
}

impl SignalError {
    pub fn sig_num(&self) -> i32 {
        self.signal.number()
    }

    /// Conventional shell exit status for a process ended by this signal.
    pub fn exit_code(&self) -> i32 {
        128 + self.sig_num()
    }
}

/// Why a `ShutdownContext` was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShutdownError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// Cancelled explicitly or by the parent token, not by a signal.
    #[error("shutdown cancelled")]
    Cancelled,
}
