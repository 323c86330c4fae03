//! Errors

use std::io;
use thiserror::Error;

/// Result type used throughout the service.
pub type Result<T> = std::result::Result<T, RtError>;

/// Fatal error kinds. Warnings are not errors; they are logged and execution
/// continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RtError {
    /// Bad command line arguments or option combinations.
    #[error("{0}")]
    Usage(String),

    /// Malformed ray query encoding on the input stream.
    #[error("format - {0}")]
    Format(String),

    /// I/O failure on input, output, lock or cache files.
    #[error("system - {0}")]
    System(String),

    /// Internal invariant violated.
    #[error("consistency - {0}")]
    Consistency(String),

    /// A fatal signal interrupted the run.
    #[error("signal - {name}")]
    Interrupted {
        /// Signal number.
        signo: i32,
        /// Signal description.
        name: String,
    },
}

impl RtError {
    /// Returns the process exit code that reflects the error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Format(_) => 1,
            Self::System(_) => 2,
            Self::Consistency(_) => 4,
            Self::Interrupted { signo, .. } => 128 + signo,
        }
    }

    /// Returns a `System` error prefixed with some context.
    ///
    /// * `context` - What was being attempted.
    /// * `err`     - The underlying I/O error.
    pub fn system(context: &str, err: io::Error) -> Self {
        Self::System(format!("{context}: {err}"))
    }

    /// Returns an `Interrupted` error for a signal number.
    ///
    /// * `signo` - Signal number.
    pub fn interrupted(signo: i32) -> Self {
        Self::Interrupted {
            signo,
            name: signal_name(signo).to_string(),
        }
    }
}

/// Returns the description of a fatal signal.
///
/// * `signo` - Signal number.
pub fn signal_name(signo: i32) -> &'static str {
    match signo {
        1 => "Hangup",
        2 => "Interrupt",
        13 => "Broken pipe",
        14 => "Alarm clock",
        15 => "Terminate",
        24 => "CPU limit exceeded",
        25 => "File size exceeded",
        _ => "Unknown signal",
    }
}

impl From<io::Error> for RtError {
    fn from(err: io::Error) -> Self {
        Self::System(err.to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
