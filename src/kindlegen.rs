//! Classification of the compiler's exit status.
//!
//! The compiler itself runs outside this crate; callers hand its exit code
//! here to decide whether the produced container is worth splitting.

use std::fmt;
use std::process::ExitStatus;

use log::warn;

/// Outcome of a compiler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerStatus {
    Success,
    /// The container was produced, but the compiler logged warnings.
    Warnings,
    /// No usable container; carries the exit code, if the process had one.
    Failed(Option<i32>),
}

impl CompilerStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => CompilerStatus::Success,
            1 => CompilerStatus::Warnings,
            other => CompilerStatus::Failed(Some(other)),
        }
    }

    /// A process killed by a signal has no code and counts as failed.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::from_code(code),
            None => CompilerStatus::Failed(None),
        }
    }

    /// Whether the output container can be handed to the splitter.
    pub fn can_proceed(self) -> bool {
        if self == CompilerStatus::Warnings {
            warn!("kindlegen has some warnings, see its log for details");
        }
        !matches!(self, CompilerStatus::Failed(_))
    }
}

impl fmt::Display for CompilerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerStatus::Success => f.write_str("success"),
            CompilerStatus::Warnings => f.write_str("success with warnings"),
            CompilerStatus::Failed(Some(code)) => write!(f, "failed with exit code {code}"),
            CompilerStatus::Failed(None) => f.write_str("terminated by signal"),
        }
    }
}
