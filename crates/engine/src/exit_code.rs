//! Process exit codes surfaced to the CLI.

use std::fmt;

/// Exit codes of a cowsync run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// Every plan succeeded.
    Ok = 0,
    /// One or more plans failed; the rest were still attempted.
    Partial = 1,
    /// Configuration or input error; no transfer was started or the run
    /// aborted on a fatal error.
    Usage = 2,
    /// The run was interrupted.
    Interrupted = 130,
}

impl ExitCode {
    /// The numeric exit code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// A short description of the outcome.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "success",
            Self::Partial => "one or more transfers failed",
            Self::Usage => "configuration or input error",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether this is the success code.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.as_i32().clamp(0, 255) as u8)
    }
}
