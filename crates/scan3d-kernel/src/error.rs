//! Error types for supervised tool execution

use crate::tail::OutputTail;
use std::time::Duration;

/// Failure to run an external tool to completion.
///
/// A tool that runs and exits non-zero is *not* an error at this layer; that
/// is reported through [`crate::ToolExit`] and classified by the caller.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The executable could not be started (missing, not executable, ...)
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that was requested
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The deadline passed; the process has been killed and reaped
    #[error("`{program}` timed out after {after:?}")]
    TimedOut {
        /// Program that was running
        program: String,
        /// Deadline that was enforced
        after: Duration,
        /// Output captured before the kill
        output: OutputTail,
    },

    /// Waiting on the child failed
    #[error("failed waiting on `{program}`: {source}")]
    Wait {
        /// Program that was running
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Program name the error refers to
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Self::Spawn { program, .. }
            | Self::TimedOut { program, .. }
            | Self::Wait { program, .. } => program,
        }
    }

    /// Whether the failure was an enforced deadline
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Output captured before the failure, if any was collected
    #[must_use]
    pub fn output(&self) -> Option<&OutputTail> {
        match self {
            Self::TimedOut { output, .. } => Some(output),
            _ => None,
        }
    }
}
