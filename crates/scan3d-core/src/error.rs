//! Error types for scan3d Core
//!
//! Provides error handling for:
//! - Workspace allocation, finalization and teardown
//! - Pipeline stage failures (mapped 1:1 onto [`FailureKind`])
//! - Catalog registration
//! - Configuration loading

use crate::state::FailedAt;
use crate::types::{FailureKind, Stage};
use scan3d_kernel::SupervisorError;
use std::path::PathBuf;
use std::time::Duration;

/// Workspace manager errors
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Directory tree could not be created
    #[error("failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A prior run left files at the derived path
    #[error("workspace {path} already exists and is not empty")]
    Occupied { path: PathBuf },

    /// Operation requires an open workspace
    #[error("workspace {path} is not open")]
    NotOpen { path: PathBuf },

    /// Durable destination already taken
    #[error("artifact destination {path} already exists")]
    DestinationExists { path: PathBuf },

    /// Moving the artifact out of the workspace failed
    #[error("failed to move {from} to {to}: {source}")]
    Finalize {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recursive removal failed
    #[error("failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A pipeline run failure
///
/// Every variant carries enough to build a [`crate::PipelineOutcome::Failure`];
/// see [`PipelineError::kind`] and [`PipelineError::stage`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input rejected or workspace unavailable
    #[error("setup failed: {reason}")]
    Setup { reason: String },

    /// Tool exited non-zero (or succeeded without producing anything)
    #[error("{stage} tool failed (exit code {}): {stderr_tail}", display_code(.exit_code))]
    ExternalTool {
        stage: Stage,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// Tool could not be started
    #[error("{stage} tool `{program}` unavailable: {reason}")]
    ToolUnavailable {
        stage: Stage,
        program: String,
        reason: String,
    },

    /// Tool output failed a sanity check
    #[error("invalid {stage} output: {reason}")]
    InvalidOutput { stage: Stage, reason: String },

    /// Extraction produced fewer frames than reconstruction needs
    #[error("found {found} frames, at least {required} required")]
    InsufficientFrames { found: usize, required: usize },

    /// Tool exceeded its deadline and was terminated
    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    /// Artifact could not be moved, measured or registered
    #[error("{stage} failed: {reason}")]
    Finalization { stage: Stage, reason: String },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl PipelineError {
    /// Classification handed to callers
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Setup { .. } => FailureKind::SetupFailure,
            Self::ExternalTool { .. } => FailureKind::ExternalToolFailure,
            Self::ToolUnavailable { .. } => FailureKind::ToolUnavailable,
            Self::InvalidOutput { .. } => FailureKind::InvalidOutput,
            Self::InsufficientFrames { .. } => FailureKind::InsufficientFrames,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Finalization { .. } => FailureKind::FinalizationFailure,
        }
    }

    /// Stage the failure happened in
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Setup { .. } => Stage::Setup,
            Self::InsufficientFrames { .. } => Stage::FrameValidation,
            Self::ExternalTool { stage, .. }
            | Self::ToolUnavailable { stage, .. }
            | Self::InvalidOutput { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Finalization { stage, .. } => *stage,
        }
    }

    /// Terminal state of the run's state machine
    #[must_use]
    pub fn failed_at(&self) -> FailedAt {
        match self {
            Self::Setup { .. } => FailedAt::Setup,
            Self::InsufficientFrames { .. } => FailedAt::InsufficientFrames,
            Self::Timeout { .. } => FailedAt::Timeout,
            Self::InvalidOutput {
                stage: Stage::Reconstruction,
                ..
            } => FailedAt::Reconstruction,
            Self::InvalidOutput { .. } => FailedAt::InvalidArtifact,
            Self::Finalization {
                stage: Stage::Registration,
                ..
            } => FailedAt::Registration,
            Self::Finalization { .. } => FailedAt::Finalization,
            Self::ExternalTool { stage, .. } | Self::ToolUnavailable { stage, .. } => {
                if *stage == Stage::Extraction {
                    FailedAt::Extraction
                } else {
                    FailedAt::Reconstruction
                }
            }
        }
    }

    /// Whether re-issuing a fresh request could succeed
    ///
    /// The orchestrator never retries; this only informs caller policy.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalTool { .. } | Self::Timeout { .. } | Self::Finalization { .. }
        )
    }

    /// Classify a supervisor error for `stage`
    pub(crate) fn from_supervisor(stage: Stage, error: SupervisorError, diagnostic_chars: usize) -> Self {
        match error {
            SupervisorError::Spawn { program, source } => Self::ToolUnavailable {
                stage,
                program,
                reason: source.to_string(),
            },
            SupervisorError::TimedOut { program, after, output } => {
                if !output.is_empty() {
                    tracing::warn!(
                        "{} output before timeout:\n{}",
                        program,
                        output.to_string_lossy()
                    );
                }
                Self::Timeout { stage, after }
            }
            SupervisorError::Wait { source, .. } => Self::ExternalTool {
                stage,
                exit_code: None,
                stderr_tail: truncate_chars(&source.to_string(), diagnostic_chars),
            },
        }
    }
}

/// Characters left for the tool's stderr once the [`PipelineError::ExternalTool`]
/// message prefix is counted against `diagnostic_chars`
pub(crate) fn stderr_budget(
    stage: Stage,
    exit_code: Option<i32>,
    diagnostic_chars: usize,
) -> usize {
    let prefix = format!("{stage} tool failed (exit code {}): ", display_code(&exit_code));
    diagnostic_chars.saturating_sub(prefix.chars().count())
}

/// Cut `text` to at most `max` characters, marking the cut
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// Catalog registrar errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Registrar refused the entry
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// Entry not found
    #[error("catalog entry not found: {0}")]
    NotFound(String),

    /// Backing storage failed
    #[error("catalog storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Record could not be encoded
    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// Environment override had an unusable value
    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },

    /// Values are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
