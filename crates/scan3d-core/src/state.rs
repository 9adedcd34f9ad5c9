//! Pipeline run state machine
//!
//! The machine runs forward only. `Succeeded` and `Failed(_)` are terminal and
//! every non-terminal state can fail. [`allowed_transitions`] is the single
//! source of truth for what a run may do next.

use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a run ended up failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedAt {
    Setup,
    Extraction,
    InsufficientFrames,
    Reconstruction,
    InvalidArtifact,
    Timeout,
    Finalization,
    Registration,
}

/// State of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    ExtractingFrames,
    ValidatingFrames,
    Reconstructing,
    ValidatingArtifact,
    Finalizing,
    Registering,
    Succeeded,
    Failed(FailedAt),
}

impl PipelineState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(at) => write!(f, "Failed({at:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Illegal state machine use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: PipelineState) -> Vec<PipelineState> {
    use PipelineState::*;
    match from {
        Created => vec![ExtractingFrames, Failed(FailedAt::Setup)],
        ExtractingFrames => vec![
            ValidatingFrames,
            Failed(FailedAt::Extraction),
            Failed(FailedAt::Timeout),
        ],
        ValidatingFrames => vec![Reconstructing, Failed(FailedAt::InsufficientFrames)],
        Reconstructing => vec![
            ValidatingArtifact,
            Failed(FailedAt::Reconstruction),
            Failed(FailedAt::Timeout),
        ],
        ValidatingArtifact => vec![Finalizing, Failed(FailedAt::InvalidArtifact)],
        Finalizing => vec![Registering, Succeeded, Failed(FailedAt::Finalization)],
        Registering => vec![Succeeded, Failed(FailedAt::Registration)],
        Succeeded | Failed(_) => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// Returns [`StateMachineError::IllegalTransition`] if `to` is not reachable
/// from `from`.
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// Tracks the states one run has visited
#[derive(Debug, Clone)]
pub struct RunTracker {
    request_id: RequestId,
    history: Vec<PipelineState>,
}

impl RunTracker {
    /// Tracker in `Created`
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            history: vec![PipelineState::Created],
        }
    }

    /// Current state
    #[must_use]
    pub fn current(&self) -> PipelineState {
        // history is never empty
        self.history
            .last()
            .copied()
            .unwrap_or(PipelineState::Created)
    }

    /// Every state visited, in order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `to`
    ///
    /// # Errors
    /// Returns [`StateMachineError::IllegalTransition`] and leaves the tracker
    /// unchanged if the transition is not allowed.
    pub fn advance(&mut self, to: PipelineState) -> Result<(), StateMachineError> {
        let from = self.current();
        validate_transition(from, to)?;
        tracing::debug!(request_id = %self.request_id, "{} -> {}", from, to);
        self.history.push(to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = PipelineState> {
        let failed = prop_oneof![
            Just(FailedAt::Setup),
            Just(FailedAt::Extraction),
            Just(FailedAt::InsufficientFrames),
            Just(FailedAt::Reconstruction),
            Just(FailedAt::InvalidArtifact),
            Just(FailedAt::Timeout),
            Just(FailedAt::Finalization),
            Just(FailedAt::Registration),
        ]
        .prop_map(PipelineState::Failed);
        prop_oneof![
            Just(PipelineState::Created),
            Just(PipelineState::ExtractingFrames),
            Just(PipelineState::ValidatingFrames),
            Just(PipelineState::Reconstructing),
            Just(PipelineState::ValidatingArtifact),
            Just(PipelineState::Finalizing),
            Just(PipelineState::Registering),
            Just(PipelineState::Succeeded),
            failed,
        ]
    }

    #[test]
    fn happy_path_is_allowed() {
        let mut tracker = RunTracker::new(RequestId::new());
        for state in [
            PipelineState::ExtractingFrames,
            PipelineState::ValidatingFrames,
            PipelineState::Reconstructing,
            PipelineState::ValidatingArtifact,
            PipelineState::Finalizing,
            PipelineState::Succeeded,
        ] {
            tracker.advance(state).unwrap();
        }
        assert!(tracker.current().is_terminal());
        assert_eq!(tracker.history().len(), 7);
    }

    #[test]
    fn cannot_skip_frame_validation() {
        assert!(validate_transition(PipelineState::ExtractingFrames, PipelineState::Reconstructing).is_err());
        assert!(validate_transition(PipelineState::Created, PipelineState::Reconstructing).is_err());
    }

    #[test]
    fn insufficient_frames_only_from_validation() {
        let failed = PipelineState::Failed(FailedAt::InsufficientFrames);
        assert!(validate_transition(PipelineState::ValidatingFrames, failed).is_ok());
        assert!(validate_transition(PipelineState::Reconstructing, failed).is_err());
    }

    #[test]
    fn invalid_artifact_only_from_artifact_gate() {
        let failed = PipelineState::Failed(FailedAt::InvalidArtifact);
        assert!(validate_transition(PipelineState::ValidatingArtifact, failed).is_ok());
        assert!(validate_transition(PipelineState::Reconstructing, failed).is_err());
        assert!(validate_transition(
            PipelineState::Reconstructing,
            PipelineState::Failed(FailedAt::Reconstruction)
        )
        .is_ok());
    }

    #[test]
    fn illegal_advance_leaves_tracker_unchanged() {
        let mut tracker = RunTracker::new(RequestId::new());
        let err = tracker.advance(PipelineState::Succeeded).unwrap_err();
        assert_eq!(
            err,
            StateMachineError::IllegalTransition {
                from: PipelineState::Created,
                to: PipelineState::Succeeded
            }
        );
        assert_eq!(tracker.current(), PipelineState::Created);
    }

    proptest! {
        #[test]
        fn prop_terminal_states_have_no_exits(from in any_state(), to in any_state()) {
            if from.is_terminal() {
                prop_assert!(validate_transition(from, to).is_err());
            }
        }

        #[test]
        fn prop_non_terminal_states_can_fail(from in any_state()) {
            if !from.is_terminal() {
                prop_assert!(allowed_transitions(from)
                    .iter()
                    .any(|s| matches!(s, PipelineState::Failed(_))));
            }
        }

        #[test]
        fn prop_no_state_is_reentrant(from in any_state()) {
            prop_assert!(validate_transition(from, from).is_err());
            prop_assert!(validate_transition(from, PipelineState::Created).is_err());
        }
    }
}
