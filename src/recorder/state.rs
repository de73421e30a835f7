//! Session lifecycle state machine.
//!
//! "Idle" is the absence of a session; every live session carries one of the
//! statuses below. The transition function is total over (status, action):
//! an undefined pair is a no-op that reports failure to the caller, never a
//! panic.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Capturing,
    Paused,
    Editing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Pause,
    Resume,
    Stop,
    Cancel,
    Finish,
}

/// What a legal transition does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    To(SessionStatus),
    /// Session and all of its buffers are thrown away; no record remains.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    Invalid {
        from: SessionStatus,
        action: SessionAction,
    },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Invalid { from, action } => {
                write!(formatter, "cannot {action:?} while {from:?}")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

pub fn transition(
    from: SessionStatus,
    action: SessionAction,
) -> Result<TransitionOutcome, TransitionError> {
    use SessionAction::*;
    use SessionStatus::*;

    match (from, action) {
        (Capturing, Pause) => Ok(TransitionOutcome::To(Paused)),
        (Paused, Resume) => Ok(TransitionOutcome::To(Capturing)),
        (Capturing, Stop) | (Paused, Stop) => Ok(TransitionOutcome::To(Editing)),
        (Capturing, Cancel) | (Paused, Cancel) => Ok(TransitionOutcome::Discard),
        (Editing, Finish) => Ok(TransitionOutcome::To(Done)),
        _ => Err(TransitionError::Invalid { from, action }),
    }
}
