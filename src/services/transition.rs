use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AttendanceStatus, EnrollmentStatus};

/// Reason a transition request was refused. Serialized as the bare variant
/// name, which is also the `code` field of HTTP error bodies.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionError {
    #[error("Child not found")]
    NotFound,

    #[error("Child is not enrolled")]
    NotEligible,

    #[error("Transition not allowed from the current status")]
    InvalidTransition,
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::NotFound => "NotFound",
            TransitionError::NotEligible => "NotEligible",
            TransitionError::InvalidTransition => "InvalidTransition",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NotFound" => Some(TransitionError::NotFound),
            "NotEligible" => Some(TransitionError::NotEligible),
            "InvalidTransition" => Some(TransitionError::InvalidTransition),
            _ => None,
        }
    }
}

/// User-facing attendance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CheckIn,
    CheckOut,
}

impl Action {
    pub fn target(&self) -> AttendanceStatus {
        match self {
            Action::CheckIn => AttendanceStatus::Present,
            Action::CheckOut => AttendanceStatus::CheckedOut,
        }
    }

    /// Path segment under `/api/attendance/`
    pub fn path(&self) -> &'static str {
        match self {
            Action::CheckIn => "check-in",
            Action::CheckOut => "check-out",
        }
    }
}

/// The attendance state machine.
///
/// Shared by the server-side engine and the client-side demo roster so both
/// apply identical rules; callers differ only in where they persist the result.
///
/// | From    | To          | Precondition |
/// |---------|-------------|--------------|
/// | ABSENT  | PRESENT     | enrolled     |
/// | PRESENT | CHECKED_OUT |              |
///
/// Everything else is `InvalidTransition`. Enrollment is checked first, so a
/// child that is not enrolled always gets `NotEligible`.
pub fn validate(
    current: AttendanceStatus,
    enrollment: EnrollmentStatus,
    target: AttendanceStatus,
) -> Result<(), TransitionError> {
    if enrollment != EnrollmentStatus::Enrolled {
        return Err(TransitionError::NotEligible);
    }

    match (current, target) {
        (AttendanceStatus::Absent, AttendanceStatus::Present) => Ok(()),
        (AttendanceStatus::Present, AttendanceStatus::CheckedOut) => Ok(()),
        _ => Err(TransitionError::InvalidTransition),
    }
}
