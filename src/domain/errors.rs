//! Domain errors for the crunch simulation.

use thiserror::Error;

use super::models::issue::IssueId;

/// Errors raised by the simulation core.
///
/// Validation errors carry the argument position and the expected shape so a
/// caller can tell exactly which input was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// An argument was missing, malformed or out of range.
    #[error("{position} argument \"{argument}\" must be {expected} but got {actual}")]
    Validation {
        /// Which argument was rejected.
        position: ArgPosition,
        /// Name of the rejected argument.
        argument: &'static str,
        /// Shape the argument must have.
        expected: String,
        /// Debug rendering of the value that was passed.
        actual: String,
    },

    /// A push hit a full queue.
    #[error("Unable to add new issue since queue capacity of {capacity} is already reached")]
    Capacity {
        /// Capacity of the full queue.
        capacity: usize,
    },

    /// A pop named an issue the queue does not hold.
    #[error("Unable to pop issue since issue with id {id} does not exist")]
    NotFound {
        /// The missing id.
        id: IssueId,
    },

    /// A status outside the allowed set was requested.
    #[error("Status \"{requested}\" must be one of [{allowed}]")]
    State {
        /// The rejected status.
        requested: String,
        /// Comma-separated list of valid statuses.
        allowed: String,
    },
}

impl SimError {
    /// Build a validation error for a constructor or method argument.
    pub fn validation(
        position: ArgPosition,
        argument: &'static str,
        expected: impl Into<String>,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::Validation {
            position,
            argument,
            expected: expected.into(),
            actual: format!("{actual:?}"),
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Capacity { .. } => "capacity",
            Self::NotFound { .. } => "not_found",
            Self::State { .. } => "state",
        }
    }
}

/// Ordinal position of a rejected argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPosition {
    /// 1st
    First,
    /// 2nd
    Second,
    /// 3rd
    Third,
    /// 4th
    Fourth,
}

impl std::fmt::Display for ArgPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "1st"),
            Self::Second => write!(f, "2nd"),
            Self::Third => write!(f, "3rd"),
            Self::Fourth => write!(f, "4th"),
        }
    }
}

/// Result alias for the simulation core.
pub type SimResult<T> = Result<T, SimError>;
