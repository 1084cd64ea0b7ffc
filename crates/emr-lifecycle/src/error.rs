use std::fmt;

use emr_schemas::Role;

/// Why the engine refused a requested transition.
///
/// Checks run in a fixed order: the (state, action) pair must exist in the
/// transition table, then the actor must be allowed to perform it, then the
/// payload must be complete. The first failing check decides the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The action is not legal from the current state (includes every action
    /// on a terminal state).
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    /// The actor's role, or their relation to the record, does not permit
    /// the action.
    Forbidden { role: Role, action: &'static str },
    /// Required payload is missing or malformed.
    Validation(String),
}

impl LifecycleError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code for outer layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, action } => {
                write!(f, "invalid transition: cannot {action} from {from}")
            }
            Self::Forbidden { role, action } => {
                write!(f, "forbidden: role {role} may not {action}")
            }
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for LifecycleError {}
