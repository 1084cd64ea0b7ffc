use std::fmt;

use uuid::Uuid;

/// Failures surfaced by an [`EntityStore`](crate::EntityStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound {
        kind: &'static str,
        id: Uuid,
    },
    /// The stored version moved since the caller read the entity. Re-fetch,
    /// recompute the transition, and save again.
    ConcurrentModification {
        kind: &'static str,
        id: Uuid,
        expected: i64,
        actual: i64,
    },
    Duplicate {
        kind: &'static str,
        id: Uuid,
    },
    /// Connection, query or decode failure in the backend.
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::Backend(_) => "STORE_BACKEND",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} {id} not found"),
            Self::ConcurrentModification {
                kind,
                id,
                expected,
                actual,
            } => write!(
                f,
                "concurrent modification of {kind} {id}: expected version {expected}, found {actual}"
            ),
            Self::Duplicate { kind, id } => write!(f, "{kind} {id} already exists"),
            Self::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
