//! emr-service
//!
//! Caller-facing lifecycle API. Wires the pure engine (`emr-lifecycle`) to an
//! [`EntityStore`], a [`Notifier`] and a [`Clock`]:
//!
//! 1. read the snapshot;
//! 2. decide with `clock.now()`;
//! 3. save under the version that was read, re-reading and re-deciding on
//!    `ConcurrentModification` up to `max_save_retries` times;
//! 4. dispatch intents only after the save commits. Delivery failures are
//!    logged and counted, never returned.

mod clock;
mod service;

use std::fmt;

use serde::Serialize;

use emr_lifecycle::LifecycleError;
use emr_store::StoreError;

pub use clock::{Clock, FixedClock, SystemClock};
pub use service::{Committed, DecisionCommitted, LifecycleService, ServicePolicy, SweepReport};

pub use emr_notify::Notifier;
pub use emr_store::EntityStore;

/// Everything a service call can fail with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    Lifecycle(LifecycleError),
    Store(StoreError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Lifecycle(e) => e.code(),
            ServiceError::Store(e) => e.code(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Lifecycle(e) => write!(f, "{e}"),
            ServiceError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Lifecycle(e) => Some(e),
            ServiceError::Store(e) => Some(e),
        }
    }
}

impl From<LifecycleError> for ServiceError {
    fn from(e: LifecycleError) -> Self {
        ServiceError::Lifecycle(e)
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::Store(e)
    }
}

/// Wire shape of a [`ServiceError`] for outer layers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl From<&ServiceError> for ErrorBody {
    fn from(e: &ServiceError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}
