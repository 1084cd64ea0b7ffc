//! emr-schemas
//!
//! Shared record types for the clinic lifecycle workspace. Every crate that
//! reads or writes appointments, update requests, student profiles or
//! notification intents speaks these types.
//!
//! No business logic lives here beyond small read-only queries on the records
//! themselves; transitions belong to `emr-lifecycle`.

mod actor;
mod appointment;
mod notification;
mod profile;
mod update_request;

pub use actor::{Actor, Role, UserId};
pub use appointment::{Appointment, AppointmentStatus, ServiceType, TimeSlot};
pub use notification::{Intent, NotificationEvent, Recipient, Subject};
pub use profile::{StudentProfile, UPDATABLE_PROFILE_FIELDS};
pub use update_request::{UpdateRequest, UpdateRequestStatus};

use std::fmt;

/// Returned by the `FromStr` impls when a stored string names no known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}
