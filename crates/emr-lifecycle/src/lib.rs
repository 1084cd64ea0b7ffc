//! emr-lifecycle
//!
//! Appointment and update-request lifecycle engine.
//!
//! Every entry point is a pure function of
//! `(snapshot, action, actor, payload, now) -> (new snapshot, intents)`:
//! - no IO, no wall clock (callers pass `now`), no shared mutable state;
//! - the input snapshot is never mutated, the caller persists the returned
//!   one under its own optimistic version check;
//! - side effects (notifications) come back as [`Intent`]s for the caller to
//!   dispatch after the snapshot commits.
//!
//! Safe to call from any number of request handlers concurrently.

mod appointment;
mod booking;
mod error;
mod profile;
mod sweep;
mod update_request;

pub use appointment::{apply_action, ActionPayload, AppointmentAction};
pub use booking::{book, submit_update_request, ticket_number, NewAppointment, NewUpdateRequest};
pub use error::LifecycleError;
pub use profile::{apply_field_changes, apply_request_changes, FieldChange};
pub use sweep::{sweep_due_reminders, sweep_expired};
pub use update_request::{decide, Decided, Decision, DecisionOutcome};

pub use emr_schemas::Intent;

/// Days an update request stays decidable after submission.
pub const DEFAULT_UPDATE_REQUEST_VALIDITY_DAYS: i64 = 7;

/// Reminders go out this many days before the visit.
pub const DEFAULT_REMINDER_LEAD_DAYS: i64 = 1;

/// A computed transition: the snapshot to persist plus the intents to
/// dispatch once it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<T> {
    pub snapshot: T,
    pub intents: Vec<Intent>,
}

impl<T> Transition<T> {
    pub fn new(snapshot: T, intents: Vec<Intent>) -> Self {
        Self { snapshot, intents }
    }
}
