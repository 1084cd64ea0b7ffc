//! Appointment state machine.
//!
//! # State diagram
//!
//! ```text
//!   book()
//!   ──────►  Pending ──── decline ────► Declined (term.)
//!               │  │
//!               │  └───── cancel ─────► Cancelled (term.)
//!            approve                        ▲
//!               ▼                           │
//!            Approved ──── cancel ──────────┘
//!             │  ▲ │
//!  reschedule └──┘ ├──── complete(note) ──► Completed (term.)
//!                  └──── mark_no_show ────► NoShow (term.)
//! ```
//!
//! Transition table (who may do what):
//!
//! | From     | Action        | Roles                 | To        |
//! |----------|---------------|-----------------------|-----------|
//! | Pending  | approve       | doctor, admin         | Approved  |
//! | Pending  | decline       | doctor, admin         | Declined  |
//! | Pending  | cancel        | student, doctor, admin| Cancelled |
//! | Approved | reschedule    | student, doctor, admin| Approved  |
//! | Approved | complete      | doctor                | Completed |
//! | Approved | cancel        | student, doctor, admin| Cancelled |
//! | Approved | mark_no_show  | doctor, admin         | NoShow    |
//!
//! Anything else is `InvalidTransition`. On top of the role column, a student
//! may only touch their own appointment and a doctor may only complete an
//! appointment that is unassigned or assigned to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use emr_schemas::{
    Actor, Appointment, AppointmentStatus, Intent, NotificationEvent, Recipient, Role, Subject,
    UserId,
};

use crate::{LifecycleError, Transition};

// ---------------------------------------------------------------------------
// Actions and payload
// ---------------------------------------------------------------------------

/// Actions that can be requested on an existing appointment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentAction {
    Approve,
    Decline,
    Cancel,
    Reschedule,
    Complete,
    MarkNoShow,
}

impl AppointmentAction {
    pub const ALL: [AppointmentAction; 6] = [
        AppointmentAction::Approve,
        AppointmentAction::Decline,
        AppointmentAction::Cancel,
        AppointmentAction::Reschedule,
        AppointmentAction::Complete,
        AppointmentAction::MarkNoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
            Self::Reschedule => "reschedule",
            Self::Complete => "complete",
            Self::MarkNoShow => "mark_no_show",
        }
    }
}

/// Optional data accompanying an action. Which fields are required depends on
/// the action; missing required fields fail with `Validation`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPayload {
    /// `complete`: clinical note (required).
    pub note: Option<String>,
    /// `reschedule`: new date/time (required, must be in the future).
    pub new_time: Option<DateTime<Utc>>,
    /// `approve`: concrete slot fixed by the clinic (optional, future).
    pub scheduled_at: Option<DateTime<Utc>>,
    /// `approve`: doctor to assign (optional).
    pub doctor_id: Option<UserId>,
    /// `decline` / `cancel`: free-text reason (optional).
    pub reason: Option<String>,
}

impl ActionPayload {
    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }

    pub fn with_new_time(new_time: DateTime<Utc>) -> Self {
        Self {
            new_time: Some(new_time),
            ..Self::default()
        }
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

const ANYONE: &[Role] = &[Role::Student, Role::Doctor, Role::Admin];
const STAFF: &[Role] = &[Role::Doctor, Role::Admin];
const DOCTOR_ONLY: &[Role] = &[Role::Doctor];

/// Look up the (target state, permitted roles) for a (state, action) pair.
fn table(
    from: AppointmentStatus,
    action: AppointmentAction,
) -> Option<(AppointmentStatus, &'static [Role])> {
    use AppointmentAction as A;
    use AppointmentStatus as S;

    match (from, action) {
        (S::Pending, A::Approve) => Some((S::Approved, STAFF)),
        (S::Pending, A::Decline) => Some((S::Declined, STAFF)),
        (S::Pending | S::Approved, A::Cancel) => Some((S::Cancelled, ANYONE)),
        (S::Approved, A::Reschedule) => Some((S::Approved, ANYONE)),
        (S::Approved, A::Complete) => Some((S::Completed, DOCTOR_ONLY)),
        (S::Approved, A::MarkNoShow) => Some((S::NoShow, STAFF)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// apply_action
// ---------------------------------------------------------------------------

/// Decide an action on an appointment.
///
/// Returns the new snapshot (same `version` as the input; the store bumps it
/// on save) and the notification intents for the caller.
///
/// # Errors
/// - [`LifecycleError::InvalidTransition`] when `(appt.status, action)` is not
///   in the table, including every action on a terminal appointment.
/// - [`LifecycleError::Forbidden`] when the actor's role is not permitted, a
///   student acts on someone else's appointment, or a doctor completes an
///   appointment assigned to another doctor.
/// - [`LifecycleError::Validation`] when the payload is missing a required
///   field or carries a date that is not in the future.
pub fn apply_action(
    appt: &Appointment,
    action: AppointmentAction,
    actor: &Actor,
    payload: &ActionPayload,
    now: DateTime<Utc>,
) -> Result<Transition<Appointment>, LifecycleError> {
    let Some((target, roles)) = table(appt.status, action) else {
        return Err(LifecycleError::InvalidTransition {
            from: appt.status.as_str(),
            action: action.as_str(),
        });
    };

    authorize(appt, action, actor, roles)?;

    let mut next = appt.clone();
    next.status = target;
    next.updated_at = now;

    let subject = Subject::Appointment {
        id: appt.id,
        ticket_number: appt.ticket_number.clone(),
    };
    let student = Recipient::Student(appt.student_id);
    let mut intents = Vec::new();

    match action {
        AppointmentAction::Approve => {
            if let Some(at) = payload.scheduled_at {
                require_future(at, now, "scheduled_at")?;
                next.scheduled_at = Some(at);
            }
            next.doctor_id = match (payload.doctor_id, actor.role) {
                (Some(doc), _) => Some(doc),
                (None, Role::Doctor) => next.doctor_id.or(Some(actor.id)),
                (None, _) => next.doctor_id,
            };
            next.decided_by = Some(actor.id);
            next.approved_at = Some(now);
            intents.push(Intent::notify(
                student,
                NotificationEvent::AppointmentApproved,
                subject,
            ));
        }

        AppointmentAction::Decline => {
            next.status_reason = non_blank(payload.reason.as_deref());
            next.decided_by = Some(actor.id);
            intents.push(Intent::notify(
                student,
                NotificationEvent::AppointmentDeclined,
                subject,
            ));
        }

        AppointmentAction::Cancel => {
            next.status_reason = non_blank(payload.reason.as_deref());
            next.cancelled_at = Some(now);
            next.cancelled_by = Some(actor.id);
            if let Some(to) = counterpart(appt, actor) {
                intents.push(Intent::notify(
                    to,
                    NotificationEvent::AppointmentCancelled,
                    subject,
                ));
            }
        }

        AppointmentAction::Reschedule => {
            let new_time = payload
                .new_time
                .ok_or_else(|| LifecycleError::validation("reschedule requires new_time"))?;
            require_future(new_time, now, "new_time")?;
            next.scheduled_at = Some(new_time);
            // A moved visit needs a fresh reminder.
            next.reminder_sent = false;
            if let Some(to) = counterpart(appt, actor) {
                intents.push(Intent::notify(
                    to,
                    NotificationEvent::AppointmentRescheduled,
                    subject,
                ));
            }
        }

        AppointmentAction::Complete => {
            let note = non_blank(payload.note.as_deref())
                .ok_or_else(|| LifecycleError::validation("complete requires a clinical note"))?;
            next.clinical_note = Some(note);
            next.completed_at = Some(now);
            next.doctor_id = next.doctor_id.or(Some(actor.id));
            intents.push(Intent::notify(
                student,
                NotificationEvent::AppointmentCompleted,
                subject,
            ));
        }

        AppointmentAction::MarkNoShow => {
            intents.push(Intent::notify(
                student,
                NotificationEvent::AppointmentNoShow,
                subject,
            ));
        }
    }

    Ok(Transition::new(next, intents))
}

fn authorize(
    appt: &Appointment,
    action: AppointmentAction,
    actor: &Actor,
    roles: &[Role],
) -> Result<(), LifecycleError> {
    let forbidden = LifecycleError::Forbidden {
        role: actor.role,
        action: action.as_str(),
    };

    if !roles.contains(&actor.role) {
        return Err(forbidden);
    }
    if actor.role == Role::Student && appt.student_id != actor.id {
        return Err(forbidden);
    }
    if action == AppointmentAction::Complete
        && appt.doctor_id.is_some_and(|doc| doc != actor.id)
    {
        return Err(forbidden);
    }
    Ok(())
}

/// The other party of the appointment: the assigned doctor when the student
/// acts, the student when the clinic acts.
fn counterpart(appt: &Appointment, actor: &Actor) -> Option<Recipient> {
    match actor.role {
        Role::Student => appt.doctor_id.map(Recipient::Doctor),
        Role::Doctor | Role::Admin => Some(Recipient::Student(appt.student_id)),
    }
}

fn require_future(at: DateTime<Utc>, now: DateTime<Utc>, field: &str) -> Result<(), LifecycleError> {
    if at <= now {
        return Err(LifecycleError::validation(format!(
            "{field} must be in the future"
        )));
    }
    Ok(())
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
