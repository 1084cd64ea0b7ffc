//! Creation of new lifecycle records: appointment booking and update-request
//! submission. Both are student-initiated and start in `Pending`.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use emr_schemas::{
    Actor, Appointment, AppointmentStatus, Intent, NotificationEvent, Recipient, Role,
    ServiceType, Subject, TimeSlot, UpdateRequest, UpdateRequestStatus, UserId,
    UPDATABLE_PROFILE_FIELDS,
};

use crate::appointment::non_blank;
use crate::{LifecycleError, Transition};

/// Booking form submitted by a student.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub student_id: UserId,
    #[serde(default)]
    pub doctor_id: Option<UserId>,
    pub service_type: ServiceType,
    #[serde(default)]
    pub time_slot: TimeSlot,
    pub requested_at: DateTime<Utc>,
    pub reason: String,
}

/// Profile change request submitted by a student.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUpdateRequest {
    pub student_id: UserId,
    pub changes: BTreeMap<String, String>,
    pub reason: String,
}

/// Human-facing ticket, `APT-<year>-<6 chars>`, derived from the appointment
/// id so it is stable for a given record.
pub fn ticket_number(id: Uuid, now: DateTime<Utc>) -> String {
    let simple = id.simple().to_string().to_ascii_uppercase();
    format!("APT-{}-{}", now.year(), &simple[..6])
}

fn require_own_student(
    actor: &Actor,
    student_id: UserId,
    action: &'static str,
) -> Result<(), LifecycleError> {
    if actor.role != Role::Student || actor.id != student_id {
        return Err(LifecycleError::Forbidden {
            role: actor.role,
            action,
        });
    }
    Ok(())
}

/// Book a new appointment in `Pending`.
///
/// The caller supplies the record id. A requested doctor is notified of the
/// new booking.
pub fn book(
    actor: &Actor,
    new: &NewAppointment,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Transition<Appointment>, LifecycleError> {
    require_own_student(actor, new.student_id, "book")?;

    let reason = non_blank(Some(new.reason.as_str()))
        .ok_or_else(|| LifecycleError::validation("reason must not be blank"))?;
    if new.requested_at <= now {
        return Err(LifecycleError::validation("requested_at must be in the future"));
    }

    let appt = Appointment {
        id,
        ticket_number: ticket_number(id, now),
        student_id: new.student_id,
        doctor_id: new.doctor_id,
        service_type: new.service_type,
        time_slot: new.time_slot,
        requested_at: new.requested_at,
        scheduled_at: None,
        status: AppointmentStatus::Pending,
        reason,
        clinical_note: None,
        status_reason: None,
        decided_by: None,
        approved_at: None,
        completed_at: None,
        cancelled_at: None,
        cancelled_by: None,
        reminder_sent: false,
        created_at: now,
        updated_at: now,
        version: 0,
    };

    let intents = appt
        .doctor_id
        .map(|doc| {
            Intent::notify(
                Recipient::Doctor(doc),
                NotificationEvent::AppointmentRequested,
                Subject::Appointment {
                    id,
                    ticket_number: appt.ticket_number.clone(),
                },
            )
        })
        .into_iter()
        .collect();

    Ok(Transition::new(appt, intents))
}

/// Submit a profile update request in `Pending`, decidable until
/// `now + validity`.
pub fn submit_update_request(
    actor: &Actor,
    new: &NewUpdateRequest,
    id: Uuid,
    now: DateTime<Utc>,
    validity: Duration,
) -> Result<UpdateRequest, LifecycleError> {
    require_own_student(actor, new.student_id, "submit")?;

    if validity <= Duration::zero() {
        return Err(LifecycleError::validation("validity window must be positive"));
    }
    if new.changes.is_empty() {
        return Err(LifecycleError::validation("at least one field change is required"));
    }
    for (field, value) in &new.changes {
        if !UPDATABLE_PROFILE_FIELDS.contains(&field.as_str()) {
            return Err(LifecycleError::validation(format!(
                "field '{field}' cannot be updated by request"
            )));
        }
        if value.trim().is_empty() {
            return Err(LifecycleError::validation(format!(
                "new value for '{field}' must not be blank"
            )));
        }
    }
    let reason = non_blank(Some(new.reason.as_str()))
        .ok_or_else(|| LifecycleError::validation("reason must not be blank"))?;

    Ok(UpdateRequest {
        id,
        student_id: new.student_id,
        changes: new.changes.clone(),
        reason,
        status: UpdateRequestStatus::Pending,
        submitted_at: now,
        expires_at: now + validity,
        decided_at: None,
        decided_by: None,
        review_notes: None,
        version: 0,
    })
}
