//! Batch scans run by periodic jobs. Both are pure: they pick the records that
//! are due and compute their transitions, the job persists and dispatches.

use chrono::{DateTime, Duration, Utc};

use emr_schemas::{
    Appointment, AppointmentStatus, Intent, NotificationEvent, Recipient, Subject, UpdateRequest,
    UpdateRequestStatus,
};

use crate::update_request::expire;
use crate::{Decided, Transition};

/// Pending requests whose deadline has passed, each with its `Expired`
/// transition. Non-pending and still-open requests are skipped, so the scan
/// can be fed an unfiltered listing.
pub fn sweep_expired(requests: &[UpdateRequest], now: DateTime<Utc>) -> Vec<Decided> {
    requests
        .iter()
        .filter(|r| r.status == UpdateRequestStatus::Pending && r.is_past_deadline(now))
        .map(expire)
        .collect()
}

/// Approved appointments falling on `now + lead_days` (calendar date) that have
/// not been reminded yet. Each transition flags `reminder_sent` and carries one
/// reminder intent for the student.
pub fn sweep_due_reminders(
    appointments: &[Appointment],
    now: DateTime<Utc>,
    lead_days: i64,
) -> Vec<Transition<Appointment>> {
    let due_on = (now + Duration::days(lead_days)).date_naive();

    appointments
        .iter()
        .filter(|a| {
            a.status == AppointmentStatus::Approved
                && !a.reminder_sent
                && a.effective_at().date_naive() == due_on
        })
        .map(|a| {
            let mut next = a.clone();
            next.reminder_sent = true;
            next.updated_at = now;
            let intent = Intent::notify(
                Recipient::Student(a.student_id),
                NotificationEvent::AppointmentReminder,
                Subject::Appointment {
                    id: a.id,
                    ticket_number: a.ticket_number.clone(),
                },
            );
            Transition::new(next, vec![intent])
        })
        .collect()
}
