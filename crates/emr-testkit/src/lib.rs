//! emr-testkit
//!
//! Fixtures shared by cross-crate scenario tests: a fixed epoch, record
//! builders, and a [`Harness`] wiring the lifecycle service to an in-memory
//! store, a recording notifier and a manually driven clock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use emr_lifecycle::{NewAppointment, NewUpdateRequest};
use emr_schemas::{
    Appointment, AppointmentStatus, ServiceType, TimeSlot, UpdateRequest, UpdateRequestStatus,
    UserId,
};
use emr_service::{LifecycleService, ServicePolicy};
use emr_store::InMemoryStore;

pub use emr_notify::RecordingNotifier;
pub use emr_service::FixedClock;

/// Day 0 of every scenario: a Monday morning.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn day(n: i64) -> DateTime<Utc> {
    epoch() + Duration::days(n)
}

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

/// Booking form for `student`, `days_ahead` days after `now`.
pub fn booking_form(student: UserId, now: DateTime<Utc>, days_ahead: i64) -> NewAppointment {
    NewAppointment {
        student_id: student,
        doctor_id: None,
        service_type: ServiceType::MedicalConsultation,
        time_slot: TimeSlot::Morning,
        requested_at: now + Duration::days(days_ahead),
        reason: "fever and headache".to_string(),
    }
}

pub fn update_form(student: UserId, changes: &[(&str, &str)]) -> NewUpdateRequest {
    NewUpdateRequest {
        student_id: student,
        changes: changes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        reason: "records out of date".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

/// An appointment record in `status`, as if loaded from the store.
pub fn appointment(student: UserId, status: AppointmentStatus, at: DateTime<Utc>) -> Appointment {
    let id = Uuid::new_v4();
    Appointment {
        id,
        ticket_number: emr_lifecycle::ticket_number(id, at),
        student_id: student,
        doctor_id: None,
        service_type: ServiceType::MedicalConsultation,
        time_slot: TimeSlot::Morning,
        requested_at: at,
        scheduled_at: None,
        status,
        reason: "check-up".to_string(),
        clinical_note: None,
        status_reason: None,
        decided_by: None,
        approved_at: None,
        completed_at: None,
        cancelled_at: None,
        cancelled_by: None,
        reminder_sent: false,
        created_at: epoch(),
        updated_at: epoch(),
        version: 0,
    }
}

/// An update request in `status`, submitted at `submitted_at` with the
/// default validity window.
pub fn update_request(
    student: UserId,
    status: UpdateRequestStatus,
    submitted_at: DateTime<Utc>,
) -> UpdateRequest {
    let mut changes = BTreeMap::new();
    changes.insert("allergies".to_string(), "peanuts".to_string());
    UpdateRequest {
        id: Uuid::new_v4(),
        student_id: student,
        changes,
        reason: "new diagnosis".to_string(),
        status,
        submitted_at,
        expires_at: submitted_at
            + Duration::days(emr_lifecycle::DEFAULT_UPDATE_REQUEST_VALIDITY_DAYS),
        decided_at: None,
        decided_by: None,
        review_notes: None,
        version: 0,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type TestService =
    LifecycleService<Arc<InMemoryStore>, Arc<RecordingNotifier>, Arc<FixedClock>>;

/// Service plus handles on its collaborators.
pub struct Harness {
    pub service: TestService,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    /// Clock at [`epoch`], default policy.
    pub fn new() -> Self {
        Self::with_policy(ServicePolicy::default())
    }

    pub fn with_policy(policy: ServicePolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(epoch()));
        let service = LifecycleService::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            policy,
        );
        Self {
            service,
            store,
            notifier,
            clock,
        }
    }

    /// Move the clock to day `n` after [`epoch`].
    pub fn at_day(&self, n: i64) {
        self.clock.set(day(n));
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
