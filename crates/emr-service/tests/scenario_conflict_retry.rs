//! A save that loses a version race is re-read and re-decided against the
//! fresh snapshot; a sweep that loses a race skips the record.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use emr_lifecycle::{ActionPayload, AppointmentAction, Decision, NewAppointment, NewUpdateRequest};
use emr_notify::RecordingNotifier;
use emr_schemas::{
    Actor, Appointment, AppointmentStatus, ServiceType, StudentProfile, TimeSlot, UpdateRequest,
    UpdateRequestStatus, UserId,
};
use emr_service::{FixedClock, LifecycleService, ServicePolicy};
use emr_store::{EntityStore, InMemoryStore, StoreResult};

/// Wraps an [`InMemoryStore`]; before each of the first `races` versioned
/// saves, a competing writer bumps the row (via `interfere`).
struct RacingStore {
    inner: InMemoryStore,
    races: AtomicU32,
    interfere: Box<dyn Fn(&mut Appointment) + Send + Sync>,
}

impl RacingStore {
    fn new(races: u32, interfere: impl Fn(&mut Appointment) + Send + Sync + 'static) -> Self {
        Self {
            inner: InMemoryStore::new(),
            races: AtomicU32::new(races),
            interfere: Box::new(interfere),
        }
    }

    fn take_race(&self) -> bool {
        self.races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl EntityStore for RacingStore {
    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        self.inner.get_appointment(id).await
    }

    async fn insert_appointment(&self, appt: &Appointment) -> StoreResult<Appointment> {
        self.inner.insert_appointment(appt).await
    }

    async fn save_appointment(
        &self,
        appt: &Appointment,
        expected_version: i64,
    ) -> StoreResult<Appointment> {
        if self.take_race() {
            let mut other = self.inner.get_appointment(appt.id).await?;
            let version = other.version;
            (self.interfere)(&mut other);
            self.inner.save_appointment(&other, version).await?;
        }
        self.inner.save_appointment(appt, expected_version).await
    }

    async fn list_reminder_candidates(
        &self,
        due_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>> {
        self.inner.list_reminder_candidates(due_before).await
    }

    async fn get_update_request(&self, id: Uuid) -> StoreResult<UpdateRequest> {
        self.inner.get_update_request(id).await
    }

    async fn insert_update_request(&self, req: &UpdateRequest) -> StoreResult<UpdateRequest> {
        self.inner.insert_update_request(req).await
    }

    async fn save_update_request(
        &self,
        req: &UpdateRequest,
        expected_version: i64,
    ) -> StoreResult<UpdateRequest> {
        if self.take_race() {
            // A reviewer rejects the request first.
            let mut other = self.inner.get_update_request(req.id).await?;
            let version = other.version;
            other.status = UpdateRequestStatus::Rejected;
            self.inner.save_update_request(&other, version).await?;
        }
        self.inner.save_update_request(req, expected_version).await
    }

    async fn list_pending_update_requests(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<UpdateRequest>> {
        self.inner.list_pending_update_requests(before).await
    }

    async fn get_profile(&self, student_id: UserId) -> StoreResult<StudentProfile> {
        self.inner.get_profile(student_id).await
    }

    async fn save_profile(
        &self,
        profile: &StudentProfile,
        expected_version: i64,
    ) -> StoreResult<StudentProfile> {
        self.inner.save_profile(profile, expected_version).await
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 8, 30, 0).unwrap()
}

fn policy(max_save_retries: u32) -> ServicePolicy {
    ServicePolicy {
        max_save_retries,
        ..ServicePolicy::default()
    }
}

fn booking(student: UserId) -> NewAppointment {
    NewAppointment {
        student_id: student,
        doctor_id: None,
        service_type: ServiceType::PhysicalExam,
        time_slot: TimeSlot::Afternoon,
        requested_at: t0() + Duration::days(5),
        reason: "annual exam".to_string(),
    }
}

#[tokio::test]
async fn approve_retries_after_losing_a_race() {
    // The competing writer only edits the reason; approval still applies.
    let store = RacingStore::new(1, |a| a.reason = "edited elsewhere".to_string());
    let notifier = Arc::new(RecordingNotifier::new());
    let svc = LifecycleService::new(
        store,
        Arc::clone(&notifier),
        FixedClock::new(t0()),
        policy(3),
    );

    let student = UserId::new();
    let booked = svc
        .book_appointment(&Actor::student(student), &booking(student))
        .await
        .unwrap();

    let out = svc
        .apply_appointment_action(
            booked.entity.id,
            &Actor::doctor(UserId::new()),
            AppointmentAction::Approve,
            &ActionPayload::default(),
        )
        .await
        .unwrap();

    assert_eq!(out.entity.status, AppointmentStatus::Approved);
    assert_eq!(out.entity.reason, "edited elsewhere");
    assert_eq!(out.entity.version, 2);
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn retry_re_decides_against_the_new_state() {
    // The competing writer cancels; the retried approval is now illegal.
    let store = RacingStore::new(1, |a| a.status = AppointmentStatus::Cancelled);
    let notifier = Arc::new(RecordingNotifier::new());
    let svc = LifecycleService::new(store, Arc::clone(&notifier), FixedClock::new(t0()), policy(3));

    let student = UserId::new();
    let booked = svc
        .book_appointment(&Actor::student(student), &booking(student))
        .await
        .unwrap();

    let err = svc
        .apply_appointment_action(
            booked.entity.id,
            &Actor::admin(UserId::new()),
            AppointmentAction::Approve,
            &ActionPayload::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INVALID_TRANSITION");
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn conflict_surfaces_once_retries_are_exhausted() {
    let store = RacingStore::new(5, |a| a.reason = "again".to_string());
    let svc = LifecycleService::new(
        store,
        RecordingNotifier::new(),
        FixedClock::new(t0()),
        policy(2),
    );

    let student = UserId::new();
    let booked = svc
        .book_appointment(&Actor::student(student), &booking(student))
        .await
        .unwrap();

    let err = svc
        .apply_appointment_action(
            booked.entity.id,
            &Actor::admin(UserId::new()),
            AppointmentAction::Approve,
            &ActionPayload::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
}

#[tokio::test]
async fn sweep_skips_request_decided_under_it() {
    let clock = Arc::new(FixedClock::new(t0()));
    let notifier = Arc::new(RecordingNotifier::new());
    let svc = LifecycleService::new(
        RacingStore::new(1, |_| {}),
        Arc::clone(&notifier),
        Arc::clone(&clock),
        policy(3),
    );

    let student = UserId::new();
    let mut changes = BTreeMap::new();
    changes.insert("address".to_string(), "Dorm 7".to_string());
    let submitted = svc
        .submit_update_request(
            &Actor::student(student),
            &NewUpdateRequest {
                student_id: student,
                changes,
                reason: "moved".to_string(),
            },
        )
        .await
        .unwrap();

    clock.advance(Duration::days(8));
    let report = svc.sweep_expired_update_requests().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(report.conflicts, 1);
    assert!(notifier.sent().await.is_empty());

    let stored = svc.get_update_request(submitted.entity.id).await.unwrap();
    assert_eq!(stored.status, UpdateRequestStatus::Rejected);

    // Terminal now: a late decision is refused, not expired.
    let err = svc
        .decide_update_request(stored.id, &Actor::admin(UserId::new()), &Decision::Approve)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}
