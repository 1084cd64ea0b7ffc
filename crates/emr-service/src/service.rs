use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use emr_config::EmrSettings;
use emr_lifecycle::{
    apply_action, apply_request_changes, book, decide, submit_update_request, sweep_due_reminders,
    sweep_expired, ActionPayload, AppointmentAction, Decision, DecisionOutcome, FieldChange,
    LifecycleError, NewAppointment, NewUpdateRequest, DEFAULT_REMINDER_LEAD_DAYS,
    DEFAULT_UPDATE_REQUEST_VALIDITY_DAYS,
};
use emr_notify::Notifier;
use emr_schemas::{
    Actor, Appointment, Intent, StudentProfile, UpdateRequest, UpdateRequestStatus,
};
use emr_store::{EntityStore, StoreError};

use crate::{Clock, ServiceError};

// ---------------------------------------------------------------------------
// Policy and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePolicy {
    pub update_request_validity: Duration,
    pub reminder_lead_days: i64,
    /// Extra attempts after a `ConcurrentModification`.
    pub max_save_retries: u32,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            update_request_validity: Duration::days(DEFAULT_UPDATE_REQUEST_VALIDITY_DAYS),
            reminder_lead_days: DEFAULT_REMINDER_LEAD_DAYS,
            max_save_retries: 3,
        }
    }
}

impl ServicePolicy {
    pub fn from_settings(settings: &EmrSettings) -> Self {
        Self {
            update_request_validity: Duration::days(settings.update_request_validity_days),
            reminder_lead_days: settings.reminder_lead_days,
            max_save_retries: settings.max_save_retries,
        }
    }
}

/// A committed write and the intents dispatched for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Committed<T> {
    pub entity: T,
    pub intents: Vec<Intent>,
    pub delivery_failures: usize,
}

/// A committed update-request decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionCommitted {
    pub request: UpdateRequest,
    pub outcome: DecisionOutcome,
    /// Profile after the approved changes were applied; `None` unless approved.
    pub profile: Option<StudentProfile>,
    pub intents: Vec<Intent>,
    pub delivery_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records the scan selected.
    pub scanned: usize,
    /// Records transitioned and saved.
    pub processed: usize,
    /// Records skipped because they changed under the sweep.
    pub conflicts: usize,
    pub delivery_failures: usize,
}

// ---------------------------------------------------------------------------
// LifecycleService
// ---------------------------------------------------------------------------

pub struct LifecycleService<S, N, C> {
    store: S,
    notifier: N,
    clock: C,
    policy: ServicePolicy,
}

impl<S, N, C> LifecycleService<S, N, C>
where
    S: EntityStore,
    N: Notifier,
    C: Clock,
{
    pub fn new(store: S, notifier: N, clock: C, policy: ServicePolicy) -> Self {
        Self {
            store,
            notifier,
            clock,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    /// Whether a failed save should be retried after `attempt` retries.
    fn should_retry(&self, err: &StoreError, attempt: u32) -> bool {
        err.is_conflict() && attempt < self.policy.max_save_retries
    }

    async fn dispatch_all(&self, intents: &[Intent]) -> usize {
        let mut failures = 0;
        for intent in intents {
            if let Err(e) = self.notifier.dispatch(intent).await {
                failures += 1;
                warn!(
                    event = %intent.event,
                    recipient = %intent.recipient.user_id(),
                    error = %e,
                    "notification delivery failed; transition stays committed"
                );
            }
        }
        failures
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_appointment(&self, id: Uuid) -> Result<Appointment, ServiceError> {
        Ok(self.store.get_appointment(id).await?)
    }

    pub async fn get_update_request(&self, id: Uuid) -> Result<UpdateRequest, ServiceError> {
        Ok(self.store.get_update_request(id).await?)
    }

    // -----------------------------------------------------------------------
    // Appointments
    // -----------------------------------------------------------------------

    pub async fn book_appointment(
        &self,
        actor: &Actor,
        new: &NewAppointment,
    ) -> Result<Committed<Appointment>, ServiceError> {
        let mut attempt = 0;
        loop {
            let t = book(actor, new, Uuid::new_v4(), self.clock.now())?;
            match self.store.insert_appointment(&t.snapshot).await {
                Ok(saved) => {
                    info!(
                        appointment_id = %saved.id,
                        ticket = %saved.ticket_number,
                        student_id = %saved.student_id,
                        "appointment booked"
                    );
                    let delivery_failures = self.dispatch_all(&t.intents).await;
                    return Ok(Committed {
                        entity: saved,
                        intents: t.intents,
                        delivery_failures,
                    });
                }
                // Id or ticket collision: draw a new id.
                Err(StoreError::Duplicate { .. }) if attempt < self.policy.max_save_retries => {
                    attempt += 1;
                    debug!(attempt, "appointment id collision; retrying with a new id");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn apply_appointment_action(
        &self,
        id: Uuid,
        actor: &Actor,
        action: AppointmentAction,
        payload: &ActionPayload,
    ) -> Result<Committed<Appointment>, ServiceError> {
        let mut attempt = 0;
        loop {
            let current = self.store.get_appointment(id).await?;
            let t = apply_action(&current, action, actor, payload, self.clock.now())?;

            match self.store.save_appointment(&t.snapshot, current.version).await {
                Ok(saved) => {
                    info!(
                        appointment_id = %id,
                        action = action.as_str(),
                        from = current.status.as_str(),
                        to = saved.status.as_str(),
                        actor = %actor.id,
                        version = saved.version,
                        "appointment transition committed"
                    );
                    let delivery_failures = self.dispatch_all(&t.intents).await;
                    return Ok(Committed {
                        entity: saved,
                        intents: t.intents,
                        delivery_failures,
                    });
                }
                Err(e) if self.should_retry(&e, attempt) => {
                    attempt += 1;
                    debug!(appointment_id = %id, attempt, error = %e, "retrying after conflict");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Update requests
    // -----------------------------------------------------------------------

    pub async fn submit_update_request(
        &self,
        actor: &Actor,
        new: &NewUpdateRequest,
    ) -> Result<Committed<UpdateRequest>, ServiceError> {
        let mut attempt = 0;
        loop {
            let req = submit_update_request(
                actor,
                new,
                Uuid::new_v4(),
                self.clock.now(),
                self.policy.update_request_validity,
            )?;
            match self.store.insert_update_request(&req).await {
                Ok(saved) => {
                    info!(
                        request_id = %saved.id,
                        student_id = %saved.student_id,
                        expires_at = %saved.expires_at,
                        fields = saved.changes.len(),
                        "update request submitted"
                    );
                    return Ok(Committed {
                        entity: saved,
                        intents: Vec::new(),
                        delivery_failures: 0,
                    });
                }
                Err(StoreError::Duplicate { .. }) if attempt < self.policy.max_save_retries => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Decide a request. A late decision commits as `Expired` and returns
    /// `Ok` with that outcome. An approval applies the field changes to the
    /// student profile after the request commits.
    pub async fn decide_update_request(
        &self,
        id: Uuid,
        actor: &Actor,
        decision: &Decision,
    ) -> Result<DecisionCommitted, ServiceError> {
        let mut attempt = 0;
        loop {
            let current = self.store.get_update_request(id).await?;
            let d = decide(&current, decision, actor, self.clock.now())?;

            match self
                .store
                .save_update_request(&d.snapshot, current.version)
                .await
            {
                Ok(saved) => {
                    info!(
                        request_id = %id,
                        requested = decision.as_str(),
                        outcome = d.outcome.as_str(),
                        actor = %actor.id,
                        "update request decided"
                    );

                    let profile = match &d.outcome {
                        DecisionOutcome::Approved { changes } => {
                            Some(self.apply_changes(&saved, changes).await?)
                        }
                        DecisionOutcome::Rejected | DecisionOutcome::Expired => None,
                    };

                    let delivery_failures = self.dispatch_all(&d.intents).await;
                    return Ok(DecisionCommitted {
                        request: saved,
                        outcome: d.outcome,
                        profile,
                        intents: d.intents,
                        delivery_failures,
                    });
                }
                Err(e) if self.should_retry(&e, attempt) => {
                    attempt += 1;
                    debug!(request_id = %id, attempt, error = %e, "retrying after conflict");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Finish an approval whose profile write failed. Returns the stored
    /// profile unchanged when the request's changes already went in.
    pub async fn apply_approved_changes(&self, id: Uuid) -> Result<StudentProfile, ServiceError> {
        let req = self.store.get_update_request(id).await?;
        if req.status != UpdateRequestStatus::Approved {
            return Err(LifecycleError::InvalidTransition {
                from: req.status.as_str(),
                action: "apply_changes",
            }
            .into());
        }
        let changes: Vec<FieldChange> = req
            .changes
            .iter()
            .map(|(f, v)| FieldChange::new(f.clone(), v.clone()))
            .collect();
        self.apply_changes(&req, &changes).await
    }

    /// Versioned profile write, retried from a fresh read on conflict. The
    /// request id is recorded on the profile in the same save, so a request
    /// lands at most once.
    async fn apply_changes(
        &self,
        req: &UpdateRequest,
        changes: &[FieldChange],
    ) -> Result<StudentProfile, ServiceError> {
        let mut attempt = 0;
        loop {
            let profile = self.store.get_profile(req.student_id).await?;
            let Some(next) = apply_request_changes(&profile, req.id, changes, self.clock.now())
            else {
                debug!(request_id = %req.id, "approved changes already on profile");
                return Ok(profile);
            };

            match self.store.save_profile(&next, profile.version).await {
                Ok(saved) => {
                    info!(
                        request_id = %req.id,
                        student_id = %req.student_id,
                        fields = changes.len(),
                        version = saved.version,
                        "profile updated from approved request"
                    );
                    return Ok(saved);
                }
                Err(e) if self.should_retry(&e, attempt) => {
                    attempt += 1;
                    debug!(student_id = %req.student_id, attempt, error = %e, "retrying profile write after conflict");
                }
                Err(e) => {
                    warn!(
                        request_id = %req.id,
                        student_id = %req.student_id,
                        error = %e,
                        "approved changes not applied to profile; re-apply with apply_approved_changes"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sweeps
    // -----------------------------------------------------------------------

    /// Expire every pending request past its deadline.
    pub async fn sweep_expired_update_requests(&self) -> Result<SweepReport, ServiceError> {
        let now = self.clock.now();
        let pending = self.store.list_pending_update_requests(now).await?;
        let expired = sweep_expired(&pending, now);

        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for d in expired {
            let expected = d.snapshot.version;
            match self.store.save_update_request(&d.snapshot, expected).await {
                Ok(_) => {
                    report.processed += 1;
                    report.delivery_failures += self.dispatch_all(&d.intents).await;
                }
                Err(e) if e.is_conflict() => {
                    report.conflicts += 1;
                    debug!(request_id = %d.snapshot.id, "request changed during expiry sweep; skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            scanned = report.scanned,
            expired = report.processed,
            conflicts = report.conflicts,
            delivery_failures = report.delivery_failures,
            "expiry sweep finished"
        );
        Ok(report)
    }

    /// Flag and notify approved appointments due in `reminder_lead_days`.
    pub async fn send_appointment_reminders(&self) -> Result<SweepReport, ServiceError> {
        let now = self.clock.now();
        let lead = self.policy.reminder_lead_days;
        let due_before = (now + Duration::days(lead + 1))
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();

        let candidates = self.store.list_reminder_candidates(due_before).await?;
        let due = sweep_due_reminders(&candidates, now, lead);

        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for t in due {
            let expected = t.snapshot.version;
            match self.store.save_appointment(&t.snapshot, expected).await {
                Ok(_) => {
                    report.processed += 1;
                    report.delivery_failures += self.dispatch_all(&t.intents).await;
                }
                Err(e) if e.is_conflict() => {
                    report.conflicts += 1;
                    debug!(appointment_id = %t.snapshot.id, "appointment changed during reminder sweep; skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            scanned = report.scanned,
            reminded = report.processed,
            conflicts = report.conflicts,
            delivery_failures = report.delivery_failures,
            "reminder sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use emr_notify::RecordingNotifier;
    use emr_schemas::{
        AppointmentStatus, NotificationEvent, Recipient, ServiceType, TimeSlot, UserId,
    };
    use emr_store::InMemoryStore;

    use super::*;
    use crate::FixedClock;

    type Svc = LifecycleService<Arc<InMemoryStore>, Arc<RecordingNotifier>, Arc<FixedClock>>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn service() -> (Svc, Arc<RecordingNotifier>, Arc<FixedClock>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let svc = LifecycleService::new(
            Arc::new(InMemoryStore::new()),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            ServicePolicy::default(),
        );
        (svc, notifier, clock)
    }

    fn booking(student: UserId) -> NewAppointment {
        NewAppointment {
            student_id: student,
            doctor_id: None,
            service_type: ServiceType::MedicalConsultation,
            time_slot: TimeSlot::Morning,
            requested_at: t0() + Duration::days(3),
            reason: "persistent cough".to_string(),
        }
    }

    fn request(student: UserId) -> NewUpdateRequest {
        let mut changes = BTreeMap::new();
        changes.insert("blood_type".to_string(), "AB-".to_string());
        NewUpdateRequest {
            student_id: student,
            changes,
            reason: "lab result".to_string(),
        }
    }

    #[tokio::test]
    async fn approve_commits_then_notifies_student() {
        let (svc, notifier, _) = service();
        let student = UserId::new();
        let booked = svc
            .book_appointment(&Actor::student(student), &booking(student))
            .await
            .unwrap();
        assert_eq!(booked.entity.version, 0);

        let doctor = Actor::doctor(UserId::new());
        let out = svc
            .apply_appointment_action(
                booked.entity.id,
                &doctor,
                AppointmentAction::Approve,
                &ActionPayload::default(),
            )
            .await
            .unwrap();

        assert_eq!(out.entity.status, AppointmentStatus::Approved);
        assert_eq!(out.entity.version, 1);
        assert_eq!(out.delivery_failures, 0);

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, Recipient::Student(student));
        assert_eq!(sent[0].event, NotificationEvent::AppointmentApproved);
    }

    #[tokio::test]
    async fn refused_action_leaves_record_and_outbox_untouched() {
        let (svc, notifier, _) = service();
        let student = UserId::new();
        let booked = svc
            .book_appointment(&Actor::student(student), &booking(student))
            .await
            .unwrap();

        let err = svc
            .apply_appointment_action(
                booked.entity.id,
                &Actor::student(student),
                AppointmentAction::Approve,
                &ActionPayload::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let stored = svc.get_appointment(booked.entity.id).await.unwrap();
        assert_eq!(stored, booked.entity);
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_does_not_undo_commit() {
        let (svc, notifier, _) = service();
        let student = UserId::new();
        let booked = svc
            .book_appointment(&Actor::student(student), &booking(student))
            .await
            .unwrap();

        notifier.set_failing(true);
        let out = svc
            .apply_appointment_action(
                booked.entity.id,
                &Actor::admin(UserId::new()),
                AppointmentAction::Decline,
                &ActionPayload::with_reason("clinic closed"),
            )
            .await
            .unwrap();
        assert_eq!(out.delivery_failures, 1);

        let stored = svc.get_appointment(booked.entity.id).await.unwrap();
        assert_eq!(stored.status, AppointmentStatus::Declined);
    }

    #[tokio::test]
    async fn approval_writes_profile_and_reapply_is_idempotent() {
        let (svc, notifier, clock) = service();
        let student = UserId::new();
        let submitted = svc
            .submit_update_request(&Actor::student(student), &request(student))
            .await
            .unwrap();
        assert_eq!(submitted.entity.expires_at, t0() + Duration::days(7));

        clock.advance(Duration::days(2));
        let decided = svc
            .decide_update_request(
                submitted.entity.id,
                &Actor::admin(UserId::new()),
                &Decision::Approve,
            )
            .await
            .unwrap();

        assert_eq!(decided.request.status, UpdateRequestStatus::Approved);
        let profile = decided.profile.unwrap();
        assert_eq!(profile.field("blood_type"), Some("AB-"));
        assert_eq!(notifier.sent().await.len(), 1);

        clock.advance(Duration::hours(1));
        let again = svc.apply_approved_changes(submitted.entity.id).await.unwrap();
        assert_eq!(again, profile);
    }

    #[tokio::test]
    async fn reapplying_an_older_approval_keeps_newer_values() {
        let (svc, _, clock) = service();
        let student = UserId::new();
        let actor = Actor::student(student);
        let admin = Actor::admin(UserId::new());

        let email = |value: &str| NewUpdateRequest {
            student_id: student,
            changes: BTreeMap::from([("email".to_string(), value.to_string())]),
            reason: "new address".to_string(),
        };
        let older = svc.submit_update_request(&actor, &email("old@x.edu")).await.unwrap();
        let newer = svc.submit_update_request(&actor, &email("new@x.edu")).await.unwrap();

        svc.decide_update_request(older.entity.id, &admin, &Decision::Approve)
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        let after_newer = svc
            .decide_update_request(newer.entity.id, &admin, &Decision::Approve)
            .await
            .unwrap()
            .profile
            .unwrap();
        assert_eq!(after_newer.field("email"), Some("new@x.edu"));
        assert_eq!(after_newer.version, 2);

        let replayed = svc.apply_approved_changes(older.entity.id).await.unwrap();
        assert_eq!(replayed, after_newer);
        let stored = svc.store().get_profile(student).await.unwrap();
        assert_eq!(stored.field("email"), Some("new@x.edu"));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn late_decision_commits_expired_without_touching_profile() {
        let (svc, notifier, clock) = service();
        let student = UserId::new();
        let submitted = svc
            .submit_update_request(&Actor::student(student), &request(student))
            .await
            .unwrap();

        clock.advance(Duration::days(8));
        let decided = svc
            .decide_update_request(
                submitted.entity.id,
                &Actor::doctor(UserId::new()),
                &Decision::Approve,
            )
            .await
            .unwrap();

        assert_eq!(decided.outcome, DecisionOutcome::Expired);
        assert_eq!(decided.request.status, UpdateRequestStatus::Expired);
        assert!(decided.profile.is_none());
        assert!(svc.store().get_profile(student).await.unwrap().fields.is_empty());

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, NotificationEvent::RequestExpired);

        let err = svc.apply_approved_changes(submitted.entity.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_requests() {
        let (svc, _, clock) = service();
        let student = UserId::new();
        let actor = Actor::student(student);
        let old = svc.submit_update_request(&actor, &request(student)).await.unwrap();
        clock.advance(Duration::days(3));
        let fresh = svc.submit_update_request(&actor, &request(student)).await.unwrap();

        clock.advance(Duration::days(5));
        let report = svc.sweep_expired_update_requests().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.conflicts, 0);

        let old = svc.get_update_request(old.entity.id).await.unwrap();
        let fresh = svc.get_update_request(fresh.entity.id).await.unwrap();
        assert_eq!(old.status, UpdateRequestStatus::Expired);
        assert_eq!(fresh.status, UpdateRequestStatus::Pending);

        let again = svc.sweep_expired_update_requests().await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn reminders_go_out_once_the_day_before() {
        let (svc, notifier, clock) = service();
        let student = UserId::new();
        let booked = svc
            .book_appointment(&Actor::student(student), &booking(student))
            .await
            .unwrap();
        svc.apply_appointment_action(
            booked.entity.id,
            &Actor::doctor(UserId::new()),
            AppointmentAction::Approve,
            &ActionPayload::default(),
        )
        .await
        .unwrap();
        notifier.clear().await;

        // Visit is on day 3; nothing is due on day 0.
        assert_eq!(svc.send_appointment_reminders().await.unwrap().processed, 0);

        clock.advance(Duration::days(2));
        let report = svc.send_appointment_reminders().await.unwrap();
        assert_eq!(report.processed, 1);
        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, NotificationEvent::AppointmentReminder);

        assert_eq!(svc.send_appointment_reminders().await.unwrap().processed, 0);
        assert!(svc.get_appointment(booked.entity.id).await.unwrap().reminder_sent);
    }

    #[test]
    fn policy_follows_settings() {
        let settings = EmrSettings::from_config_json(&serde_json::json!({
            "lifecycle": { "update_request_validity_days": 10, "max_save_retries": 5 }
        }))
        .unwrap();
        let policy = ServicePolicy::from_settings(&settings);
        assert_eq!(policy.update_request_validity, Duration::days(10));
        assert_eq!(policy.reminder_lead_days, 1);
        assert_eq!(policy.max_save_retries, 5);
    }
}
