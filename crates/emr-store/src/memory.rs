use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use emr_schemas::{
    Appointment, AppointmentStatus, StudentProfile, UpdateRequest, UpdateRequestStatus, UserId,
};

use crate::{
    EntityStore, StoreError, StoreResult, KIND_APPOINTMENT, KIND_PROFILE, KIND_UPDATE_REQUEST,
};

/// Map-backed store. Each table sits behind its own lock; the version check
/// and the write happen under one write guard.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    update_requests: RwLock<HashMap<Uuid, UpdateRequest>>,
    profiles: RwLock<HashMap<UserId, StudentProfile>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared check-and-set for versioned rows.
fn check_and_set<T: Clone>(
    table: &mut HashMap<Uuid, T>,
    kind: &'static str,
    id: Uuid,
    mut next: T,
    expected: i64,
    version_of: impl Fn(&T) -> i64,
    set_version: impl Fn(&mut T, i64),
) -> StoreResult<T> {
    let current = table.get(&id).ok_or(StoreError::NotFound { kind, id })?;
    let actual = version_of(current);
    if actual != expected {
        return Err(StoreError::ConcurrentModification {
            kind,
            id,
            expected,
            actual,
        });
    }
    set_version(&mut next, expected + 1);
    table.insert(id, next.clone());
    Ok(next)
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        self.appointments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: KIND_APPOINTMENT,
                id,
            })
    }

    async fn insert_appointment(&self, appt: &Appointment) -> StoreResult<Appointment> {
        let mut table = self.appointments.write().await;
        let ticket_taken = table
            .values()
            .any(|a| a.ticket_number == appt.ticket_number);
        if ticket_taken || table.contains_key(&appt.id) {
            return Err(StoreError::Duplicate {
                kind: KIND_APPOINTMENT,
                id: appt.id,
            });
        }
        table.insert(appt.id, appt.clone());
        Ok(appt.clone())
    }

    async fn save_appointment(
        &self,
        appt: &Appointment,
        expected_version: i64,
    ) -> StoreResult<Appointment> {
        let mut table = self.appointments.write().await;
        check_and_set(
            &mut table,
            KIND_APPOINTMENT,
            appt.id,
            appt.clone(),
            expected_version,
            |a| a.version,
            |a, v| a.version = v,
        )
    }

    async fn list_reminder_candidates(
        &self,
        due_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>> {
        let table = self.appointments.read().await;
        let mut out: Vec<Appointment> = table
            .values()
            .filter(|a| {
                a.status == AppointmentStatus::Approved
                    && !a.reminder_sent
                    && a.effective_at() < due_before
            })
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.effective_at(), a.id));
        Ok(out)
    }

    async fn get_update_request(&self, id: Uuid) -> StoreResult<UpdateRequest> {
        self.update_requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: KIND_UPDATE_REQUEST,
                id,
            })
    }

    async fn insert_update_request(&self, req: &UpdateRequest) -> StoreResult<UpdateRequest> {
        let mut table = self.update_requests.write().await;
        if table.contains_key(&req.id) {
            return Err(StoreError::Duplicate {
                kind: KIND_UPDATE_REQUEST,
                id: req.id,
            });
        }
        table.insert(req.id, req.clone());
        Ok(req.clone())
    }

    async fn save_update_request(
        &self,
        req: &UpdateRequest,
        expected_version: i64,
    ) -> StoreResult<UpdateRequest> {
        let mut table = self.update_requests.write().await;
        check_and_set(
            &mut table,
            KIND_UPDATE_REQUEST,
            req.id,
            req.clone(),
            expected_version,
            |r| r.version,
            |r, v| r.version = v,
        )
    }

    async fn list_pending_update_requests(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<UpdateRequest>> {
        let table = self.update_requests.read().await;
        let mut out: Vec<UpdateRequest> = table
            .values()
            .filter(|r| r.status == UpdateRequestStatus::Pending && r.expires_at < before)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.expires_at, r.id));
        Ok(out)
    }

    async fn get_profile(&self, student_id: UserId) -> StoreResult<StudentProfile> {
        Ok(self
            .profiles
            .read()
            .await
            .get(&student_id)
            .cloned()
            .unwrap_or_else(|| StudentProfile::new(student_id)))
    }

    async fn save_profile(
        &self,
        profile: &StudentProfile,
        expected_version: i64,
    ) -> StoreResult<StudentProfile> {
        let mut table = self.profiles.write().await;
        let actual = table.get(&profile.student_id).map_or(0, |p| p.version);
        if actual != expected_version {
            return Err(StoreError::ConcurrentModification {
                kind: KIND_PROFILE,
                id: profile.student_id.0,
                expected: expected_version,
                actual,
            });
        }
        let mut next = profile.clone();
        next.version = expected_version + 1;
        table.insert(next.student_id, next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use emr_schemas::{ServiceType, TimeSlot};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn appt(status: AppointmentStatus, at: DateTime<Utc>) -> Appointment {
        let id = Uuid::new_v4();
        Appointment {
            id,
            ticket_number: format!("APT-{}", id.simple()),
            student_id: UserId::new(),
            doctor_id: None,
            service_type: ServiceType::Vaccination,
            time_slot: TimeSlot::Morning,
            requested_at: at,
            scheduled_at: None,
            status,
            reason: "flu shot".to_string(),
            clinical_note: None,
            status_reason: None,
            decided_by: None,
            approved_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            reminder_sent: false,
            created_at: now(),
            updated_at: now(),
            version: 0,
        }
    }

    fn request(expires_at: DateTime<Utc>, status: UpdateRequestStatus) -> UpdateRequest {
        UpdateRequest {
            id: Uuid::new_v4(),
            student_id: UserId::new(),
            changes: BTreeMap::from([("email".to_string(), "x@y.edu".to_string())]),
            reason: "new mail".to_string(),
            status,
            submitted_at: expires_at - Duration::days(7),
            expires_at,
            decided_at: None,
            decided_by: None,
            review_notes: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn save_bumps_version_and_rejects_stale_writes() {
        let store = InMemoryStore::new();
        let a = appt(AppointmentStatus::Pending, now() + Duration::days(1));
        store.insert_appointment(&a).await.unwrap();

        let mut next = a.clone();
        next.status = AppointmentStatus::Approved;
        let saved = store.save_appointment(&next, 0).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.get_appointment(a.id).await.unwrap(), saved);

        let err = store.save_appointment(&next, 0).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::ConcurrentModification {
                kind: KIND_APPOINTMENT,
                id: a.id,
                expected: 0,
                actual: 1,
            }
        );
    }

    #[tokio::test]
    async fn concurrent_saves_from_same_read_have_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        let a = appt(AppointmentStatus::Pending, now() + Duration::days(1));
        store.insert_appointment(&a).await.unwrap();

        let mut approve = a.clone();
        approve.status = AppointmentStatus::Approved;
        let mut decline = a.clone();
        decline.status = AppointmentStatus::Declined;

        let s1 = Arc::clone(&store);
        let s2 = Arc::clone(&store);
        let h1 = tokio::spawn(async move { s1.save_appointment(&approve, 0).await });
        let h2 = tokio::spawn(async move { s2.save_appointment(&decline, 0).await });
        let r1 = h1.await.unwrap();
        let r2 = h2.await.unwrap();

        let wins = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loser = if r1.is_err() { r1 } else { r2 };
        assert!(loser.unwrap_err().is_conflict());
        assert_eq!(store.get_appointment(a.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn missing_and_duplicate_rows() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.get_update_request(id).await.unwrap_err().code(),
            "NOT_FOUND"
        );

        let r = request(now(), UpdateRequestStatus::Pending);
        assert!(matches!(
            store.save_update_request(&r, 0).await,
            Err(StoreError::NotFound { .. })
        ));
        store.insert_update_request(&r).await.unwrap();
        assert!(matches!(
            store.insert_update_request(&r).await,
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn pending_listing_filters_by_status_and_deadline() {
        let store = InMemoryStore::new();
        let overdue = request(now() - Duration::days(1), UpdateRequestStatus::Pending);
        let open = request(now() + Duration::days(1), UpdateRequestStatus::Pending);
        let done = request(now() - Duration::days(2), UpdateRequestStatus::Approved);
        for r in [&overdue, &open, &done] {
            store.insert_update_request(r).await.unwrap();
        }

        let listed = store.list_pending_update_requests(now()).await.unwrap();
        assert_eq!(listed, vec![overdue]);
    }

    #[tokio::test]
    async fn reminder_candidates_are_unreminded_approved_visits() {
        let store = InMemoryStore::new();
        let due = appt(AppointmentStatus::Approved, now() + Duration::hours(20));
        let mut reminded = appt(AppointmentStatus::Approved, now() + Duration::hours(20));
        reminded.reminder_sent = true;
        let pending = appt(AppointmentStatus::Pending, now() + Duration::hours(20));
        let far = appt(AppointmentStatus::Approved, now() + Duration::days(10));
        for a in [&due, &reminded, &pending, &far] {
            store.insert_appointment(a).await.unwrap();
        }

        let listed = store
            .list_reminder_candidates(now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(listed, vec![due]);
    }

    #[tokio::test]
    async fn unknown_profile_reads_as_empty() {
        let store = InMemoryStore::new();
        let student = UserId::new();
        let p = store.get_profile(student).await.unwrap();
        assert!(p.fields.is_empty());

        let mut p2 = p.clone();
        p2.fields.insert("blood_type".to_string(), "B-".to_string());
        let saved = store.save_profile(&p2, 0).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.get_profile(student).await.unwrap(), saved);
    }

    #[tokio::test]
    async fn stale_profile_write_is_refused() {
        let store = InMemoryStore::new();
        let student = UserId::new();
        let read = store.get_profile(student).await.unwrap();

        let mut email = read.clone();
        email.fields.insert("email".to_string(), "a@school.edu".to_string());
        let mut address = read.clone();
        address.fields.insert("address".to_string(), "Dorm 4".to_string());

        store.save_profile(&email, read.version).await.unwrap();
        let err = store.save_profile(&address, read.version).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::ConcurrentModification {
                kind: KIND_PROFILE,
                id: student.0,
                expected: 0,
                actual: 1,
            }
        );
        assert_eq!(store.get_profile(student).await.unwrap().fields, email.fields);
    }

    #[tokio::test]
    async fn ticket_numbers_are_unique() {
        let store = InMemoryStore::new();
        let first = appt(AppointmentStatus::Pending, now() + Duration::days(1));
        let mut clash = appt(AppointmentStatus::Pending, now() + Duration::days(2));
        clash.ticket_number = first.ticket_number.clone();

        store.insert_appointment(&first).await.unwrap();
        assert!(matches!(
            store.insert_appointment(&clash).await,
            Err(StoreError::Duplicate { .. })
        ));
        assert!(store.get_appointment(clash.id).await.is_err());
    }
}
