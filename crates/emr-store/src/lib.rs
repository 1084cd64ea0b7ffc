//! emr-store
//!
//! Persistence seam for lifecycle entities.
//!
//! Every write of an existing appointment, update request or student profile
//! is a check-and-set on `version`: the caller passes the version it read, the
//! store refuses with [`StoreError::ConcurrentModification`] if the stored
//! row has moved, otherwise persists the snapshot with `version + 1` and
//! returns it. Two racing saves from the same read therefore produce exactly
//! one winner.
//!
//! Backends:
//! - [`InMemoryStore`]: tests and single-process runs.
//! - [`PgStore`]: Postgres via SQLx, schema in `migrations/`.

mod error;
mod memory;
mod pg;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use emr_schemas::{Appointment, StudentProfile, UpdateRequest, UserId};

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use pg::{connect, connect_from_env, migrate, status, DbStatus, PgStore, ENV_DB_URL};

pub const KIND_APPOINTMENT: &str = "appointment";
pub const KIND_UPDATE_REQUEST: &str = "update_request";
pub const KIND_PROFILE: &str = "student_profile";

pub type StoreResult<T> = Result<T, StoreError>;

/// Entity store used by the lifecycle service.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment>;

    /// Insert a freshly booked appointment. Fails with `Duplicate` if the id
    /// or the ticket number is taken.
    async fn insert_appointment(&self, appt: &Appointment) -> StoreResult<Appointment>;

    async fn save_appointment(
        &self,
        appt: &Appointment,
        expected_version: i64,
    ) -> StoreResult<Appointment>;

    /// Approved appointments without a reminder whose visit (scheduled slot,
    /// else requested time) falls before `due_before`.
    async fn list_reminder_candidates(
        &self,
        due_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>>;

    async fn get_update_request(&self, id: Uuid) -> StoreResult<UpdateRequest>;

    async fn insert_update_request(&self, req: &UpdateRequest) -> StoreResult<UpdateRequest>;

    async fn save_update_request(
        &self,
        req: &UpdateRequest,
        expected_version: i64,
    ) -> StoreResult<UpdateRequest>;

    /// Pending requests whose `expires_at` is strictly before `before`.
    async fn list_pending_update_requests(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<UpdateRequest>>;

    /// Profile for a student; an empty profile if none has been stored yet.
    async fn get_profile(&self, student_id: UserId) -> StoreResult<StudentProfile>;

    /// Versioned save. `expected_version` 0 means the caller read the empty
    /// default profile; the row is created if still absent.
    async fn save_profile(
        &self,
        profile: &StudentProfile,
        expected_version: i64,
    ) -> StoreResult<StudentProfile>;
}

#[async_trait::async_trait]
impl<S: EntityStore + ?Sized> EntityStore for Arc<S> {
    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        (**self).get_appointment(id).await
    }

    async fn insert_appointment(&self, appt: &Appointment) -> StoreResult<Appointment> {
        (**self).insert_appointment(appt).await
    }

    async fn save_appointment(
        &self,
        appt: &Appointment,
        expected_version: i64,
    ) -> StoreResult<Appointment> {
        (**self).save_appointment(appt, expected_version).await
    }

    async fn list_reminder_candidates(
        &self,
        due_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>> {
        (**self).list_reminder_candidates(due_before).await
    }

    async fn get_update_request(&self, id: Uuid) -> StoreResult<UpdateRequest> {
        (**self).get_update_request(id).await
    }

    async fn insert_update_request(&self, req: &UpdateRequest) -> StoreResult<UpdateRequest> {
        (**self).insert_update_request(req).await
    }

    async fn save_update_request(
        &self,
        req: &UpdateRequest,
        expected_version: i64,
    ) -> StoreResult<UpdateRequest> {
        (**self).save_update_request(req, expected_version).await
    }

    async fn list_pending_update_requests(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<UpdateRequest>> {
        (**self).list_pending_update_requests(before).await
    }

    async fn get_profile(&self, student_id: UserId) -> StoreResult<StudentProfile> {
        (**self).get_profile(student_id).await
    }

    async fn save_profile(
        &self,
        profile: &StudentProfile,
        expected_version: i64,
    ) -> StoreResult<StudentProfile> {
        (**self).save_profile(profile, expected_version).await
    }
}
