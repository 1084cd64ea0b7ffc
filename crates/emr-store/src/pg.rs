use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use emr_schemas::{
    Appointment, AppointmentStatus, ServiceType, StudentProfile, TimeSlot, UpdateRequest,
    UpdateRequestStatus, UserId,
};

use crate::{
    EntityStore, StoreError, StoreResult, KIND_APPOINTMENT, KIND_PROFILE, KIND_UPDATE_REQUEST,
};

pub const ENV_DB_URL: &str = "EMR_DATABASE_URL";

/// Connect to Postgres using the URL in `env_var` (normally [`ENV_DB_URL`]).
pub async fn connect_from_env(env_var: &str) -> Result<PgPool> {
    let url =
        std::env::var(env_var).with_context(|| format!("missing env var {env_var}"))?;
    connect(&url).await
}

/// Connect to Postgres with an already-resolved URL.
pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_appointments_table: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='appointments'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_appointments_table: exists,
    })
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const APPOINTMENT_COLUMNS: &str = r#"
    id, ticket_number, student_id, doctor_id, service_type, time_slot,
    requested_at, scheduled_at, status, reason, clinical_note, status_reason,
    decided_by, approved_at, completed_at, cancelled_at, cancelled_by,
    reminder_sent, created_at, updated_at, version
"#;

const UPDATE_REQUEST_COLUMNS: &str = r#"
    id, student_id, changes, reason, status, submitted_at, expires_at,
    decided_at, decided_by, review_notes, version
"#;

fn decode_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("row decode: {e}"))
}

fn appointment_from_row(row: &PgRow) -> StoreResult<Appointment> {
    let uid = |col: &str| -> StoreResult<Option<UserId>> {
        Ok(row.try_get::<Option<Uuid>, _>(col)?.map(UserId))
    };

    Ok(Appointment {
        id: row.try_get("id")?,
        ticket_number: row.try_get("ticket_number")?,
        student_id: UserId(row.try_get("student_id")?),
        doctor_id: uid("doctor_id")?,
        service_type: row
            .try_get::<String, _>("service_type")?
            .parse::<ServiceType>()
            .map_err(decode_err)?,
        time_slot: row
            .try_get::<String, _>("time_slot")?
            .parse::<TimeSlot>()
            .map_err(decode_err)?,
        requested_at: row.try_get("requested_at")?,
        scheduled_at: row.try_get("scheduled_at")?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<AppointmentStatus>()
            .map_err(decode_err)?,
        reason: row.try_get("reason")?,
        clinical_note: row.try_get("clinical_note")?,
        status_reason: row.try_get("status_reason")?,
        decided_by: uid("decided_by")?,
        approved_at: row.try_get("approved_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        cancelled_by: uid("cancelled_by")?,
        reminder_sent: row.try_get("reminder_sent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

fn update_request_from_row(row: &PgRow) -> StoreResult<UpdateRequest> {
    let Json(changes): Json<BTreeMap<String, String>> = row.try_get("changes")?;
    Ok(UpdateRequest {
        id: row.try_get("id")?,
        student_id: UserId(row.try_get("student_id")?),
        changes,
        reason: row.try_get("reason")?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<UpdateRequestStatus>()
            .map_err(decode_err)?,
        submitted_at: row.try_get("submitted_at")?,
        expires_at: row.try_get("expires_at")?,
        decided_at: row.try_get("decided_at")?,
        decided_by: row.try_get::<Option<Uuid>, _>("decided_by")?.map(UserId),
        review_notes: row.try_get("review_notes")?,
        version: row.try_get("version")?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Postgres-backed [`EntityStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Zero rows touched by a versioned update: tell a missing row apart from
    /// a stale version.
    async fn miss(
        &self,
        table: &str,
        kind: &'static str,
        id: Uuid,
        expected: i64,
    ) -> StoreError {
        let sql = format!("select version from {table} where id = $1");
        match sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(actual)) => StoreError::ConcurrentModification {
                kind,
                id,
                expected,
                actual,
            },
            Ok(None) => StoreError::NotFound { kind, id },
            Err(e) => e.into(),
        }
    }
}

#[async_trait::async_trait]
impl EntityStore for PgStore {
    async fn get_appointment(&self, id: Uuid) -> StoreResult<Appointment> {
        let sql = format!("select {APPOINTMENT_COLUMNS} from appointments where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound {
                kind: KIND_APPOINTMENT,
                id,
            })?;
        appointment_from_row(&row)
    }

    async fn insert_appointment(&self, a: &Appointment) -> StoreResult<Appointment> {
        let res = sqlx::query(
            r#"
            insert into appointments (
              id, ticket_number, student_id, doctor_id, service_type, time_slot,
              requested_at, scheduled_at, status, reason, clinical_note, status_reason,
              decided_by, approved_at, completed_at, cancelled_at, cancelled_by,
              reminder_sent, created_at, updated_at, version
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
              $17, $18, $19, $20, $21
            )
            "#,
        )
        .bind(a.id)
        .bind(&a.ticket_number)
        .bind(a.student_id.0)
        .bind(a.doctor_id.map(|u| u.0))
        .bind(a.service_type.as_str())
        .bind(a.time_slot.as_str())
        .bind(a.requested_at)
        .bind(a.scheduled_at)
        .bind(a.status.as_str())
        .bind(&a.reason)
        .bind(&a.clinical_note)
        .bind(&a.status_reason)
        .bind(a.decided_by.map(|u| u.0))
        .bind(a.approved_at)
        .bind(a.completed_at)
        .bind(a.cancelled_at)
        .bind(a.cancelled_by.map(|u| u.0))
        .bind(a.reminder_sent)
        .bind(a.created_at)
        .bind(a.updated_at)
        .bind(a.version)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(a.clone()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                kind: KIND_APPOINTMENT,
                id: a.id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_appointment(
        &self,
        a: &Appointment,
        expected_version: i64,
    ) -> StoreResult<Appointment> {
        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            update appointments set
              doctor_id = $3, service_type = $4, time_slot = $5, requested_at = $6,
              scheduled_at = $7, status = $8, reason = $9, clinical_note = $10,
              status_reason = $11, decided_by = $12, approved_at = $13,
              completed_at = $14, cancelled_at = $15, cancelled_by = $16,
              reminder_sent = $17, updated_at = $18, version = version + 1
            where id = $1 and version = $2
            returning version
            "#,
        )
        .bind(a.id)
        .bind(expected_version)
        .bind(a.doctor_id.map(|u| u.0))
        .bind(a.service_type.as_str())
        .bind(a.time_slot.as_str())
        .bind(a.requested_at)
        .bind(a.scheduled_at)
        .bind(a.status.as_str())
        .bind(&a.reason)
        .bind(&a.clinical_note)
        .bind(&a.status_reason)
        .bind(a.decided_by.map(|u| u.0))
        .bind(a.approved_at)
        .bind(a.completed_at)
        .bind(a.cancelled_at)
        .bind(a.cancelled_by.map(|u| u.0))
        .bind(a.reminder_sent)
        .bind(a.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match new_version {
            Some(version) => Ok(Appointment {
                version,
                ..a.clone()
            }),
            None => Err(self
                .miss("appointments", KIND_APPOINTMENT, a.id, expected_version)
                .await),
        }
    }

    async fn list_reminder_candidates(
        &self,
        due_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>> {
        let sql = format!(
            r#"
            select {APPOINTMENT_COLUMNS} from appointments
            where status = 'approved'
              and reminder_sent = false
              and coalesce(scheduled_at, requested_at) < $1
            order by coalesce(scheduled_at, requested_at), id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(due_before)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(appointment_from_row).collect()
    }

    async fn get_update_request(&self, id: Uuid) -> StoreResult<UpdateRequest> {
        let sql = format!("select {UPDATE_REQUEST_COLUMNS} from update_requests where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound {
                kind: KIND_UPDATE_REQUEST,
                id,
            })?;
        update_request_from_row(&row)
    }

    async fn insert_update_request(&self, r: &UpdateRequest) -> StoreResult<UpdateRequest> {
        let res = sqlx::query(
            r#"
            insert into update_requests (
              id, student_id, changes, reason, status, submitted_at, expires_at,
              decided_at, decided_by, review_notes, version
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(r.id)
        .bind(r.student_id.0)
        .bind(Json(&r.changes))
        .bind(&r.reason)
        .bind(r.status.as_str())
        .bind(r.submitted_at)
        .bind(r.expires_at)
        .bind(r.decided_at)
        .bind(r.decided_by.map(|u| u.0))
        .bind(&r.review_notes)
        .bind(r.version)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(r.clone()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                kind: KIND_UPDATE_REQUEST,
                id: r.id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_update_request(
        &self,
        r: &UpdateRequest,
        expected_version: i64,
    ) -> StoreResult<UpdateRequest> {
        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            update update_requests set
              status = $3, decided_at = $4, decided_by = $5, review_notes = $6,
              version = version + 1
            where id = $1 and version = $2
            returning version
            "#,
        )
        .bind(r.id)
        .bind(expected_version)
        .bind(r.status.as_str())
        .bind(r.decided_at)
        .bind(r.decided_by.map(|u| u.0))
        .bind(&r.review_notes)
        .fetch_optional(&self.pool)
        .await?;

        match new_version {
            Some(version) => Ok(UpdateRequest {
                version,
                ..r.clone()
            }),
            None => Err(self
                .miss("update_requests", KIND_UPDATE_REQUEST, r.id, expected_version)
                .await),
        }
    }

    async fn list_pending_update_requests(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<UpdateRequest>> {
        let sql = format!(
            r#"
            select {UPDATE_REQUEST_COLUMNS} from update_requests
            where status = 'pending' and expires_at < $1
            order by expires_at, id
            "#
        );
        let rows = sqlx::query(&sql).bind(before).fetch_all(&self.pool).await?;
        rows.iter().map(update_request_from_row).collect()
    }

    async fn get_profile(&self, student_id: UserId) -> StoreResult<StudentProfile> {
        let row = sqlx::query(
            r#"
            select fields, applied_requests, updated_at, version
            from student_profiles where student_id = $1
            "#,
        )
        .bind(student_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(StudentProfile::new(student_id));
        };
        let Json(fields): Json<BTreeMap<String, String>> = row.try_get("fields")?;
        let Json(applied_requests): Json<BTreeSet<Uuid>> = row.try_get("applied_requests")?;
        Ok(StudentProfile {
            student_id,
            fields,
            applied_requests,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }

    async fn save_profile(
        &self,
        p: &StudentProfile,
        expected_version: i64,
    ) -> StoreResult<StudentProfile> {
        // Version 0 covers both "no row yet" and a row created before
        // profiles were versioned.
        let sql = if expected_version == 0 {
            r#"
            insert into student_profiles (student_id, fields, applied_requests, updated_at, version)
            values ($1, $3, $4, $5, 1)
            on conflict (student_id) do update
              set fields = excluded.fields,
                  applied_requests = excluded.applied_requests,
                  updated_at = excluded.updated_at,
                  version = student_profiles.version + 1
              where student_profiles.version = $2
            returning version
            "#
        } else {
            r#"
            update student_profiles set
              fields = $3, applied_requests = $4, updated_at = $5,
              version = version + 1
            where student_id = $1 and version = $2
            returning version
            "#
        };

        let new_version: Option<i64> = sqlx::query_scalar(sql)
            .bind(p.student_id.0)
            .bind(expected_version)
            .bind(Json(&p.fields))
            .bind(Json(&p.applied_requests))
            .bind(p.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(version) = new_version {
            return Ok(StudentProfile {
                version,
                ..p.clone()
            });
        }

        let actual = sqlx::query_scalar::<_, i64>(
            "select version from student_profiles where student_id = $1",
        )
        .bind(p.student_id.0)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or(0);
        Err(StoreError::ConcurrentModification {
            kind: KIND_PROFILE,
            id: p.student_id.0,
            expected: expected_version,
            actual,
        })
    }
}
