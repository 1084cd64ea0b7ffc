use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UnknownVariant, UserId};

// ---------------------------------------------------------------------------
// AppointmentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an appointment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Booked by the student, awaiting a clinic decision.
    Pending,
    /// Confirmed by a doctor or admin.
    Approved,
    /// Refused by the clinic. **Terminal.**
    Declined,
    /// Visit took place and a clinical note was recorded. **Terminal.**
    Completed,
    /// Withdrawn by the student or the clinic. **Terminal.**
    Cancelled,
    /// Student did not attend. **Terminal.**
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Approved,
        AppointmentStatus::Declined,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Completed | Self::Cancelled | Self::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "appointment status",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ServiceType / TimeSlot
// ---------------------------------------------------------------------------

/// Kind of visit requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    MedicalConsultation,
    DentalCleaning,
    DentalFilling,
    DentalExtraction,
    MedicalClearance,
    HealthCertificate,
    Vaccination,
    PhysicalExam,
    FollowUp,
    Emergency,
    Other,
}

impl ServiceType {
    pub const ALL: [ServiceType; 11] = [
        ServiceType::MedicalConsultation,
        ServiceType::DentalCleaning,
        ServiceType::DentalFilling,
        ServiceType::DentalExtraction,
        ServiceType::MedicalClearance,
        ServiceType::HealthCertificate,
        ServiceType::Vaccination,
        ServiceType::PhysicalExam,
        ServiceType::FollowUp,
        ServiceType::Emergency,
        ServiceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalConsultation => "medical_consultation",
            Self::DentalCleaning => "dental_cleaning",
            Self::DentalFilling => "dental_filling",
            Self::DentalExtraction => "dental_extraction",
            Self::MedicalClearance => "medical_clearance",
            Self::HealthCertificate => "health_certificate",
            Self::Vaccination => "vaccination",
            Self::PhysicalExam => "physical_exam",
            Self::FollowUp => "follow_up",
            Self::Emergency => "emergency",
            Self::Other => "other",
        }
    }

    /// Human label used in rendered notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MedicalConsultation => "Medical Consultation",
            Self::DentalCleaning => "Dental Cleaning",
            Self::DentalFilling => "Dental Filling",
            Self::DentalExtraction => "Dental Extraction",
            Self::MedicalClearance => "Medical Clearance",
            Self::HealthCertificate => "Health Certificate",
            Self::Vaccination => "Vaccination",
            Self::PhysicalExam => "Physical Examination",
            Self::FollowUp => "Follow-up Consultation",
            Self::Emergency => "Emergency",
            Self::Other => "Other",
        }
    }
}

impl FromStr for ServiceType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "service type",
                value: s.to_string(),
            })
    }
}

/// Preferred half-day for the visit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    #[default]
    Morning,
    Afternoon,
}

impl TimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Morning => "Morning (8:00 AM - 12:00 PM)",
            Self::Afternoon => "Afternoon (1:00 PM - 5:00 PM)",
        }
    }
}

impl FromStr for TimeSlot {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(Self::Morning),
            "afternoon" => Ok(Self::Afternoon),
            other => Err(UnknownVariant {
                kind: "time slot",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Appointment
// ---------------------------------------------------------------------------

/// A clinic appointment snapshot.
///
/// Appointments are never deleted; every change after booking is a status
/// transition computed by `emr-lifecycle` and persisted by the store under an
/// optimistic `version` check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    /// Human-facing reference, e.g. `APT-2026-3F9A1C`.
    pub ticket_number: String,
    pub student_id: UserId,
    /// Assigned doctor. Optional until approval.
    pub doctor_id: Option<UserId>,
    pub service_type: ServiceType,
    pub time_slot: TimeSlot,
    /// Date/time the student asked for (moved by reschedule).
    pub requested_at: DateTime<Utc>,
    /// Concrete slot fixed by the clinic on approval, if any.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    /// Chief complaint given at booking.
    pub reason: String,
    /// Clinical note attached on completion.
    pub clinical_note: Option<String>,
    /// Decline or cancellation reason.
    pub status_reason: Option<String>,
    /// Staff member who approved or declined.
    pub decided_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub reminder_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store-managed optimistic concurrency counter.
    pub version: i64,
}

impl Appointment {
    /// The moment the visit is expected: the clinic's scheduled slot when set,
    /// otherwise the student's requested time.
    pub fn effective_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.requested_at)
    }

    /// Approved and due today or later.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.status == AppointmentStatus::Approved
            && self.effective_at().date_naive() >= now.date_naive()
    }

    /// Still open (pending/approved) although its day has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Approved
        ) && self.effective_at().date_naive() < now.date_naive()
    }
}
