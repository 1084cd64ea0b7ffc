//! Request and response types for all emr-daemon HTTP endpoints.
//!
//! The actor is supplied explicitly in every mutating request body;
//! authentication belongs to whatever fronts the daemon.

use serde::{Deserialize, Serialize};

use emr_lifecycle::{ActionPayload, AppointmentAction, Decision, NewAppointment, NewUpdateRequest};
use emr_schemas::{Actor, StudentProfile, UpdateRequest};
use emr_service::DecisionCommitted;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub actor: Actor,
    pub appointment: NewAppointment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentActionRequest {
    pub actor: Actor,
    pub action: AppointmentAction,
    #[serde(default)]
    pub payload: ActionPayload,
}

// ---------------------------------------------------------------------------
// Update requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitUpdateRequestBody {
    pub actor: Actor,
    pub request: NewUpdateRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub actor: Actor,
    pub decision: DecisionKind,
    /// Reviewer notes, kept on rejection.
    #[serde(default)]
    pub notes: Option<String>,
}

impl DecisionRequest {
    pub fn to_decision(&self) -> Decision {
        match self.decision {
            DecisionKind::Approve => Decision::Approve,
            DecisionKind::Reject => Decision::Reject {
                notes: self.notes.clone(),
            },
        }
    }
}

/// `outcome` is what actually happened: `approved`, `rejected` or `expired`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub outcome: String,
    pub request: UpdateRequest,
    pub profile: Option<StudentProfile>,
    pub delivery_failures: usize,
}

impl From<DecisionCommitted> for DecisionResponse {
    fn from(d: DecisionCommitted) -> Self {
        Self {
            outcome: d.outcome.as_str().to_string(),
            request: d.request,
            profile: d.profile,
            delivery_failures: d.delivery_failures,
        }
    }
}
