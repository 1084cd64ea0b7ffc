//! Update-request decisions.
//!
//! ```text
//!   submit()                 approve (staff, before deadline)
//!   ──────►  Pending ───────────────────────────────► Approved (term.)
//!              │  │          reject (staff, before deadline)
//!              │  └─────────────────────────────────► Rejected (term.)
//!              │             any decision after deadline, or sweep
//!              └────────────────────────────────────► Expired  (term.)
//! ```
//!
//! Expiration wins: once `now > expires_at`, a decision attempt on a pending
//! request yields `Expired` no matter what was asked for or who asked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use emr_schemas::{
    Actor, Intent, NotificationEvent, Recipient, Subject, UpdateRequest, UpdateRequestStatus,
};

use crate::appointment::non_blank;
use crate::{FieldChange, LifecycleError};

/// A reviewer's requested decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject {
        #[serde(default)]
        notes: Option<String>,
    },
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject { .. } => "reject",
        }
    }
}

/// What actually happened, which may differ from what was asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Field changes to apply to the student profile, copied verbatim from
    /// the request. Application must be idempotent.
    Approved { changes: Vec<FieldChange> },
    Rejected,
    /// Forced by the deadline; overrides the requested decision.
    Expired,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Approved { .. } => "approved",
            DecisionOutcome::Rejected => "rejected",
            DecisionOutcome::Expired => "expired",
        }
    }
}

/// Result of [`decide`]: snapshot to persist, outcome, intents to dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decided {
    pub snapshot: UpdateRequest,
    pub outcome: DecisionOutcome,
    pub intents: Vec<Intent>,
}

/// Decide a pending update request.
///
/// Order of checks:
/// 1. status must be `Pending`, else `InvalidTransition`;
/// 2. `now > expires_at` forces `Expired` (returned as `Ok`; callers persist
///    it even though something else was requested);
/// 3. actor must be doctor or admin, else `Forbidden`.
pub fn decide(
    req: &UpdateRequest,
    decision: &Decision,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Decided, LifecycleError> {
    if req.status != UpdateRequestStatus::Pending {
        return Err(LifecycleError::InvalidTransition {
            from: req.status.as_str(),
            action: decision.as_str(),
        });
    }

    if req.is_past_deadline(now) {
        return Ok(expire(req));
    }

    if !actor.role.is_staff() {
        return Err(LifecycleError::Forbidden {
            role: actor.role,
            action: decision.as_str(),
        });
    }

    let mut next = req.clone();
    next.decided_at = Some(now);
    next.decided_by = Some(actor.id);

    let (outcome, event) = match decision {
        Decision::Approve => {
            next.status = UpdateRequestStatus::Approved;
            let changes = req
                .changes
                .iter()
                .map(|(field, value)| FieldChange::new(field.clone(), value.clone()))
                .collect();
            (
                DecisionOutcome::Approved { changes },
                NotificationEvent::RequestApproved,
            )
        }
        Decision::Reject { notes } => {
            next.status = UpdateRequestStatus::Rejected;
            next.review_notes = non_blank(notes.as_deref());
            (DecisionOutcome::Rejected, NotificationEvent::RequestRejected)
        }
    };

    let intents = vec![Intent::notify(
        Recipient::Student(req.student_id),
        event,
        Subject::UpdateRequest { id: req.id },
    )];

    Ok(Decided {
        snapshot: next,
        outcome,
        intents,
    })
}

/// Expired transition shared by lazy (`decide`) and active (`sweep_expired`)
/// enforcement. `decided_at`/`decided_by` stay empty: nobody decided.
pub(crate) fn expire(req: &UpdateRequest) -> Decided {
    let mut next = req.clone();
    next.status = UpdateRequestStatus::Expired;

    Decided {
        snapshot: next,
        outcome: DecisionOutcome::Expired,
        intents: vec![Intent::notify(
            Recipient::Student(req.student_id),
            NotificationEvent::RequestExpired,
            Subject::UpdateRequest { id: req.id },
        )],
    }
}
