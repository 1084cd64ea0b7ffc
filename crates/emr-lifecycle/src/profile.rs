use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use emr_schemas::StudentProfile;

/// One field assignment taken from an approved update request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub value: String,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Apply approved field changes to a profile.
///
/// Idempotent: changes are plain assignments, and `updated_at` only moves
/// when a field value actually changes, so re-applying the same set (e.g. on
/// a retried request) returns an identical profile.
pub fn apply_field_changes(
    profile: &StudentProfile,
    changes: &[FieldChange],
    now: DateTime<Utc>,
) -> StudentProfile {
    let mut next = profile.clone();
    let mut touched = false;

    for ch in changes {
        if next.field(&ch.field) != Some(ch.value.as_str()) {
            next.fields.insert(ch.field.clone(), ch.value.clone());
            touched = true;
        }
    }

    if touched {
        next.updated_at = Some(now);
    }
    next
}

/// Apply an approved request's changes and mark the request as applied.
///
/// `None` when the profile already carries the request's marker: the
/// changes went in once and later requests may have overwritten them since.
pub fn apply_request_changes(
    profile: &StudentProfile,
    request_id: Uuid,
    changes: &[FieldChange],
    now: DateTime<Utc>,
) -> Option<StudentProfile> {
    if profile.has_applied(request_id) {
        return None;
    }
    let mut next = apply_field_changes(profile, changes, now);
    next.applied_requests.insert(request_id);
    Some(next)
}
