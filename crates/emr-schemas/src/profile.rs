use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Profile fields a student may ask to change through an update request.
pub const UPDATABLE_PROFILE_FIELDS: &[&str] = &[
    "contact_number",
    "email",
    "address",
    "emergency_contact_name",
    "emergency_contact_number",
    "emergency_contact_relation",
    "blood_type",
    "allergies",
    "medical_conditions",
    "medications",
];

/// Student profile as a flat field map.
///
/// Only the request-updatable part of the profile is modelled; identity and
/// clinical history live with the external web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: UserId,
    pub fields: BTreeMap<String, String>,
    /// Update requests whose changes are already in `fields`. Written in the
    /// same save as the fields themselves.
    #[serde(default)]
    pub applied_requests: BTreeSet<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Store-managed optimistic concurrency counter; 0 until first saved.
    #[serde(default)]
    pub version: i64,
}

impl StudentProfile {
    pub fn new(student_id: UserId) -> Self {
        Self {
            student_id,
            fields: BTreeMap::new(),
            applied_requests: BTreeSet::new(),
            updated_at: None,
            version: 0,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has_applied(&self, request_id: Uuid) -> bool {
        self.applied_requests.contains(&request_id)
    }
}
