use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UnknownVariant, UserId};

/// Lifecycle state of a profile update request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRequestStatus {
    Pending,
    /// **Terminal.** Field changes were handed to the caller for application.
    Approved,
    /// **Terminal.**
    Rejected,
    /// **Terminal.** Deadline passed before a decision was made.
    Expired,
}

impl UpdateRequestStatus {
    pub const ALL: [UpdateRequestStatus; 4] = [
        UpdateRequestStatus::Pending,
        UpdateRequestStatus::Approved,
        UpdateRequestStatus::Rejected,
        UpdateRequestStatus::Expired,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for UpdateRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateRequestStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "update request status",
                value: s.to_string(),
            })
    }
}

/// A student's request to change fields of their own profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: Uuid,
    pub student_id: UserId,
    /// Proposed field changes: profile field name → new value.
    pub changes: BTreeMap<String, String>,
    pub reason: String,
    pub status: UpdateRequestStatus,
    pub submitted_at: DateTime<Utc>,
    /// Decision deadline (submission + validity window).
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<UserId>,
    pub review_notes: Option<String>,
    /// Store-managed optimistic concurrency counter.
    pub version: i64,
}

impl UpdateRequest {
    /// Strictly after the deadline. A decision made exactly at
    /// `expires_at` is still inside the window.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
