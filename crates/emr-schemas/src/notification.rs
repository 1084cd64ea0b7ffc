use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Who a notification is addressed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Student(UserId),
    Doctor(UserId),
}

impl Recipient {
    pub fn user_id(&self) -> UserId {
        match self {
            Recipient::Student(id) | Recipient::Doctor(id) => *id,
        }
    }
}

/// What happened, from the recipient's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    AppointmentRequested,
    AppointmentApproved,
    AppointmentDeclined,
    AppointmentCancelled,
    AppointmentRescheduled,
    AppointmentCompleted,
    AppointmentNoShow,
    AppointmentReminder,
    RequestApproved,
    RequestRejected,
    RequestExpired,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppointmentRequested => "appointment_requested",
            Self::AppointmentApproved => "appointment_approved",
            Self::AppointmentDeclined => "appointment_declined",
            Self::AppointmentCancelled => "appointment_cancelled",
            Self::AppointmentRescheduled => "appointment_rescheduled",
            Self::AppointmentCompleted => "appointment_completed",
            Self::AppointmentNoShow => "appointment_no_show",
            Self::AppointmentReminder => "appointment_reminder",
            Self::RequestApproved => "request_approved",
            Self::RequestRejected => "request_rejected",
            Self::RequestExpired => "request_expired",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record an intent is about, so renderers can build links and messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Appointment { id: Uuid, ticket_number: String },
    UpdateRequest { id: Uuid },
}

/// A side effect the lifecycle engine asks its caller to perform.
///
/// The engine never sends anything itself; it returns intents alongside the
/// new snapshot and the caller dispatches them after the snapshot commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub recipient: Recipient,
    pub event: NotificationEvent,
    pub subject: Subject,
}

impl Intent {
    pub fn notify(recipient: Recipient, event: NotificationEvent, subject: Subject) -> Self {
        Self {
            recipient,
            event,
            subject,
        }
    }
}
