use std::fmt;

use serde::{Deserialize, Serialize};

use emr_schemas::{Intent, NotificationEvent, Recipient, Subject};

use crate::NotificationPreferences;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preference bucket an event falls into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AppointmentApproved,
    AppointmentReminder,
    AppointmentUpdate,
    RequestStatus,
}

impl Category {
    pub fn of(event: NotificationEvent) -> Self {
        use NotificationEvent as E;
        match event {
            E::AppointmentApproved => Category::AppointmentApproved,
            E::AppointmentReminder => Category::AppointmentReminder,
            E::AppointmentRequested
            | E::AppointmentDeclined
            | E::AppointmentCancelled
            | E::AppointmentRescheduled
            | E::AppointmentCompleted
            | E::AppointmentNoShow => Category::AppointmentUpdate,
            E::RequestApproved | E::RequestRejected | E::RequestExpired => {
                Category::RequestStatus
            }
        }
    }
}

/// Human-facing form of an [`Intent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendered {
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub kind: NotificationEvent,
}

fn ticket(subject: &Subject) -> String {
    match subject {
        Subject::Appointment { ticket_number, .. } => ticket_number.clone(),
        Subject::UpdateRequest { id } => id.to_string(),
    }
}

pub fn render(intent: &Intent) -> Rendered {
    use NotificationEvent as E;

    let t = ticket(&intent.subject);
    let (title, message, priority) = match intent.event {
        E::AppointmentRequested => (
            "New Appointment Request".to_string(),
            format!("A student has requested an appointment (Ticket: {t})."),
            Priority::Normal,
        ),
        E::AppointmentApproved => (
            "Appointment Approved".to_string(),
            format!(
                "Your appointment request has been approved.\n\nTicket Number: {t}\n\n\
                 Please arrive 10 minutes before your scheduled time."
            ),
            Priority::High,
        ),
        E::AppointmentDeclined => (
            "Appointment Declined".to_string(),
            format!("Your appointment request (Ticket: {t}) has been declined."),
            Priority::Normal,
        ),
        E::AppointmentCancelled => (
            "Appointment Cancelled".to_string(),
            match intent.recipient {
                Recipient::Student(_) => format!(
                    "Your appointment (Ticket: {t}) has been cancelled.\n\n\
                     You can book a new appointment through your student portal."
                ),
                Recipient::Doctor(_) => {
                    format!("The student cancelled appointment {t}.")
                }
            },
            Priority::High,
        ),
        E::AppointmentRescheduled => (
            "Appointment Rescheduled".to_string(),
            format!("Appointment {t} has been moved to a new date."),
            Priority::High,
        ),
        E::AppointmentCompleted => (
            "Appointment Completed".to_string(),
            format!("Your visit (Ticket: {t}) has been completed."),
            Priority::Low,
        ),
        E::AppointmentNoShow => (
            "Missed Appointment".to_string(),
            format!(
                "You were marked as a no-show for appointment {t}. \
                 Please book again if you still need care."
            ),
            Priority::Normal,
        ),
        E::AppointmentReminder => (
            "Appointment Reminder".to_string(),
            format!(
                "Reminder: You have an upcoming appointment.\n\nTicket: {t}\n\n\
                 Please arrive 10 minutes before your scheduled time."
            ),
            Priority::High,
        ),
        E::RequestApproved => (
            "Update Request Approved".to_string(),
            "Your update request has been approved.\n\n\
             The changes have been applied to your profile."
                .to_string(),
            Priority::Normal,
        ),
        E::RequestRejected => (
            "Update Request Declined".to_string(),
            "Your update request has been declined.\n\n\
             Please contact the medical office if you have questions."
                .to_string(),
            Priority::Normal,
        ),
        E::RequestExpired => (
            "Update Request Expired".to_string(),
            "Your update request was not reviewed in time and has expired. \
             Please submit a new request if the change is still needed."
                .to_string(),
            Priority::Normal,
        ),
    };

    Rendered {
        title,
        message,
        priority,
        kind: intent.event,
    }
}

/// A rendered intent addressed to one user, with the delivery channels their
/// preferences allow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub subject: Subject,
    #[serde(flatten)]
    pub rendered: Rendered,
    pub in_app: bool,
    pub send_email: bool,
}

pub fn compose(intent: &Intent, prefs: &NotificationPreferences) -> Notification {
    let category = Category::of(intent.event);
    Notification {
        recipient: intent.recipient,
        subject: intent.subject.clone(),
        rendered: render(intent),
        in_app: prefs.wants_in_app(category),
        send_email: prefs.wants_email(category),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emr_schemas::UserId;
    use uuid::Uuid;

    fn appt_intent(recipient: Recipient, event: NotificationEvent) -> Intent {
        Intent::notify(
            recipient,
            event,
            Subject::Appointment {
                id: Uuid::nil(),
                ticket_number: "APT-2026-0A1B2C".to_string(),
            },
        )
    }

    #[test]
    fn approval_and_reminder_are_high_priority_and_mention_ticket() {
        for event in [
            NotificationEvent::AppointmentApproved,
            NotificationEvent::AppointmentReminder,
        ] {
            let r = render(&appt_intent(Recipient::Student(UserId::new()), event));
            assert_eq!(r.priority, Priority::High);
            assert!(r.message.contains("APT-2026-0A1B2C"));
            assert_eq!(r.kind, event);
        }
    }

    #[test]
    fn cancellation_wording_depends_on_recipient() {
        let to_student = render(&appt_intent(
            Recipient::Student(UserId::new()),
            NotificationEvent::AppointmentCancelled,
        ));
        let to_doctor = render(&appt_intent(
            Recipient::Doctor(UserId::new()),
            NotificationEvent::AppointmentCancelled,
        ));
        assert!(to_student.message.contains("student portal"));
        assert!(to_doctor.message.starts_with("The student cancelled"));
    }

    #[test]
    fn compose_applies_preferences() {
        let prefs = NotificationPreferences {
            email_appointment_reminder: false,
            ..NotificationPreferences::default()
        };
        let n = compose(
            &appt_intent(
                Recipient::Student(UserId::new()),
                NotificationEvent::AppointmentReminder,
            ),
            &prefs,
        );
        assert!(n.in_app);
        assert!(!n.send_email);
        assert_eq!(n.rendered.title, "Appointment Reminder");
    }
}
