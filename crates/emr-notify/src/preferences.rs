use serde::{Deserialize, Serialize};

use crate::Category;

/// Per-user delivery preferences. Everything is on by default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationPreferences {
    pub email_appointment_approved: bool,
    pub email_appointment_reminder: bool,
    pub email_appointment_updates: bool,
    pub email_request_status: bool,
    pub inapp_appointment_updates: bool,
    pub inapp_request_updates: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_appointment_approved: true,
            email_appointment_reminder: true,
            email_appointment_updates: true,
            email_request_status: true,
            inapp_appointment_updates: true,
            inapp_request_updates: true,
        }
    }
}

impl NotificationPreferences {
    pub fn wants_email(&self, category: Category) -> bool {
        match category {
            Category::AppointmentApproved => self.email_appointment_approved,
            Category::AppointmentReminder => self.email_appointment_reminder,
            Category::AppointmentUpdate => self.email_appointment_updates,
            Category::RequestStatus => self.email_request_status,
        }
    }

    pub fn wants_in_app(&self, category: Category) -> bool {
        match category {
            Category::AppointmentApproved
            | Category::AppointmentReminder
            | Category::AppointmentUpdate => self.inapp_appointment_updates,
            Category::RequestStatus => self.inapp_request_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_default_to_enabled() {
        let p: NotificationPreferences =
            serde_json::from_str(r#"{"email_request_status": false}"#).unwrap();
        assert!(!p.wants_email(Category::RequestStatus));
        assert!(p.wants_in_app(Category::RequestStatus));
        assert!(p.wants_email(Category::AppointmentReminder));
    }
}
