//! emr-notify
//!
//! Delivery side of lifecycle intents. The engine hands back [`Intent`]s; the
//! service dispatches each one through a [`Notifier`] after the snapshot has
//! committed. Delivery is best-effort: a [`DeliveryError`] is logged by the
//! caller and never rolls the transition back.

mod preferences;
mod render;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use emr_schemas::{Intent, UserId};

pub use preferences::NotificationPreferences;
pub use render::{compose, render, Category, Notification, Priority, Rendered};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The backend refused this notification (bad address, opted out, ...).
    Rejected(String),
    /// The backend could not be reached.
    Transport(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Rejected(m) => write!(f, "delivery rejected: {m}"),
            DeliveryError::Transport(m) => write!(f, "delivery transport error: {m}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, intent: &Intent) -> Result<(), DeliveryError>;
}

#[async_trait::async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn dispatch(&self, intent: &Intent) -> Result<(), DeliveryError> {
        (**self).dispatch(intent).await
    }
}

/// Config pointer holding per-user overrides, keyed by user id.
pub const PREFERENCES_POINTER: &str = "/notifications/preferences";

/// Preference lookup shared by notifiers. Unknown users get the defaults.
#[derive(Debug, Clone, Default)]
pub struct PreferenceBook {
    by_user: HashMap<UserId, NotificationPreferences>,
}

impl PreferenceBook {
    /// Overrides from [`PREFERENCES_POINTER`]; an absent section is empty.
    ///
    /// ```yaml
    /// notifications:
    ///   preferences:
    ///     "6f1c0d1e-0000-4000-8000-000000000001":
    ///       email_appointment_reminder: false
    /// ```
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let by_user = match config.pointer(PREFERENCES_POINTER) {
            None | Some(Value::Null) => HashMap::new(),
            Some(v) => {
                let parsed: BTreeMap<Uuid, NotificationPreferences> =
                    serde_json::from_value(v.clone()).with_context(|| {
                        format!("CONFIG_INVALID {PREFERENCES_POINTER}: expected user id -> preference flags")
                    })?;
                parsed
                    .into_iter()
                    .map(|(id, prefs)| (UserId(id), prefs))
                    .collect()
            }
        };
        Ok(Self { by_user })
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    pub fn with(mut self, user: UserId, prefs: NotificationPreferences) -> Self {
        self.by_user.insert(user, prefs);
        self
    }

    pub fn get(&self, user: UserId) -> NotificationPreferences {
        self.by_user.get(&user).cloned().unwrap_or_default()
    }

    pub fn compose(&self, intent: &Intent) -> Notification {
        compose(intent, &self.get(intent.recipient.user_id()))
    }
}

/// Writes each notification to the log. Default backend for jobs run from
/// the CLI.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier {
    prefs: PreferenceBook,
}

impl TracingNotifier {
    pub fn new(prefs: PreferenceBook) -> Self {
        Self { prefs }
    }
}

#[async_trait::async_trait]
impl Notifier for TracingNotifier {
    async fn dispatch(&self, intent: &Intent) -> Result<(), DeliveryError> {
        let n = self.prefs.compose(intent);
        tracing::info!(
            recipient = %n.recipient.user_id(),
            event = %n.rendered.kind,
            priority = %n.rendered.priority,
            in_app = n.in_app,
            send_email = n.send_email,
            title = %n.rendered.title,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every dispatched intent in memory. Can be switched to fail so
/// callers' best-effort handling can be exercised.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Intent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Intent> {
        self.sent.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, intent: &Intent) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("recording notifier set to fail".into()));
        }
        self.sent.lock().await.push(intent.clone());
        Ok(())
    }
}
