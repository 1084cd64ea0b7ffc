//! Shared runtime state for emr-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The lifecycle service
//! inside is backend-agnostic: the store and clock are trait objects chosen
//! at boot.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use emr_notify::{DeliveryError, Notification, Notifier, PreferenceBook};
use emr_schemas::Intent;
use emr_service::{Clock, EntityStore, LifecycleService, ServicePolicy, SweepReport};
use emr_store::InMemoryStore;

// ---------------------------------------------------------------------------
// BusMsg (SSE event bus payload)
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Notification(Notification),
    SweepFinished { job: String, report: SweepReport },
}

impl BusMsg {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Notification(_) => "notification",
            BusMsg::SweepFinished { .. } => "sweep",
        }
    }
}

// ---------------------------------------------------------------------------
// BroadcastNotifier
// ---------------------------------------------------------------------------

/// Renders each intent with the recipient's preferences and publishes it on
/// the bus when the recipient wants in-app notices for that category. There
/// is no e-mail transport; `send_email` travels with the notification for
/// whatever consumes the stream. Having no subscribers is not a delivery
/// failure.
#[derive(Clone)]
pub struct BroadcastNotifier {
    bus: broadcast::Sender<BusMsg>,
    prefs: PreferenceBook,
}

impl BroadcastNotifier {
    pub fn new(bus: broadcast::Sender<BusMsg>, prefs: PreferenceBook) -> Self {
        Self { bus, prefs }
    }
}

#[async_trait::async_trait]
impl Notifier for BroadcastNotifier {
    async fn dispatch(&self, intent: &Intent) -> Result<(), DeliveryError> {
        let n = self.prefs.compose(intent);
        info!(
            recipient = %n.recipient.user_id(),
            event = %n.rendered.kind,
            in_app = n.in_app,
            send_email = n.send_email,
            "notification"
        );
        if !n.in_app {
            return Ok(());
        }
        if self.bus.send(BusMsg::Notification(n)).is_err() {
            debug!(event = %intent.event, "no stream subscribers");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub type DaemonService = LifecycleService<Arc<dyn EntityStore>, BroadcastNotifier, Arc<dyn Clock>>;

/// Shared (via `Arc`) across all Axum handlers and background tasks.
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    /// Hash of the loaded configuration, if the daemon booted from files.
    pub config_hash: Option<String>,
    pub service: DaemonService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
        policy: ServicePolicy,
        prefs: PreferenceBook,
        config_hash: Option<String>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let notifier = BroadcastNotifier::new(bus.clone(), prefs);

        Self {
            bus,
            build: BuildInfo {
                service: "emr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash,
            service: LifecycleService::new(store, notifier, clock, policy),
        }
    }

    /// In-memory store with the given clock, default policy.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            clock,
            ServicePolicy::default(),
            PreferenceBook::default(),
            None,
        )
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Run both sweeps once and publish their reports.
pub async fn run_sweeps(state: &AppState) {
    match state.service.sweep_expired_update_requests().await {
        Ok(report) => {
            let _ = state.bus.send(BusMsg::SweepFinished {
                job: "expire_update_requests".to_string(),
                report,
            });
        }
        Err(e) => error!(error = %e, "expiry sweep failed"),
    }

    match state.service.send_appointment_reminders().await {
        Ok(report) => {
            let _ = state.bus.send(BusMsg::SweepFinished {
                job: "send_reminders".to_string(),
                report,
            });
        }
        Err(e) => error!(error = %e, "reminder sweep failed"),
    }
}

/// Spawn the periodic expiry and reminder sweep. The first tick runs
/// immediately so requests that lapsed while the daemon was down are expired
/// at boot.
pub fn spawn_sweeps(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            run_sweeps(&state).await;
        }
    });
}
