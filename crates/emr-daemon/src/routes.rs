//! Axum router and all HTTP handlers for emr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use uuid::Uuid;

use emr_lifecycle::LifecycleError;
use emr_service::{ErrorBody, ServiceError};
use emr_store::StoreError;

use crate::{
    api_types::{
        AppointmentActionRequest, BookAppointmentRequest, DecisionRequest, DecisionResponse,
        HealthResponse, SubmitUpdateRequestBody,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/appointments", post(book_appointment))
        .route("/v1/appointments/:id", get(get_appointment))
        .route("/v1/appointments/:id/actions", post(appointment_action))
        .route("/v1/update-requests", post(submit_update_request))
        .route("/v1/update-requests/:id", get(get_update_request))
        .route("/v1/update-requests/:id/decision", post(decide_update_request))
        .route("/v1/jobs/expire-update-requests", post(job_expire_update_requests))
        .route("/v1/jobs/send-reminders", post(job_send_reminders))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub fn status_for(e: &ServiceError) -> StatusCode {
    match e {
        ServiceError::Lifecycle(LifecycleError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        ServiceError::Lifecycle(LifecycleError::Forbidden { .. }) => StatusCode::FORBIDDEN,
        ServiceError::Lifecycle(LifecycleError::Validation(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        ServiceError::Store(
            StoreError::ConcurrentModification { .. } | StoreError::Duplicate { .. },
        ) => StatusCode::CONFLICT,
        ServiceError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: ServiceError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(code = e.code(), error = %e, "request failed");
    }
    (status, Json(ErrorBody::from(&e))).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, r: Result<T, ServiceError>) -> Response {
    match r {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

pub(crate) async fn book_appointment(
    State(st): State<Arc<AppState>>,
    Json(req): Json<BookAppointmentRequest>,
) -> Response {
    let r = st
        .service
        .book_appointment(&req.actor, &req.appointment)
        .await;
    respond(StatusCode::CREATED, r)
}

pub(crate) async fn get_appointment(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    respond(StatusCode::OK, st.service.get_appointment(id).await)
}

pub(crate) async fn appointment_action(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppointmentActionRequest>,
) -> Response {
    let r = st
        .service
        .apply_appointment_action(id, &req.actor, req.action, &req.payload)
        .await;
    respond(StatusCode::OK, r)
}

// ---------------------------------------------------------------------------
// Update requests
// ---------------------------------------------------------------------------

pub(crate) async fn submit_update_request(
    State(st): State<Arc<AppState>>,
    Json(req): Json<SubmitUpdateRequestBody>,
) -> Response {
    let r = st
        .service
        .submit_update_request(&req.actor, &req.request)
        .await;
    respond(StatusCode::CREATED, r)
}

pub(crate) async fn get_update_request(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    respond(StatusCode::OK, st.service.get_update_request(id).await)
}

/// A decision that arrives after the deadline still answers 200, with
/// `outcome: "expired"`.
pub(crate) async fn decide_update_request(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Response {
    let r = st
        .service
        .decide_update_request(id, &req.actor, &req.to_decision())
        .await
        .map(DecisionResponse::from);
    respond(StatusCode::OK, r)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub(crate) async fn job_expire_update_requests(State(st): State<Arc<AppState>>) -> Response {
    let r = st.service.sweep_expired_update_requests().await;
    if let Ok(report) = &r {
        info!(expired = report.processed, "jobs/expire-update-requests");
        let _ = st.bus.send(BusMsg::SweepFinished {
            job: "expire_update_requests".to_string(),
            report: report.clone(),
        });
    }
    respond(StatusCode::OK, r)
}

pub(crate) async fn job_send_reminders(State(st): State<Arc<AppState>>) -> Response {
    let r = st.service.send_appointment_reminders().await;
    if let Ok(report) = &r {
        info!(reminded = report.processed, "jobs/send-reminders");
        let _ = st.bus.send(BusMsg::SweepFinished {
            job: "send_reminders".to_string(),
            report: report.clone(),
        });
    }
    respond(StatusCode::OK, r)
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
