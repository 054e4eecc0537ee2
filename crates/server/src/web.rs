use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use deskslice_protocol::{
    CalibStatus, Calibration, ConfigResponse, ConfigUpdate, LoginRequest, OkResponse,
    StateResponse,
};

use crate::control::ControlServer;
use crate::mjpeg::{MjpegTuning, Stream};
use crate::session::Session;
use crate::signaling::SignalingServer;

/// Runtime MJPEG interval bounds accepted by `/api/config`. Ten
/// milliseconds is the fastest cadence the preview loop can honor.
const MIN_INTERVAL_MS: u64 = 10;
const MAX_INTERVAL_MS: u64 = 10_000;

/// Everything the thin HTTP layer delegates to.
pub struct AppState {
    pub session: Arc<Session>,
    pub monitors: Vec<deskslice_protocol::Monitor>,
    pub signaling: Arc<SignalingServer>,
    pub control: Arc<ControlServer>,
    pub preview_stream: Option<Arc<Stream>>,
    pub tuning: Arc<MjpegTuning>,
    pub static_dir: PathBuf,
}

/// Wire all routes. The only invariant enforced here is authentication;
/// handlers delegate everything else.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/api/monitors", get(monitors))
        .route("/api/state", get(current_state))
        .route("/api/config", post(update_config))
        .route("/ws/signal", get(signal_ws))
        .route("/ws/control", get(control_ws))
        .route("/mjpeg/desktop", get(mjpeg_stream))
        .route("/favicon.ico", get(favicon))
        .fallback_service(ServeDir::new(&state.static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginRequest>) -> Response {
    if state.session.authenticate(&req.password) {
        Json(OkResponse { ok: true }).into_response()
    } else {
        unauthorized()
    }
}

async fn logout(State(state): State<Arc<AppState>>) -> Json<OkResponse> {
    state.session.logout();
    Json(OkResponse { ok: true })
}

async fn monitors(State(state): State<Arc<AppState>>) -> Response {
    if !state.session.is_authenticated() {
        return unauthorized();
    }
    Json(&state.monitors).into_response()
}

async fn current_state(State(state): State<Arc<AppState>>) -> Response {
    if !state.session.is_authenticated() {
        return unauthorized();
    }
    let snap = state.session.snapshot();
    Json(StateResponse {
        mode: snap.mode,
        monitor_index: snap.monitor_index,
        input_enabled: snap.input_enabled,
        video_mode: snap.video_mode,
        calib: calib_status(&snap.calib),
        authenticated: snap.authenticated,
    })
    .into_response()
}

fn calib_status(calibration: &Calibration) -> CalibStatus {
    CalibStatus {
        plugin: calibration.plugin_abs.has_area(),
        chat: calibration.chat_rel.has_area(),
        scroll: calibration.scroll_rel.has_area(),
    }
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    if !state.session.is_authenticated() {
        return unauthorized();
    }

    if update.reset {
        state.tuning.reset();
        return config_response(&state);
    }

    if let Some(interval) = update.mjpeg_interval_ms {
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval) {
            return (
                StatusCode::BAD_REQUEST,
                format!("mjpegIntervalMs must be {MIN_INTERVAL_MS}-{MAX_INTERVAL_MS}"),
            )
                .into_response();
        }
    }
    if let Some(quality) = update.mjpeg_quality {
        if quality == 0 || quality > 100 {
            return (StatusCode::BAD_REQUEST, "mjpegQuality must be 1-100").into_response();
        }
    }

    state.tuning.set(update.mjpeg_interval_ms, update.mjpeg_quality);
    config_response(&state)
}

fn config_response(state: &AppState) -> Response {
    Json(ConfigResponse {
        applied: true,
        mjpeg_interval_ms: state.tuning.interval_ms(),
        mjpeg_quality: state.tuning.quality(),
    })
    .into_response()
}

async fn signal_ws(
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Auth is checked before the upgrade is consumed: an unauthenticated
    // client gets 401, never 101.
    if !state.session.is_authenticated() {
        return unauthorized();
    }
    match ws {
        Ok(ws) => {
            let signaling = Arc::clone(&state.signaling);
            ws.on_upgrade(move |socket| signaling.handle_socket(socket))
        }
        Err(rejection) => rejection.into_response(),
    }
}

async fn control_ws(
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.session.is_authenticated() {
        return unauthorized();
    }
    match ws {
        Ok(ws) => {
            let control = Arc::clone(&state.control);
            ws.on_upgrade(move |socket| control.handle_socket(socket))
        }
        Err(rejection) => rejection.into_response(),
    }
}

async fn mjpeg_stream(State(state): State<Arc<AppState>>) -> Response {
    match &state.preview_stream {
        Some(stream) => Arc::clone(stream).serve(),
        None => (StatusCode::NOT_FOUND, "mjpeg preview disabled").into_response(),
    }
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}
