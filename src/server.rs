//! Web API for live keystone calibration

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::geometry::{Point, Quad};
use crate::keystone::{DragState, EventResponse, HitTarget, KeystoneController, PointerEvent};
use crate::render::{encode_png, render, RenderControls, RenderMode, RenderOutcome, RenderSnapshot, PLACEHOLDER_MESSAGE};
use crate::scale::ScaleModel;
use crate::source::{decode_any, encode_data_url, EXPORT_KEY};
use crate::store::KeyValueStore;

/// Shared application state
///
/// The controller is the single writer of the calibration session; render
/// passes work from a snapshot taken under the lock.
pub struct AppState {
    controller: Mutex<KeystoneController>,
    store: Arc<dyn KeyValueStore>,
}

impl AppState {
    pub fn new(controller: KeystoneController, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            controller: Mutex::new(controller),
            store,
        }
    }

    /// Scale model is re-read for every frame
    pub fn snapshot(&self) -> RenderSnapshot {
        let scale = ScaleModel::load(self.store.as_ref());
        self.controller.lock().snapshot(scale)
    }
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/info", get(get_info))
        .route("/api/calibration", get(get_calibration))
        .route("/api/calibration/reset", post(reset_calibration))
        .route("/api/pointer", post(pointer_event))
        .route("/api/hit", get(hit_test))
        .route("/api/controls", get(get_controls).post(set_controls))
        .route("/api/ppi", post(set_ppi))
        .route("/api/scale", get(get_scale).post(set_scale))
        .route("/api/source", post(set_source))
        .route("/api/frame", get(get_frame))
        .route("/api/export", get(get_export))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    width: u32,
    height: u32,
    source_loaded: bool,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let ctl = state.controller.lock();
    let (width, height) = ctl.params().surface;
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        width,
        height,
        source_loaded: ctl.session().source.is_some(),
    })
}

/// API response for calibration data
#[derive(Serialize)]
struct CalibrationResponse {
    quad: Quad,
    ppi: f64,
    /// Quad top/left edge lengths at the current pixel density
    width_in: f64,
    height_in: f64,
}

fn calibration_response(ctl: &KeystoneController) -> Option<CalibrationResponse> {
    ctl.calibration().map(|cal| {
        let (width_in, height_in) = cal.extent_in();
        CalibrationResponse {
            quad: cal.quad,
            ppi: cal.pixels_per_inch,
            width_in,
            height_in,
        }
    })
}

async fn get_calibration(State(state): State<Arc<AppState>>) -> Json<Option<CalibrationResponse>> {
    Json(calibration_response(&state.controller.lock()))
}

/// Run store writes and image decoding off the async executor
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

async fn reset_calibration(State(state): State<Arc<AppState>>) -> Response {
    let result = blocking(move || {
        let mut ctl = state.controller.lock();
        ctl.reset();
        calibration_response(&ctl)
    })
    .await;
    match result {
        Ok(cal) => Json(cal).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Serialize)]
struct PointerResponse {
    repaint: bool,
    dragging: Option<String>,
}

async fn pointer_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<PointerEvent>,
) -> Response {
    // Drag mutations persist synchronously
    let result = blocking(move || {
        let mut ctl = state.controller.lock();
        let response = ctl.handle_event(event);
        let dragging = match ctl.drag_state() {
            DragState::Idle => None,
            DragState::DraggingCorner(i) => Some(crate::geometry::CORNER_LABELS[i].to_string()),
            DragState::DraggingQuad => Some("quad".to_string()),
        };
        PointerResponse {
            repaint: response == EventResponse::Repaint,
            dragging,
        }
    })
    .await;
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Deserialize)]
struct HitQuery {
    x: f64,
    y: f64,
}

#[derive(Serialize)]
struct HitResponse {
    corner: Option<usize>,
    inside: bool,
    cursor: &'static str,
}

async fn hit_test(State(state): State<Arc<AppState>>, Query(q): Query<HitQuery>) -> Json<HitResponse> {
    let target = state.controller.lock().hit_test(Point::new(q.x, q.y));
    Json(HitResponse {
        corner: match target {
            HitTarget::Corner(i) => Some(i),
            _ => None,
        },
        inside: target != HitTarget::Outside,
        cursor: target.cursor_hint(),
    })
}

async fn get_controls(State(state): State<Arc<AppState>>) -> Json<RenderControls> {
    Json(state.controller.lock().session().controls)
}

async fn set_controls(
    State(state): State<Arc<AppState>>,
    Json(controls): Json<RenderControls>,
) -> Json<RenderControls> {
    let mut ctl = state.controller.lock();
    ctl.set_controls(controls);
    Json(ctl.session().controls)
}

#[derive(Deserialize)]
struct PpiRequest {
    ppi: f64,
}

async fn set_ppi(State(state): State<Arc<AppState>>, Json(req): Json<PpiRequest>) -> Response {
    let result = blocking(move || {
        let mut ctl = state.controller.lock();
        match ctl.set_pixels_per_inch(req.ppi) {
            EventResponse::Repaint => Some(calibration_response(&ctl)),
            EventResponse::Unchanged => None,
        }
    })
    .await;
    match result {
        Ok(Some(cal)) => Json(cal).into_response(),
        Ok(None) => (StatusCode::CONFLICT, "No calibration yet").into_response(),
        Err(resp) => resp,
    }
}

async fn get_scale(State(state): State<Arc<AppState>>) -> Response {
    match blocking(move || ScaleModel::load(state.store.as_ref())).await {
        Ok(scale) => Json(scale).into_response(),
        Err(resp) => resp,
    }
}

async fn set_scale(State(state): State<Arc<AppState>>, Json(scale): Json<ScaleModel>) -> Response {
    match blocking(move || scale.store(state.store.as_ref())).await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(resp) => resp,
    }
}

/// Accept a new design as a data URL or raw image bytes
async fn set_source(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let result = blocking(move || {
        let image = match decode_any(&body) {
            Ok(img) => img,
            Err(e) => {
                debug!("Rejected source upload: {}", e);
                return Err(e);
            }
        };

        // Keep it as the last export so a restart picks it up again
        match encode_data_url(&image) {
            Ok(url) => {
                if let Err(e) = state.store.set(EXPORT_KEY, &url) {
                    warn!("Failed to persist design: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode design for storage: {}", e),
        }

        let mut ctl = state.controller.lock();
        ctl.load_source(image);
        Ok(calibration_response(&ctl))
    })
    .await;
    match result {
        Ok(Ok(cal)) => Json(cal).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(resp) => resp,
    }
}

async fn render_png(state: Arc<AppState>, mode: RenderMode) -> Response {
    let snapshot = state.snapshot();
    let result = tokio::task::spawn_blocking(move || {
        let (img, outcome) = render(&snapshot, mode);
        encode_png(&img).map(|png| (png, outcome))
    })
    .await;

    match result {
        Ok(Ok((png, outcome))) => {
            let status = match outcome {
                RenderOutcome::Rendered(_) => "rendered",
                RenderOutcome::Placeholder => "placeholder",
            };
            let mut response = (
                [
                    (header::CONTENT_TYPE, "image/png"),
                    (header::HeaderName::from_static("x-render-outcome"), status),
                ],
                png,
            )
                .into_response();
            if mode == RenderMode::Export && outcome != RenderOutcome::Placeholder {
                response.headers_mut().insert(
                    header::CONTENT_DISPOSITION,
                    header::HeaderValue::from_static("attachment; filename=\"projector-ready.png\""),
                );
            }
            response
        }
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Preview frame with calibration overlays
async fn get_frame(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    render_png(state, RenderMode::Preview).await
}

/// Projector-ready frame, no overlays
async fn get_export(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let has_source = state.controller.lock().session().source.is_some();
    if !has_source {
        return (StatusCode::NOT_FOUND, PLACEHOLDER_MESSAGE).into_response();
    }
    render_png(state, RenderMode::Export).await
}
