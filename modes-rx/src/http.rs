//! HTTP server — aircraft JSON for the web front-end plus static files.
//!
//! `GET /` redirects to the map page; the data endpoints serve the
//! tracker's JSON with a wide-open CORS header so the map can be hosted
//! anywhere; every other GET is resolved against `web_root`.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::net::Service;
use crate::router::{now_ms, App};

/// Milliseconds between front-end refreshes, reported in receiver.json.
const JSON_REFRESH_MS: u64 = 1000;

pub fn build_router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any);

    Router::new()
        .route("/", get(root_redirect))
        .route("/data.json", get(data_json))
        .route("/data/aircraft.json", get(aircraft_json))
        .route("/chunks/chunks.json", get(aircraft_json))
        .route("/data/receiver.json", get(receiver_json))
        .fallback(get(static_file))
        .layer(cors)
        .with_state(app)
}

/// Bind and serve until the process exits.
pub async fn serve(app: Arc<App>, port: u16) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            app.net.store_error(Service::Http, &e.to_string());
            tracing::warn!("HTTP server: cannot bind {addr}: {e}");
            return;
        }
    };
    info!("HTTP server listening on http://{addr}");

    let router = build_router(app);
    if let Err(e) = axum::serve(listener, router).await {
        tracing::warn!("HTTP server stopped: {e}");
    }
}

/// GET / — permanent redirect to the configured web page.
async fn root_redirect(State(app): State<Arc<App>>) -> Response {
    let location = format!("/{}", app.settings.cli.web_page);
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, location)],
    )
        .into_response()
}

/// GET /data.json — the basic aircraft array.
async fn data_json(State(app): State<Arc<App>>) -> Response {
    app.http_requests.fetch_add(1, Ordering::Relaxed);
    let tracker = app.tracker.lock().unwrap();
    Json(tracker.aircraft_json(false, now_ms())).into_response()
}

/// GET /data/aircraft.json and /chunks/chunks.json — extended form.
async fn aircraft_json(State(app): State<Arc<App>>) -> Response {
    app.http_requests.fetch_add(1, Ordering::Relaxed);
    let tracker = app.tracker.lock().unwrap();
    Json(tracker.aircraft_json(true, now_ms())).into_response()
}

/// GET /data/receiver.json — receiver description for the front-end.
/// Lat/lon are 0 when no home position is configured.
async fn receiver_json(State(app): State<Arc<App>>) -> Response {
    app.http_requests.fetch_add(1, Ordering::Relaxed);
    let (lat, lon) = match app.settings.home_pos {
        Some(pos) => (pos.lat, pos.lon),
        None => (0.0, 0.0),
    };
    let history = app.history.lock().unwrap().len();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "refresh": JSON_REFRESH_MS,
        "history": history,
        "lat": lat,
        "lon": lon,
    }))
    .into_response()
}

/// Any other GET — a history snapshot or a file under `web_root`.
async fn static_file(State(app): State<Arc<App>>, uri: Uri) -> Response {
    if let Some(index) = history_index(uri.path()) {
        let history = app.history.lock().unwrap();
        return match history.get(index) {
            Some(snapshot) => Json(snapshot.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let Some(rel) = sanitize_path(uri.path()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let full = app.settings.cli.web_root.join(rel);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let mime = content_type(&full);
            ([(header::CONTENT_TYPE, mime)], Body::from(bytes)).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Index of a `/data/history_N.json` request, if the path is one.
fn history_index(path: &str) -> Option<usize> {
    path.strip_prefix("/data/history_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Turn a request path into a safe relative path, or `None` when it tries
/// to escape the web root.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let rel = Path::new(trimmed);
    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(rel.to_path_buf())
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("svg") => "image/svg+xml",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
