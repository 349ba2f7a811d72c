//! HTTP request handlers: scrape, exporter telemetry, and the landing page.

use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use atlas_exporter_core::metrics::TEXT_CONTENT_TYPE;

use crate::state::AppState;

pub(crate) fn create_router(state: AppState) -> Router {
    let scrape_path = state.scrape_path.clone();
    let telemetry_path = state.telemetry_path.clone();

    Router::new()
        .route(&scrape_path, get(handle_scrape))
        .route(&telemetry_path, get(handle_telemetry))
        .route("/", get(handle_landing))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
}

// ============================================================
// Scrape
// ============================================================

/// Runs one collection cycle and returns its samples.
///
/// Upstream failures never fail the request; they show up as `up` and the
/// client error counter. Only a snapshot that cannot be built or encoded
/// yields a 500.
pub(crate) async fn handle_scrape(State(state): State<AppState>) -> Response {
    let start = Instant::now();
    debug!(project = %state.project_id, "scrape started");

    let result = state
        .collector()
        .collect()
        .await
        .and_then(|snapshot| snapshot.encode());

    let elapsed = start.elapsed().as_secs_f64();
    state.metrics.observe_duration(elapsed);
    debug!(duration_secs = elapsed, "scrape finished");

    match result {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render scrape");
            state.metrics.inc_request_errors();
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================
// Telemetry
// ============================================================

pub(crate) async fn handle_telemetry(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render exporter metrics");
            state.metrics.inc_request_errors();
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================
// Landing page
// ============================================================

pub(crate) async fn handle_landing(State(state): State<AppState>) -> Html<String> {
    Html(landing_page(&state.telemetry_path, &state.scrape_path))
}

fn landing_page(telemetry_path: &str, scrape_path: &str) -> String {
    format!(
        r#"<html>
<head><title>MongoDB Atlas Prometheus Exporter</title></head>
<body>
<h1>MongoDB Atlas Prometheus Exporter</h1>
<p>Version {}</p>
<p><a href="{}">Exporter Metrics</a></p>
<p><a href="{}">API Scraped Metrics</a></p>
</body>
</html>
"#,
        atlas_exporter_core::VERSION,
        telemetry_path,
        scrape_path
    )
}
