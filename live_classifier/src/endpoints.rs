//! Endpoints of the viewer HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    extract::Query,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Extension, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};

use crate::display::ViewerState;

/// Parameters of a key press.
#[derive(Debug, Deserialize)]
pub struct KeyParams {
    key: String,
}

/// Build the viewer routes.
pub fn viewer_router(state: Arc<ViewerState>) -> Router {
    Router::new()
        .route("/", get(viewer_page))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(annotated_stream))
        .route("/key", post(press_key))
        .layer(Extension(state))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Page showing the annotated stream and forwarding key presses.
pub async fn viewer_page(Extension(state): Extension<Arc<ViewerState>>) -> Html<String> {
    Html(render_viewer_page(&state.window_name))
}

// Endpoint of the annotated frame stream.
pub async fn annotated_stream(
    Extension(state): Extension<Arc<ViewerState>>,
) -> impl IntoResponse {
    log::info!("Stream of window {} requested", &state.window_name);

    // Subscribe to the broadcasted annotated frames.
    let stream = frame_parts(state.subscribe());

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Stream of multipart frames that skips frames a slow viewer missed.
pub fn frame_parts(
    rx: broadcast::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    BroadcastStream::from(rx).filter_map(|part| match part {
        Ok(part) => Some(Ok(part)),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            log::debug!("Viewer lagging, skipped {} frames", skipped);
            None
        }
    })
}

pub async fn press_key(
    Extension(state): Extension<Arc<ViewerState>>,
    Query(params): Query<KeyParams>,
) -> StatusCode {
    let mut chars = params.key.chars();
    match (chars.next(), chars.next()) {
        (Some(key), None) => {
            if state.press_key(key) {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::GONE
            }
        }
        // Named keys like `Shift` are ignored
        _ => StatusCode::BAD_REQUEST,
    }
}

fn render_viewer_page(window_name: &str) -> String {
    let title = escape_html(window_name);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body style="margin:0;background:#000">
<img src="/stream" alt="{title}">
<script>
document.addEventListener("keydown", (event) => {{
    fetch("/key?key=" + encodeURIComponent(event.key), {{ method: "POST" }});
}});
</script>
</body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_owned(),
            '>' => "&gt;".to_owned(),
            '&' => "&amp;".to_owned(),
            '"' => "&quot;".to_owned(),
            c => c.to_string(),
        })
        .collect()
}
