//! HTTP endpoints.
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /` | Redirect to `/videos` |
//! | `GET /videos` | HTML page with a player per `.m3u8` playlist |
//! | `GET /list` | HTML page listing playlists and raw segments |
//! | `GET /raw/{file}` | Serves one `.m3u8` or `.ts` file from the root |
//! | `GET /mpjpeg` | Live `multipart/x-mixed-replace` MJPEG stream |
//! | `GET /jpeg` | One current frame |

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio_util::io::ReaderStream;

use crate::state::ServerState;

const VIDEOS_HTML: &str = include_str!("../static/videos.html");
const LIST_HTML: &str = include_str!("../static/list.html");

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Create the router with all endpoints.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/videos", get(videos_handler))
        .route("/list", get(list_handler))
        .route("/raw/{file}", get(raw_handler))
        .route("/mpjpeg", get(mpjpeg_handler))
        .route("/jpeg", get(jpeg_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "videos")])
}

async fn not_found(uri: axum::http::Uri) -> impl IntoResponse {
    tracing::warn!(path = %uri.path(), "http 404");
    (StatusCode::NOT_FOUND, "Not found")
}

/// Lists files under the root with one of the given suffixes, sorted.
fn list_media(state: &ServerState, suffixes: &[&str]) -> Vec<String> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&state.root) {
        for entry in entries.flatten() {
            if let Ok(n) = entry.file_name().into_string() {
                if suffixes.iter().any(|s| n.ends_with(s)) {
                    files.push(n);
                }
            }
        }
    }
    files.sort();
    files
}

/// Renders a page with the file list injected inline, saving the page an API
/// round trip on load.
fn page_with_data(page: &str, files: Vec<String>) -> impl IntoResponse {
    let data = serde_json::json!({ "files": files });
    let body = format!("{page}<script>'use strict';const data = {data};</script>");
    ([(header::CACHE_CONTROL, NO_CACHE)], Html(body))
}

async fn videos_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    page_with_data(VIDEOS_HTML, list_media(&state, &[".m3u8"]))
}

async fn list_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    page_with_data(LIST_HTML, list_media(&state, &[".m3u8", ".ts"]))
}

/// Only bare playlist or segment filenames may be served.
fn is_valid_media_name(f: &str) -> bool {
    if f.contains('/') || f.contains('\\') || f.contains("..") {
        return false;
    }
    f.ends_with(".m3u8") || f.ends_with(".ts")
}

async fn raw_handler(
    Path(file): Path<String>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    if !is_valid_media_name(&file) {
        tracing::warn!(%file, "invalid raw path");
        return (StatusCode::NOT_FOUND, "Invalid path").into_response();
    }
    let path = state.root.join(&file);
    let f = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(err) => {
            tracing::warn!(%file, %err, "raw open failed");
            return (StatusCode::NOT_FOUND, "Not found").into_response();
        }
    };
    // Segments are immutable once written and may cache for a day; playlists
    // get rewritten in place and must not.
    let (content_type, cache) = if file.ends_with(".m3u8") {
        ("application/vnd.apple.mpegurl", NO_CACHE)
    } else {
        ("video/mp2t", "public, max-age=86400")
    };
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache),
        ],
        Body::from_stream(ReaderStream::new(f)),
    )
        .into_response()
}

/// Relays the tee as a fresh multipart stream, preserving each part's
/// original headers. Runs until the client disconnects or the tee shuts
/// down.
async fn mpjpeg_handler(State(state): State<Arc<ServerState>>) -> Response {
    let sub = state.tee.subscribe();
    let boundary = format!("{:032x}", rand::random::<u128>());
    let stream = futures::stream::unfold(sub, {
        let boundary = boundary.clone();
        move |mut sub| {
            let boundary = boundary.clone();
            async move {
                let part = sub.recv().await?;
                let mut buf = Vec::with_capacity(part.body.len() + 256);
                buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                for (k, v) in &part.headers {
                    buf.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
                }
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(&part.body);
                buf.extend_from_slice(b"\r\n");
                Some((Ok::<_, std::convert::Infallible>(Bytes::from(buf)), sub))
            }
        }
    });
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace;boundary={boundary}"),
            ),
            (header::CONNECTION, "close".to_string()),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Serves a single current frame, waiting for one if none has arrived yet.
async fn jpeg_handler(State(state): State<Arc<ServerState>>) -> Response {
    let mut sub = state.tee.subscribe();
    match sub.recv().await {
        Some(part) => {
            let content_type = part.header("Content-Type").unwrap_or("image/jpeg").to_string();
            ([(header::CONTENT_TYPE, content_type)], part.body).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "No frame available").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mjpeg_tee::MimeTee;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn fixture() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(ServerState::new(dir.path().to_path_buf(), MimeTee::new()));
        let app = router(state);
        (dir, app)
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let res = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        res.status()
    }

    #[test]
    fn test_media_name_validation() {
        assert!(is_valid_media_name("2024-01-01T00-00-00.m3u8"));
        assert!(is_valid_media_name("2024-01-01T00-00-00.ts"));
        assert!(!is_valid_media_name("../etc/passwd"));
        assert!(!is_valid_media_name("a/b.ts"));
        assert!(!is_valid_media_name("a\\b.ts"));
        assert!(!is_valid_media_name("notes.txt"));
        assert!(!is_valid_media_name("..m3u8"));
    }

    #[tokio::test]
    async fn test_index_redirects_to_videos() {
        let (_dir, app) = fixture();
        let res = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "videos");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (_dir, app) = fixture();
        assert_eq!(get_status(app, "/nope").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_raw_rejects_traversal_and_other_extensions() {
        let (dir, app) = fixture();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();
        assert_eq!(
            get_status(app.clone(), "/raw/secret.txt").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(app.clone(), "/raw/..%2Fsecret.ts").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(app, "/raw/missing.ts").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_raw_serves_segment_with_cache_headers() {
        let (dir, app) = fixture();
        std::fs::write(dir.path().join("2024-01-01T00-00-00.ts"), b"segment").unwrap();
        let res = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/raw/2024-01-01T00-00-00.ts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(res.headers()[header::CACHE_CONTROL], "public, max-age=86400");
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"segment");
    }

    #[tokio::test]
    async fn test_videos_page_injects_playlists() {
        let (dir, app) = fixture();
        std::fs::write(dir.path().join("2024-01-01T00-00-00.m3u8"), b"#EXTM3U\n").unwrap();
        std::fs::write(dir.path().join("2024-01-01T00-00-00.ts"), b"x").unwrap();
        let res = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/videos")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#"const data = {"files":["2024-01-01T00-00-00.m3u8"]}"#));
    }

    #[tokio::test]
    async fn test_list_page_includes_segments() {
        let (dir, app) = fixture();
        std::fs::write(dir.path().join("2024-01-01T00-00-00.ts"), b"x").unwrap();
        let res = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/list")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("2024-01-01T00-00-00.ts"));
    }
}
