//! Browser UI: one page, three actions.
//!
//! Each load of `/` mints a new session token and bakes it into the page,
//! so every open tab is its own session. The page talks to three JSON
//! endpoints that answer `{"message": ...}`; errors carry a non-2xx status
//! with the message rendered the same way the CLI prints it.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json,
    Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit,
        Multipart,
        Path,
        State,
        multipart::MultipartError,
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    controller::SessionController,
    error::{self, Error},
    session_id::SessionId,
    session_store::Upload,
};

const PAGE: &str = include_str!("web/index.html");
const SESSION_PLACEHOLDER: &str = "__SESSION_ID__";

/// Sweeps never run more often than this.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Sweeps never wait longer than this.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    controller: Arc<SessionController>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

/// A controller error on its way to the browser.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidSession(_)
            | Error::InvalidFileName(_)
            | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error::user_message(&err),
        }
    }
}

/// Extractor rejections keep their status but answer in the same JSON shape.
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: format!("Error: {}", err.body_text()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self {
            status: err.status(),
            message: format!("Error: {}", err.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(MessageResponse {
                message: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<MessageResponse>, ApiError>;

fn message(message: String) -> Json<MessageResponse> {
    Json(MessageResponse { message })
}

pub fn router(controller: Arc<SessionController>) -> Router {
    let body_limit = controller.config().max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/api/sessions/{id}/files", post(add_files))
        .route("/api/sessions/{id}/clear", post(clear_session))
        .route("/api/sessions/{id}/search", post(search))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState { controller })
}

async fn index() -> Html<String> {
    let id = SessionId::generate();
    debug!(session = id.short(), "new page session");
    Html(PAGE.replace(SESSION_PLACEHOLDER, id.as_str()))
}

async fn add_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult {
    let id: SessionId = id.parse()?;

    let mut files: Vec<(String, Bytes)> = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        files.push((name, data));
    }

    let controller = state.controller.clone();
    run_blocking(move || {
        let uploads: Vec<_> = files
            .iter()
            .map(|(name, data)| Upload::new(name.as_str(), &data[..]))
            .collect();
        controller.add_files(&id, uploads)
    })
    .await
}

async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: SessionId = id.parse()?;
    let controller = state.controller.clone();
    run_blocking(move || controller.delete_files(&id)).await
}

async fn search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult {
    let id: SessionId = id.parse()?;
    let Json(request) = request?;
    let controller = state.controller.clone();
    run_blocking(move || controller.search(&id, &request.query)).await
}

/// Run a controller call off the async workers.
async fn run_blocking(
    f: impl FnOnce() -> error::Result<String> + Send + 'static,
) -> ApiResult {
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(text)) => Ok(message(text)),
        Ok(Err(e)) => {
            warn!(error = %e, "request failed");
            Err(e.into())
        }
        Err(e) => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Error: {e}"),
        }),
    }
}

/// How often idle sessions are swept for a given time-to-live.
pub fn sweep_interval(idle_ttl: Duration) -> Duration {
    (idle_ttl / 4).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
}

/// Periodically delete sessions idle for longer than the configured TTL.
pub fn spawn_sweeper(
    controller: Arc<SessionController>,
) -> tokio::task::JoinHandle<()> {
    let ttl = controller.config().idle_ttl;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval(ttl));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let controller = controller.clone();
            match tokio::task::spawn_blocking(move || controller.evict_idle(ttl))
                .await
            {
                Ok(Ok(evicted)) if !evicted.is_empty() => {
                    info!(count = evicted.len(), "swept idle sessions");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "session sweep failed"),
                Err(e) => warn!(error = %e, "session sweep panicked"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

pub fn run_server(controller: SessionController, bind: SocketAddr) -> error::Result<()> {
    let controller = Arc::new(controller);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| Error::Config(format!("cannot listen on {bind}: {e}")))?;
        info!(
            address = %bind,
            sessions_dir = %controller.store().root().display(),
            "serving"
        );

        let sweeper = spawn_sweeper(controller.clone());
        let result = axum::serve(listener, router(controller))
            .with_graceful_shutdown(shutdown_signal())
            .await;
        sweeper.abort();

        result.map_err(|e| Error::Config(format!("HTTP server error: {e}")))
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, header},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{config::Config, session_store::SessionStore};

    const BOUNDARY: &str = "docsift-test-boundary";

    fn app(root: &std::path::Path, config: Config) -> Router {
        router(Arc::new(SessionController::new(SessionStore::new(root), config)))
    }

    fn multipart_body(files: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn upload_request(id: &str, files: &[(&str, &str)]) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/api/sessions/{id}/files"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(files)))
            .unwrap()
    }

    fn search_request(id: &str, query: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/api/sessions/{id}/search"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "query": query }).to_string()))
            .unwrap()
    }

    fn clear_request(id: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/api/sessions/{id}/clear"))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let (status, body) = send(app, request).await;
        let parsed: MessageResponse = serde_json::from_str(&body).unwrap();
        (status, parsed.message)
    }

    fn page_token(page: &str) -> String {
        let start = page.find("data-session=\"").unwrap() + "data-session=\"".len();
        page[start..start + 32].to_string()
    }

    #[tokio::test]
    async fn each_page_load_gets_its_own_session() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Config::default());

        let request = || Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, first) = send(&app, request()).await;
        let (_, second) = send(&app, request()).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!first.contains(SESSION_PLACEHOLDER));
        let (a, b) = (page_token(&first), page_token(&second));
        assert!(a.parse::<SessionId>().is_ok());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn upload_search_clear_flow() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Config::default());
        let id = SessionId::generate();
        let id = id.as_str();

        let (status, msg) = send_json(
            &app,
            upload_request(
                id,
                &[("doc.txt", "The quick brown fox jumps over the lazy dog.")],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(msg, "1 file(s) added.");

        let (status, msg) = send_json(&app, search_request(id, "brown fox")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(msg.contains("brown fox"));
        assert!(msg.contains("**File:** doc.txt"));

        let (status, msg) = send_json(&app, clear_request(id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(msg, "All files were deleted.");

        let (_, msg) = send_json(&app, search_request(id, "brown fox")).await;
        assert_eq!(msg, "No passages found.");
    }

    #[tokio::test]
    async fn multiple_files_in_one_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Config::default());
        let id = SessionId::generate();

        let (_, msg) = send_json(
            &app,
            upload_request(id.as_str(), &[("a.txt", "alpha"), ("b.txt", "beta")]),
        )
        .await;
        assert_eq!(msg, "2 file(s) added.");
    }

    #[tokio::test]
    async fn invalid_session_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Config::default());

        let (status, msg) = send_json(&app, search_request("not-a-token", "q")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(msg.starts_with("Error: invalid session id"));
    }

    #[tokio::test]
    async fn hidden_file_name_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Config::default());
        let id = SessionId::generate();

        let (status, msg) =
            send_json(&app, upload_request(id.as_str(), &[(".env", "secret")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(msg.starts_with("Error: invalid file name"));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            max_upload_bytes: 64,
            ..Config::default()
        };
        let app = app(tmp.path(), config);
        let id = SessionId::generate();
        let big = "x".repeat(1024);

        let (status, msg) =
            send_json(&app, upload_request(id.as_str(), &[("big.txt", &big)])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(msg.starts_with("Error: "));
    }

    #[tokio::test]
    async fn malformed_search_body_answers_in_json() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Config::default());
        let id = SessionId::generate();

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/sessions/{id}/search"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"question\": 1}"))
            .unwrap();
        let (status, msg) = send_json(&app, request).await;
        assert!(status.is_client_error());
        assert!(msg.starts_with("Error: "));
    }

    #[test]
    fn page_falls_back_to_plain_text_errors() {
        assert!(PAGE.contains("response.text()"));
    }

    #[test]
    fn sweep_interval_is_bounded() {
        assert_eq!(sweep_interval(Duration::ZERO), MIN_SWEEP_INTERVAL);
        assert_eq!(sweep_interval(Duration::from_secs(40)), Duration::from_secs(10));
        assert_eq!(
            sweep_interval(Duration::from_secs(24 * 60 * 60)),
            MAX_SWEEP_INTERVAL
        );
    }
}
