//! API Server module
//!
//! This module provides the HTTP API and the live web view for paper analyses.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::grid::Grid;
use crate::layout::layout;
use crate::models::{Analysis, AnalysisError, AnalysisId, AnalysisStatus, Core, Task};
use crate::provider::CompletionSource;
use crate::redact::redact_task;
use crate::render::{render_html, GRID_CSS, STANDARD_TOOLS};
use crate::worker::spawn_analysis;

/// Request to analyze a paper
#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default, alias = "paper_url")]
    pub paper_url: Option<String>,
}

/// Reply to an accepted analysis request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub analysis_id: AnalysisId,
    pub message: String,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub core: Core,
    pub source: Arc<dyn CompletionSource>,
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Helper function to map store results to Axum responses
fn map_core_result<T: Serialize>(result: Result<T, AnalysisError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => {
            let status = match e {
                AnalysisError::NotFound(_) => StatusCode::NOT_FOUND,
                AnalysisError::MissingPaperUrl => StatusCode::BAD_REQUEST,
                AnalysisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ApiResponse::<T>::error(e.to_string()))).into_response()
        }
    }
}

/// Builds the application router
pub fn router(state: AppState) -> Router {
    // CORS configuration; also answers preflight requests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/ui") }))
        // --- Analyses --- //
        .route("/analyze", post(analyze_handler))
        .route("/api/analyses", get(list_analyses_handler))
        .route("/api/analyses/:id", get(get_analysis_handler))
        .route("/api/analyses/:id/grid", get(get_grid_handler))
        // --- UI --- //
        .route("/ui", get(list_analyses_ui_handler))
        .route("/ui/:id", get(ui_handler))
        .route("/ui/events/:id", get(events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the API server
pub async fn serve(
    core: Core,
    source: Arc<dyn CompletionSource>,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let _ = tracing_subscriber::fmt::try_init();

    let app = router(AppState { core, source });

    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Grid for the most complete tree known for an analysis
fn analysis_grid(analysis: &Analysis) -> Option<Grid> {
    let forest: Vec<Task> = analysis.latest_reasoning()?.iter().map(redact_task).collect();
    layout(&forest)
}

// --- API Handlers --- //

async fn analyze_handler(
    State(state): State<AppState>,
    payload: Option<Json<AnalyzeRequest>>,
) -> impl IntoResponse {
    let paper_url = payload
        .and_then(|Json(request)| request.paper_url)
        .unwrap_or_default();

    let result = state.core.create_analysis(paper_url).map(|analysis_id| {
        spawn_analysis(state.core.clone(), state.source.clone(), analysis_id);
        AnalyzeResponse {
            analysis_id,
            message: "Paper analysis request received".to_string(),
        }
    });
    map_core_result(result)
}

async fn list_analyses_handler(State(state): State<AppState>) -> impl IntoResponse {
    map_core_result(Ok::<_, AnalysisError>(state.core.list_analyses()))
}

async fn get_analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    map_core_result(state.core.get_analysis(AnalysisId::new(id)))
}

async fn get_grid_handler(State(state): State<AppState>, Path(id): Path<u32>) -> impl IntoResponse {
    // `null` data means there is nothing to render yet
    let result = state
        .core
        .get_analysis(AnalysisId::new(id))
        .map(|analysis| analysis_grid(&analysis));
    map_core_result(result)
}

// --- UI and Event Handlers --- //

const UPDATE_EVENT: &str = "event: update\ndata: change\n\n";

async fn events_handler(State(state): State<AppState>, Path(id): Path<u32>) -> impl IntoResponse {
    let stream = analysis_events(state.core.subscribe(), AnalysisId::new(id));

    // Set headers for event stream
    let headers = [
        (
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        ),
        (
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        ),
    ];

    (headers, axum::body::Body::from_stream(stream))
}

/// One `update` event per change to the given analysis
fn analysis_events(
    receiver: broadcast::Receiver<AnalysisId>,
    id: AnalysisId,
) -> impl Stream<Item = Result<String, Infallible>> {
    futures::stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(updated) if updated == id => {
                    return Some((Ok(UPDATE_EVENT.to_string()), receiver));
                }
                Ok(_) => continue,
                // Some messages were missed; one of them may have been ours
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    return Some((Ok(UPDATE_EVENT.to_string()), receiver));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

async fn list_analyses_ui_handler(State(state): State<AppState>) -> impl IntoResponse {
    let analyses = state.core.list_analyses();
    let mut html = page_header("Paper analyses");

    html.push_str("<h1>Paper analyses</h1>");
    html.push_str(SUBMIT_FORM);
    if analyses.is_empty() {
        html.push_str("<p>No analyses yet. Submit one above or with <code>reasongrid analyze &lt;url&gt;</code></p>");
    } else {
        html.push_str("<ul class='analysis-list'>");
        for analysis in &analyses {
            html.push_str(&format!(
                "<li><a href=\"/ui/{}\">#{}</a> <span class='status status-{}'>{}</span> <span class='paper-url'>{}</span> <span class='created'>{}</span></li>",
                analysis.id,
                analysis.id,
                analysis.status,
                analysis.status,
                html_escape::encode_text(&analysis.paper_url),
                analysis.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        html.push_str("</ul>");
    }
    html.push_str(PAGE_FOOTER);
    Html(html)
}

async fn ui_handler(State(state): State<AppState>, Path(id): Path<u32>) -> impl IntoResponse {
    match state.core.get_analysis(AnalysisId::new(id)) {
        Ok(analysis) => Html(render_analysis_page(&analysis)).into_response(),
        Err(e @ AnalysisError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Html(format!("<h1>{}</h1>", e))).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to load analysis {} for UI: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("<h1>Error loading analysis {}: {}</h1>", id, e)),
            )
                .into_response()
        }
    }
}

// --- Template Rendering --- //

fn page_header(title: &str) -> String {
    format!(
        "{}<title>{}</title><style>{}{}</style></head><body><nav><a href='/ui'>All analyses</a></nav>",
        PAGE_HEAD,
        html_escape::encode_text(title),
        PAGE_CSS,
        GRID_CSS
    )
}

// Only http(s) URLs are rendered as links
fn is_web_url(url: &str) -> bool {
    let url = url.trim_start().to_ascii_lowercase();
    url.starts_with("http://") || url.starts_with("https://")
}

fn render_analysis_page(analysis: &Analysis) -> String {
    let mut html = page_header(&format!("Analysis #{}", analysis.id));

    html.push_str(&format!(
        "<h1>Analysis #{} <span class='status status-{}'>{}</span></h1>",
        analysis.id, analysis.status, analysis.status
    ));
    if is_web_url(&analysis.paper_url) {
        html.push_str(&format!(
            "<p class='paper-url'><a href=\"{}\">{}</a></p>",
            html_escape::encode_double_quoted_attribute(&analysis.paper_url),
            html_escape::encode_text(&analysis.paper_url)
        ));
    } else {
        html.push_str(&format!(
            "<p class='paper-url'>{}</p>",
            html_escape::encode_text(&analysis.paper_url)
        ));
    }

    html.push_str("<div class='stats'>");
    if let Some(tokens) = analysis.tokens_read {
        html.push_str(&format!("<span>Tokens read: {}</span>", tokens));
    }
    if let Some(snapshot) = &analysis.snapshot {
        html.push_str(&format!(
            "<span>Updates: {}</span><span>{}</span>",
            snapshot.iteration_count,
            if snapshot.is_streaming {
                "Streaming"
            } else {
                "Stream closed"
            }
        ));
    }
    html.push_str("</div>");

    if let Some(error) = &analysis.error {
        html.push_str(&format!(
            "<div class='error'>{}</div>",
            html_escape::encode_text(error)
        ));
    }

    match analysis_grid(analysis) {
        Some(grid) => html.push_str(&render_html(&grid, &STANDARD_TOOLS)),
        None if analysis.status == AnalysisStatus::Pending
            || analysis.status == AnalysisStatus::Processing =>
        {
            html.push_str("<p class='waiting'>Waiting for the first reasoning steps...</p>")
        }
        None => html.push_str("<p class='waiting'>Nothing to render.</p>"),
    }

    if let Some(answer) = analysis
        .result
        .as_ref()
        .and_then(|r| r.response.as_ref())
        .map(|r| r.answer.as_str())
        .filter(|a| !a.is_empty())
    {
        html.push_str(&format!(
            "<div class='answer'><h2>Answer</h2><pre>{}</pre></div>",
            html_escape::encode_text(answer)
        ));
    }

    // Embed the analysis id for the event stream script
    html.push_str(&format!(
        "<script>const CURRENT_ANALYSIS_ID = {};</script>",
        analysis.id
    ));
    html.push_str(EVENTS_SCRIPT);
    html.push_str(PAGE_FOOTER);
    html
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
"#;

const PAGE_CSS: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, 'Open Sans', 'Helvetica Neue', sans-serif;
            line-height: 1.6;
            color: #333;
            max-width: 1400px;
            margin: 0 auto;
            padding: 20px;
            background-color: #f7f9fc;
        }
        h1 {
            color: #2c3e50;
            border-bottom: 2px solid #3498db;
            padding-bottom: 10px;
        }
        .status {
            font-size: 14px;
            padding: 2px 8px;
            border-radius: 10px;
            color: white;
            background-color: #95a5a6;
        }
        .status-processing { background-color: #f39c12; }
        .status-completed { background-color: #2ecc71; }
        .status-failed { background-color: #e74c3c; }
        .analysis-list { list-style-type: none; padding-left: 0; }
        .analysis-list li { padding: 8px 0; border-bottom: 1px solid #eee; display: flex; gap: 10px; }
        .created { color: #7f8c8d; margin-left: auto; }
        .stats { display: flex; gap: 20px; color: #7f8c8d; margin-bottom: 20px; }
        .error { color: #c0392b; background: #fdecea; padding: 10px; border-radius: 5px; }
        .answer pre { white-space: pre-wrap; background: white; padding: 15px; border-radius: 8px; }
        .submit-form { display: flex; gap: 10px; margin-bottom: 20px; }
        .submit-form input { flex-grow: 1; padding: 6px; }
"#;

const SUBMIT_FORM: &str = r#"
    <form class="submit-form" id="submit-form">
        <input type="url" id="paper-url" placeholder="https://arxiv.org/abs/..." required>
        <button type="submit">Analyze</button>
    </form>
    <script>
        document.getElementById('submit-form').addEventListener('submit', async (event) => {
            event.preventDefault();
            const paperUrl = document.getElementById('paper-url').value;
            const response = await fetch('/analyze', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ paperUrl }),
            });
            const body = await response.json();
            if (body.success) {
                window.location.href = '/ui/' + body.data.analysisId;
            }
        });
    </script>
"#;

// EventSource for reactive refreshing
const EVENTS_SCRIPT: &str = r#"
    <script>
        let eventSource;

        function connectEvents() {
            eventSource = new EventSource('/ui/events/' + CURRENT_ANALYSIS_ID);

            eventSource.addEventListener('update', () => {
                window.location.reload();
            });

            eventSource.onerror = () => {
                eventSource.close();
                setTimeout(connectEvents, 3000);
            };
        }

        window.addEventListener('load', connectEvents);
        window.addEventListener('beforeunload', () => {
            if (eventSource) {
                eventSource.close();
            }
        });
    </script>
"#;

const PAGE_FOOTER: &str = "</body></html>";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisResult, ModelResponse, StreamSnapshot};
    use crate::provider::{ChunkStream, ProviderError};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use futures::StreamExt;
    use http_body_util::BodyExt; // for `collect`
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tower::ServiceExt; // for `oneshot`

    /// Streams one complete document in a single chunk
    struct OneShotSource;

    #[async_trait::async_trait]
    impl CompletionSource for OneShotSource {
        async fn open(&self, _paper_url: &str) -> Result<ChunkStream, ProviderError> {
            let content = json!({
                "reasoning": [{"thought": "read", "title": "Read paper", "conclusion": "ok"}],
                "answer": "done"
            })
            .to_string();
            let frame = format!(
                "data: {}\n\ndata: [DONE]\n\n",
                json!({"choices": [{"delta": {"content": content}}]})
            );
            Ok(Box::pin(futures::stream::iter(vec![Ok(frame.into_bytes())])))
        }
    }

    // Helper to create a test Core and Router
    fn setup_test_app() -> (Core, Router) {
        let core = Core::new();
        let app = router(AppState {
            core: core.clone(),
            source: Arc::new(OneShotSource),
        });
        (core, app)
    }

    // Helper to make requests and return the status and the raw envelope
    async fn request_json<T: DeserializeOwned + Serialize>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Body,
    ) -> (StatusCode, ApiResponse<T>) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        let envelope = serde_json::from_slice::<ApiResponse<T>>(&body_bytes).unwrap_or_else(|e| {
            panic!(
                "unparseable body ({}): {}",
                e,
                String::from_utf8_lossy(&body_bytes)
            )
        });
        (status, envelope)
    }

    async fn request_text(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    async fn wait_for_status(core: &Core, id: AnalysisId, status: AnalysisStatus) {
        for _ in 0..100 {
            if core.get_analysis(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("analysis {} never reached {}", id, status);
    }

    fn seed_snapshot(core: &Core, reasoning: Vec<Task>) -> AnalysisId {
        let id = core.create_analysis("https://arxiv.org/abs/1".to_string()).unwrap();
        core.record_progress(
            id,
            StreamSnapshot {
                content: Some(ModelResponse {
                    reasoning,
                    answer: String::new(),
                }),
                iteration_count: 3,
                is_streaming: true,
                raw_chars: 100,
            },
            50,
        )
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_analyze_requires_paper_url() {
        let (core, app) = setup_test_app();

        // 1. Missing field
        let (status, envelope): (_, ApiResponse<AnalyzeResponse>) =
            request_json(&app, "POST", "/analyze", Body::from("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("paperUrl is required"));

        // 2. Empty string
        let body = Body::from(json!({"paperUrl": ""}).to_string());
        let (status, _): (_, ApiResponse<AnalyzeResponse>) =
            request_json(&app, "POST", "/analyze", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // 3. No body at all
        let (status, _): (_, ApiResponse<AnalyzeResponse>) =
            request_json(&app, "POST", "/analyze", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(core.list_analyses().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_runs_to_completion() {
        let (core, app) = setup_test_app();

        // 1. Submit
        let body = Body::from(json!({"paperUrl": "https://arxiv.org/abs/2303.18223"}).to_string());
        let (status, envelope): (_, ApiResponse<AnalyzeResponse>) =
            request_json(&app, "POST", "/analyze", body).await;
        assert_eq!(status, StatusCode::OK);
        let accepted = envelope.data.expect("analysis id should be present");
        assert_eq!(accepted.message, "Paper analysis request received");
        let id = accepted.analysis_id;

        // 2. Worker finishes in the background
        wait_for_status(&core, id, AnalysisStatus::Completed).await;

        // 3. Record is served
        let (status, envelope): (_, ApiResponse<Analysis>) =
            request_json(&app, "GET", &format!("/api/analyses/{}", id), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let analysis = envelope.data.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Completed);
        assert_eq!(analysis.paper_url, "https://arxiv.org/abs/2303.18223");

        // 4. Grid is laid out from the final tree, redacted
        let (_, envelope): (_, ApiResponse<Grid>) =
            request_json(&app, "GET", &format!("/api/analyses/{}/grid", id), Body::empty())
                .await;
        let grid = envelope.data.unwrap();
        assert_eq!(grid.total_columns, 6);
        let node = grid.node(0, 1).unwrap();
        assert_eq!(node.title, "Read paper");
        assert_eq!(node.conclusion.as_deref(), Some(crate::redact::PRESENCE_MARKER));
    }

    #[tokio::test]
    async fn test_get_unknown_analysis() {
        let (_core, app) = setup_test_app();
        let (status, envelope): (_, ApiResponse<Analysis>) =
            request_json(&app, "GET", "/api/analyses/99999", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(envelope.error.as_deref(), Some("Analysis '99999' not found"));

        let (status, _): (_, ApiResponse<Grid>) =
            request_json(&app, "GET", "/api/analyses/99999/grid", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_grid_is_null_when_nothing_to_render() {
        let (core, app) = setup_test_app();
        let id = core.create_analysis("u".to_string()).unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/analyses/{}/grid", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(value, json!({"success": true, "data": null}));
    }

    #[tokio::test]
    async fn test_grid_from_streaming_snapshot() {
        let (core, app) = setup_test_app();
        let id = seed_snapshot(
            &core,
            vec![Task::new("root")
                .with_subtask(Task::new("a"))
                .with_subtask(Task::new("b"))],
        );

        let (_, envelope): (_, ApiResponse<Grid>) =
            request_json(&app, "GET", &format!("/api/analyses/{}/grid", id), Body::empty())
                .await;
        let grid = envelope.data.unwrap();
        assert_eq!(grid.row_count(), 2);
        assert_eq!(grid.node(0, 1).unwrap().subtask_count, 2);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let (core, app) = setup_test_app();
        let first = core.create_analysis("a".to_string()).unwrap();
        let second = core.create_analysis("b".to_string()).unwrap();

        let (_, envelope): (_, ApiResponse<Vec<Analysis>>) =
            request_json(&app, "GET", "/api/analyses", Body::empty()).await;
        let ids: Vec<AnalysisId> = envelope.data.unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_preflight_is_answered() {
        let (_core, app) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/analyze")
                    .header("Origin", "http://example.com")
                    .header("Access-Control-Request-Method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_ui_pages() {
        let (core, app) = setup_test_app();
        let id = seed_snapshot(&core, vec![Task::new("<b>bold</b> step")]);
        core.complete(
            id,
            AnalysisResult {
                response: Some(ModelResponse {
                    reasoning: vec![Task::new("<b>bold</b> step")],
                    answer: "It is novel".to_string(),
                }),
                raw: String::new(),
            },
            60,
        )
        .unwrap();

        let (status, html) = request_text(&app, "/ui").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains(&format!("href=\"/ui/{}\"", id)));
        assert!(html.contains("status-completed"));

        let (status, html) = request_text(&app, &format!("/ui/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("reasoning-grid"));
        assert!(html.contains("&lt;b&gt;bold&lt;/b&gt; step"));
        assert!(html.contains("It is novel"));
        assert!(html.contains("Tokens read: 60"));
        assert!(html.contains(&format!("const CURRENT_ANALYSIS_ID = {};", id)));

        let (status, html) = request_text(&app, "/ui/999999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(html.contains("not found"));
    }

    #[tokio::test]
    async fn test_ui_links_only_web_urls() {
        let (core, app) = setup_test_app();
        let script = core
            .create_analysis("javascript:alert(1)".to_string())
            .unwrap();
        let paper = core
            .create_analysis("HTTPS://arxiv.org/abs/2303.18223".to_string())
            .unwrap();

        let (_, html) = request_text(&app, &format!("/ui/{}", script)).await;
        assert!(!html.contains("href=\"javascript:"));
        assert!(html.contains("<p class='paper-url'>javascript:alert(1)</p>"));

        let (_, html) = request_text(&app, &format!("/ui/{}", paper)).await;
        assert!(html.contains("<a href=\"HTTPS://arxiv.org/abs/2303.18223\">"));
    }

    #[test]
    fn test_is_web_url() {
        assert!(is_web_url("https://arxiv.org/abs/1"));
        assert!(is_web_url("http://example.com"));
        assert!(!is_web_url("javascript:alert(1)"));
        assert!(!is_web_url("data:text/html,hi"));
        assert!(!is_web_url("arxiv.org/abs/1"));
    }

    #[tokio::test]
    async fn test_ui_waiting_message() {
        let (core, app) = setup_test_app();
        let id = core.create_analysis("u".to_string()).unwrap();
        let (_, html) = request_text(&app, &format!("/ui/{}", id)).await;
        assert!(html.contains("Waiting for the first reasoning steps"));
    }

    #[tokio::test]
    async fn test_events_only_for_watched_analysis() {
        let core = Core::new();
        let watched = core.create_analysis("a".to_string()).unwrap();
        let other = core.create_analysis("b".to_string()).unwrap();
        let mut events = Box::pin(analysis_events(core.subscribe(), watched));

        core.set_status(other, AnalysisStatus::Processing).unwrap();
        core.set_status(watched, AnalysisStatus::Processing).unwrap();

        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event, UPDATE_EVENT);
    }

    #[tokio::test]
    async fn test_events_endpoint_headers() {
        let (core, app) = setup_test_app();
        let id = core.create_analysis("a".to_string()).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/ui/events/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
    }
}
