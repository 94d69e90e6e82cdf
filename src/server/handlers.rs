use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use crate::listing::LocalizationInput;
use crate::session::SessionSnapshot;
use crate::settings;

use super::actions::{
    build_assistant, decode_upload, extract_into_session, label_file_name,
    render_label_into_session, stored_label, translate_into_session, undo_extraction,
};
use super::error::ServerError;
use super::models::{KeywordsRequest, LabelRequest, LabelResponse, SessionCreated, TranslateRequest};
use super::page::render_index;
use super::state::ServerState;

pub async fn run_server(settings: settings::Settings, addr: String) -> Result<()> {
    let state = Arc::new(ServerState::new(settings));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address: {}", addr))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) fn router(state: Arc<ServerState>) -> Router {
    let body_limit = state.settings.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(session_snapshot))
        .route("/api/sessions/:id/keywords", post(keywords))
        .route("/api/sessions/:id/keywords/undo", post(keywords_undo))
        .route("/api/sessions/:id/translate", post(translate))
        .route("/api/sessions/:id/label", post(label))
        .route("/api/sessions/:id/label.png", get(label_png))
        .route("/api/sessions/:id/label.pdf", get(label_pdf))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn index(State(state): State<Arc<ServerState>>) -> Result<Html<String>, ServerError> {
    Ok(Html(render_index(&state.settings)?))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    let origin = same_origin(req.headers());
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut(), origin);
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut(), origin);
    Ok(response)
}

/// The request's `Origin` when it names this server. Other origins get no
/// CORS grant, so pages on other sites cannot read session data.
fn same_origin(headers: &HeaderMap) -> Option<HeaderValue> {
    let origin = headers.get(header::ORIGIN)?;
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let value = origin.to_str().ok()?;
    let authority = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))?;
    authority
        .eq_ignore_ascii_case(host)
        .then(|| origin.clone())
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: Option<HeaderValue>) {
    headers.insert(header::VARY, HeaderValue::from_static("origin"));
    let Some(origin) = origin else {
        return;
    };
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn create_session(State(state): State<Arc<ServerState>>) -> Json<SessionCreated> {
    Json(SessionCreated {
        session_id: state.sessions.create(),
    })
}

async fn session_snapshot(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ServerError> {
    state
        .sessions
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| ServerError::session_not_found(&id))
}

async fn keywords(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(payload): Json<KeywordsRequest>,
) -> Result<Json<SessionSnapshot>, ServerError> {
    if !state.sessions.contains(&id) {
        return Err(ServerError::session_not_found(&id));
    }
    let data = decode_upload(
        payload.data_base64.as_deref(),
        payload.data_mime.as_deref(),
        payload.data_name.as_deref(),
    )?
    .ok_or_else(|| ServerError::bad_request("data_base64 is required"))?;
    let assistant = build_assistant(
        &state.settings,
        payload.model.as_deref(),
        payload.key.as_deref(),
    )?;
    let ocr = payload.ocr.unwrap_or(false);
    extract_into_session(&assistant, &state.sessions, &id, data, ocr)
        .await
        .map(Json)
}

async fn keywords_undo(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ServerError> {
    undo_extraction(&state.sessions, &id).map(Json)
}

async fn translate(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(payload): Json<TranslateRequest>,
) -> Result<Json<SessionSnapshot>, ServerError> {
    if !state.sessions.contains(&id) {
        return Err(ServerError::session_not_found(&id));
    }
    let data = decode_upload(
        payload.data_base64.as_deref(),
        payload.data_mime.as_deref(),
        payload.data_name.as_deref(),
    )?;
    let input = LocalizationInput {
        text: payload.text.unwrap_or_default(),
        data,
        ocr: payload.ocr.unwrap_or(false),
    };
    if input.text.trim().is_empty() && input.data.is_none() {
        return Err(ServerError::bad_request(
            "nothing to translate: provide text or an image",
        ));
    }
    let assistant = build_assistant(
        &state.settings,
        payload.model.as_deref(),
        payload.key.as_deref(),
    )?;
    translate_into_session(&assistant, &state.sessions, &id, input)
        .await
        .map(Json)
}

async fn label(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(payload): Json<LabelRequest>,
) -> Result<Json<LabelResponse>, ServerError> {
    render_label_into_session(state.labels.clone(), &state.sessions, &id, payload)
        .await
        .map(Json)
}

async fn label_png(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response<Body>, ServerError> {
    let label = stored_label(&state.sessions, &id)?;
    let name = label_file_name(&label, "png");
    download(label.png, "image/png", &name)
}

async fn label_pdf(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response<Body>, ServerError> {
    let label = stored_label(&state.sessions, &id)?;
    let name = label_file_name(&label, "pdf");
    let renderer = state.labels.clone();
    let pdf = tokio::task::spawn_blocking(move || renderer.render_pdf(&label))
        .await
        .map_err(|err| ServerError::internal(format!("label task failed: {}", err)))??;
    download(pdf, "application/pdf", &name)
}

fn download(bytes: Vec<u8>, mime: &'static str, file_name: &str) -> Result<Response<Body>, ServerError> {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .map_err(|err| ServerError::internal(err.to_string()))?;
    let mut response = Response::new(Body::from(bytes));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::{Value, json};

    async fn spawn(settings: Settings) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(ServerState::new(settings)));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn create_session(client: &reqwest::Client, base: &str) -> String {
        let created: Value = client
            .post(format!("{}/api/sessions", base))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        created["session_id"].as_str().unwrap().to_string()
    }

    fn png_upload(size: usize) -> String {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
        bytes.resize(size, 0);
        format!("data:image/png;base64,{}", BASE64.encode(bytes))
    }

    #[tokio::test]
    async fn sessions_are_created_and_unknown_ids_are_not_found() {
        let base = spawn(Settings::default()).await;
        let client = reqwest::Client::new();
        let id = create_session(&client, &base).await;

        let response = client
            .get(format!("{}/api/sessions/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let snapshot: Value = response.json().await.unwrap();
        assert_eq!(snapshot["session_id"], id.as_str());
        assert_eq!(snapshot["history_depth"], 0);

        let response = client
            .get(format!("{}/api/sessions/missing", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "session not found: missing");

        let index = client.get(&base).send().await.unwrap();
        assert_eq!(index.status(), reqwest::StatusCode::OK);
        assert!(index.text().await.unwrap().contains("data-tab=\"label\""));
    }

    #[tokio::test]
    async fn undo_without_history_conflicts() {
        let base = spawn(Settings::default()).await;
        let client = reqwest::Client::new();
        let id = create_session(&client, &base).await;
        let response = client
            .post(format!("{}/api/sessions/{}/keywords/undo", base, id))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "nothing to undo");
    }

    #[tokio::test]
    async fn label_renders_and_downloads() {
        let base = spawn(Settings::default()).await;
        let client = reqwest::Client::new();
        let id = create_session(&client, &base).await;

        let before = client
            .get(format!("{}/api/sessions/{}/label.png", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(before.status(), reqwest::StatusCode::NOT_FOUND);

        let invalid = client
            .post(format!("{}/api/sessions/{}/label", base, id))
            .json(&json!({"sku": "", "title": "box"}))
            .send()
            .await
            .unwrap();
        assert_eq!(invalid.status(), reqwest::StatusCode::BAD_REQUEST);

        let response = client
            .post(format!("{}/api/sessions/{}/label", base, id))
            .json(&json!({"sku": "LXU-001", "title": "LxU 접이식 수납함", "spec_option": "그레이"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let label: Value = response.json().await.unwrap();
        assert_eq!((label["width"].as_u64(), label["height"].as_u64()), (Some(591), Some(236)));

        let png = client
            .get(format!("{}/api/sessions/{}/label.png", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(png.status(), reqwest::StatusCode::OK);
        assert_eq!(png.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            png.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"label-LXU-001.png\""
        );
        let bytes = png.bytes().await.unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(BASE64.encode(&bytes), label["png_base64"].as_str().unwrap());

        let pdf = client
            .get(format!("{}/api/sessions/{}/label.pdf", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(pdf.status(), reqwest::StatusCode::OK);
        assert!(pdf.bytes().await.unwrap().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn uploads_larger_than_two_megabytes_reach_the_handler() {
        let base = spawn(Settings::default()).await;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/api/sessions/missing/keywords", base))
            .json(&json!({"data_base64": png_upload(3_000_000), "data_name": "detail.png"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let mut settings = Settings::default();
        settings.max_upload_bytes = 4096;
        let base = spawn(settings).await;
        let response = client
            .post(format!("{}/api/sessions/missing/keywords", base))
            .json(&json!({"data_base64": png_upload(8192)}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn cors_is_granted_to_the_server_origin_only() {
        let base = spawn(Settings::default()).await;
        let client = reqwest::Client::new();

        let own = client
            .request(reqwest::Method::OPTIONS, format!("{}/api/sessions", base))
            .header("origin", &base)
            .send()
            .await
            .unwrap();
        assert_eq!(own.status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(own.headers()["access-control-allow-origin"], base.as_str());

        let foreign = client
            .get(format!("{}/health", base))
            .header("origin", "https://evil.example")
            .send()
            .await
            .unwrap();
        assert_eq!(foreign.status(), reqwest::StatusCode::OK);
        assert!(foreign.headers().get("access-control-allow-origin").is_none());
    }
}
