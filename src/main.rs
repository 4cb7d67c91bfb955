use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};

use dental_scan_api::config::Config;
use dental_scan_api::detection::{DetectionClient, DetectionError};
use dental_scan_api::extract::{self, ExtractionError};
use dental_scan_api::models::{ErrorResponse, SessionResponse, TermsForm, UploadResponse};
use dental_scan_api::response::ResponseValue;
use dental_scan_api::summary::{self, Summarizer};
use dental_scan_api::{terms, uploads};

const USER_AGENT: &str = "dental-scan-api/0.1";
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

struct AppState {
    config: Config,
    http: reqwest::Client,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    if config.roboflow_api_key.is_none() {
        tracing::warn!("ROBOFLOW_API_KEY not found in environment; uploads will fail");
    }

    let http = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .user_agent(USER_AGENT)
        .build()
        .unwrap();

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState { config, http });

    let app = Router::new()
        .route("/health", get(health))
        .route("/accept-terms", post(accept_terms))
        .route("/session", get(session))
        .route("/upload", post(upload))
        .route("/result", get(result))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

// ── Error response ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse { success: false, error: self.message };
        (self.status, Json(body)).into_response()
    }
}

impl From<DetectionError> for ApiError {
    fn from(e: DetectionError) -> Self {
        let status = match e {
            DetectionError::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<ExtractionError> for ApiError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Write(io) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to save output image: {}", io),
            ),
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "No output image produced. The workflow may not have returned an annotated image. ({})",
                    other
                ),
            ),
        }
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let requested_with = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    accept.contains("application/json") || requested_with == "XMLHttpRequest"
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn accept_terms(headers: HeaderMap, Form(form): Form<TermsForm>) -> Response {
    if !form.is_complete() {
        tracing::info!("terms not properly accepted");
        if wants_json(&headers) {
            return ApiError::new(StatusCode::BAD_REQUEST, "You must accept both terms to continue.")
                .into_response();
        }
        return Redirect::to("/").into_response();
    }

    tracing::info!("terms accepted");
    let cookie = [(header::SET_COOKIE, terms::SET_COOKIE)];
    if wants_json(&headers) {
        (cookie, Json(json!({"success": true}))).into_response()
    } else {
        (cookie, Redirect::to("/welcome?terms_accepted=true")).into_response()
    }
}

async fn session(headers: HeaderMap, RawQuery(query): RawQuery) -> Json<SessionResponse> {
    Json(SessionResponse {
        terms_accepted: terms::accepted(&headers, query.as_deref()),
    })
}

struct UploadForm {
    file_name: String,
    image: Vec<u8>,
    concern: String,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e))
    };

    let mut image: Option<(String, Vec<u8>)> = None;
    let mut concern = String::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(bad_form)?;
                image = Some((file_name, bytes.to_vec()));
            }
            "concern" => {
                concern = field.text().await.map_err(bad_form)?.trim().to_string();
            }
            _ => {}
        }
    }

    let (raw_name, image) = image.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No file part"))?;
    let file_name = uploads::safe_file_name(&raw_name)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No selected file"))?;
    Ok(UploadForm { file_name, image, concern })
}

async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    if !terms::accepted(&headers, query.as_deref()) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "You must accept the terms before uploading.",
        ));
    }

    let form = read_upload_form(multipart).await?;
    let config = &state.config;

    uploads::save_upload(&config.upload_dir, &form.file_name, &form.image)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Could not save upload: {}", e)))?;
    if !form.concern.is_empty() {
        uploads::save_side_file(&config.upload_dir, &form.file_name, ".concern.txt", &form.concern).await;
    }

    let detector = DetectionClient::from_config(state.http.clone(), config)?;
    let annotated = tokio::time::timeout(
        config.detection_timeout,
        annotate(&detector, form.image, config.output_path.clone(), config.detection_timeout),
    )
    .await
    .map_err(|_| ApiError::new(StatusCode::GATEWAY_TIMEOUT, "Processing timed out"))??;

    let (ai_summary, ai_summary_error) = match summarize(&state, &annotated, &form.concern).await {
        Ok(text) => {
            uploads::save_side_file(&config.upload_dir, &form.file_name, ".summary.txt", &text).await;
            (Some(text), None)
        }
        Err(e) => {
            tracing::warn!("AI summary unavailable: {}", e);
            (None, Some(e.to_string()))
        }
    };

    Ok(Json(UploadResponse {
        success: true,
        result_url: "/result".to_string(),
        uploaded_filename: form.file_name,
        ai_summary,
        ai_summary_error,
    }))
}

/// Run detection, write the annotated image it returns to `output_path` and
/// hand back the bytes written.
async fn annotate(
    detector: &DetectionClient,
    image: Vec<u8>,
    output_path: PathBuf,
    timeout: Duration,
) -> Result<Vec<u8>, ApiError> {
    let result: Value = detector.run_workflow(&image, timeout).await?;

    // Remote image URLs are fetched with a blocking client.
    let written = tokio::task::spawn_blocking(move || {
        let tree = ResponseValue::from(result);
        extract::save_extracted_image(&tree, &output_path)
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Extraction task failed: {}", e)))?;

    written.map_err(|e| {
        tracing::warn!("no annotated image: {}", e);
        ApiError::from(e)
    })
}

async fn summarize(state: &AppState, annotated: &[u8], concern: &str) -> Result<String, summary::SummaryError> {
    let summarizer = Summarizer::from_config(state.http.clone(), &state.config)?;
    summarizer
        .summarize(annotated, &state.config.output_path, concern)
        .await
}

async fn result(State(state): State<SharedState>) -> Response {
    match tokio::fs::read(&state.config.output_path).await {
        Ok(bytes) => {
            let content_type = image::guess_format(&bytes)
                .map(|f| f.to_mime_type())
                .unwrap_or("application/octet-stream");
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, "no-store"),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ApiError::new(StatusCode::NOT_FOUND, "No output image found").into_response()
        }
        Err(e) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not read output image: {}", e),
        )
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn json_clients_are_detected() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(wants_json(&headers));

        let mut xhr = HeaderMap::new();
        xhr.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        assert!(wants_json(&xhr));
    }

    #[test]
    fn write_failures_are_reported_apart_from_missing_images() {
        let write = ApiError::from(ExtractionError::Write(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        )));
        assert_eq!(write.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(write.message.starts_with("Failed to save output image"));

        let missing = ApiError::from(ExtractionError::NotFound);
        assert!(missing.message.starts_with("No output image produced"));
    }

    #[test]
    fn detection_failures_map_to_gateway_errors() {
        let upstream = ApiError::from(DetectionError::Upstream { status: 401, body: "bad key".into() });
        assert_eq!(upstream.status, StatusCode::BAD_GATEWAY);

        let missing = ApiError::from(DetectionError::MissingApiKey);
        assert_eq!(missing.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
