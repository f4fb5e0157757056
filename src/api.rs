//! HTTP API for leaf classification
//!
//! ## Endpoints
//!
//! - `GET /` - Liveness message
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness (503 until the model is loaded)
//! - `GET /metrics` - Prometheus-formatted metrics
//! - `POST /predict/` - Classify the multipart field `file`
//! - `POST /submit/` - Archive the multipart field `file`
//!
//! Both POST routes are also served without the trailing slash.
//!
//! ## Example
//!
//! ```rust,ignore
//! use magnolia::api::{create_router, AppState};
//!
//! let state = AppState::new(facade, archive, max_upload_bytes);
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::ErrorKind,
    prediction::PredictionResult,
    serving::{ReportedError, ServingFacade},
    submit::SubmissionArchive,
};

/// Liveness message returned by `GET /`
pub const LIVE_MESSAGE: &str = "Magnolia Classifier API is live!";

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "file";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Classification pipeline
    facade: Arc<ServingFacade>,
    /// Storage for submitted images
    archive: Arc<SubmissionArchive>,
    /// Request body limit
    max_upload_bytes: usize,
}

impl AppState {
    /// Create new application state
    #[must_use]
    pub fn new(facade: ServingFacade, archive: SubmissionArchive, max_upload_bytes: usize) -> Self {
        Self {
            facade: Arc::new(facade),
            archive: Arc::new(archive),
            max_upload_bytes,
        }
    }

    /// Classification pipeline
    #[must_use]
    pub fn facade(&self) -> &Arc<ServingFacade> {
        &self.facade
    }
}

/// Liveness / confirmation message
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Message text
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// Whether classification requests are served without a cold load
    pub ready: bool,
    /// Whether the model is resident
    pub model_loaded: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Caller-safe error message
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/predict/", post(predict_handler))
        .route("/predict", post(predict_handler))
        .route("/submit/", post(submit_handler))
        .route("/submit", post(submit_handler))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP status for a reported failure
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput | ErrorKind::Decode => StatusCode::BAD_REQUEST,
        ErrorKind::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ModelLoad | ErrorKind::Inference | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}

fn reported(err: &ReportedError) -> ApiError {
    (
        status_for(err.kind),
        Json(ErrorResponse {
            detail: err.message.clone(),
        }),
    )
}

fn multipart_error(err: &MultipartError) -> ApiError {
    tracing::warn!(error = %err, "malformed upload");
    (
        err.status(),
        Json(ErrorResponse {
            detail: err.body_text(),
        }),
    )
}

/// The `file` field of a multipart upload
struct Upload {
    file_name: Option<String>,
    content_type: String,
    bytes: Vec<u8>,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
        return Ok(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err((
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            detail: format!("Missing multipart field '{UPLOAD_FIELD}'"),
        }),
    ))
}

/// Liveness handler
async fn root_handler() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: LIVE_MESSAGE.to_string(),
    })
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Readiness handler
async fn ready_handler(State(state): State<AppState>) -> Response {
    let loaded = state.facade.is_ready();
    let status = if loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready: loaded,
            model_loaded: loaded,
        }),
    )
        .into_response()
}

/// Metrics handler - returns Prometheus-formatted metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    let store = state.facade.store();
    state
        .facade
        .metrics()
        .to_prometheus(store.stats(), store.is_loaded())
}

/// Classification handler
async fn predict_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResult>, ApiError> {
    let upload = read_upload(&mut multipart).await?;
    tracing::debug!(
        file_name = upload.file_name.as_deref().unwrap_or_default(),
        content_type = %upload.content_type,
        bytes = upload.bytes.len(),
        "received image for classification"
    );

    state
        .facade
        .handle_classification_request(upload.bytes, &upload.content_type)
        .await
        .map(Json)
        .map_err(|e| reported(&e))
}

/// Submission handler
async fn submit_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    let upload = read_upload(&mut multipart).await?;

    match state
        .archive
        .store(upload.file_name.as_deref(), &upload.bytes)
        .await
    {
        Ok(stored) => {
            state.facade.metrics().record_submission();
            Ok(Json(MessageResponse {
                message: format!(
                    "Image '{}' submitted successfully.",
                    stored.original_name
                ),
            }))
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to store submission");
            Err(reported(&ReportedError::from(&e)))
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    use super::*;
    use crate::{
        engine::InferenceEngine,
        fetch::ModelFetcher,
        metrics::MetricsCollector,
        preprocess::ImagePreprocessor,
        store::{ModelSource, ModelStore},
        testing::{jpeg_bytes, CountingLoader},
    };

    const BOUNDARY: &str = "magnolia-test-boundary";

    struct TestApp {
        router: Router,
        state: AppState,
        _artifact: tempfile::NamedTempFile,
        submissions: tempfile::TempDir,
    }

    fn create_test_app_with_limit(output: f32, max_upload_bytes: usize) -> TestApp {
        let mut artifact = tempfile::NamedTempFile::new().unwrap();
        artifact.write_all(b"weights").unwrap();
        let store = ModelStore::new(
            ModelSource::new(artifact.path()),
            Arc::new(CountingLoader::fixed(output)),
            ModelFetcher::new().unwrap(),
        );
        let facade = ServingFacade::new(
            Arc::new(store),
            ImagePreprocessor::default(),
            InferenceEngine::default(),
            MetricsCollector::new(),
        );
        let submissions = tempfile::tempdir().unwrap();
        let state = AppState::new(
            facade,
            SubmissionArchive::new(submissions.path()),
            max_upload_bytes,
        );
        TestApp {
            router: create_router(state.clone()),
            state,
            _artifact: artifact,
            submissions,
        }
    }

    fn create_test_app(output: f32) -> TestApp {
        create_test_app_with_limit(output, 10 * 1024 * 1024)
    }

    fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = create_test_app(0.9);
        let response = app
            .router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let msg: MessageResponse = body_json(response).await;
        assert_eq!(msg.message, LIVE_MESSAGE);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app(0.9);
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = body_json(response).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.version, crate::VERSION);
    }

    #[tokio::test]
    async fn test_ready_reflects_model_state() {
        let app = create_test_app(0.9);
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let ready: ReadyResponse = body_json(response).await;
        assert!(!ready.model_loaded);

        app.state.facade().warm_up().await.unwrap();

        let response = app
            .router
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_nilo() {
        let app = create_test_app(0.87);
        let body = multipart_body("file", "leaf.jpg", "image/jpeg", &jpeg_bytes(500, 500));
        let response = app
            .router
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = body_json(response).await;
        assert_eq!(json["class"], "Nilo");
        assert!((json["confidence"].as_f64().unwrap() - 0.87).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_predict_without_trailing_slash() {
        let app = create_test_app(0.2);
        let body = multipart_body("file", "leaf.png", "image/jpeg", &jpeg_bytes(64, 64));
        let response = app
            .router
            .oneshot(upload_request("/predict", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = body_json(response).await;
        assert_eq!(json["class"], "Not Nilo");
    }

    #[tokio::test]
    async fn test_predict_rejects_text() {
        let app = create_test_app(0.87);
        let body = multipart_body("file", "notes.txt", "text/plain", b"hello");
        let response = app
            .router
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.detail, ErrorKind::InvalidInput.public_message());
    }

    #[tokio::test]
    async fn test_predict_corrupt_image() {
        let app = create_test_app(0.87);
        let body = multipart_body("file", "leaf.jpg", "image/jpeg", b"definitely not a jpeg");
        let response = app
            .router
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_missing_file_field() {
        let app = create_test_app(0.87);
        let body = multipart_body("image", "leaf.jpg", "image/jpeg", &jpeg_bytes(8, 8));
        let response = app
            .router
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = body_json(response).await;
        assert!(err.detail.contains("file"));
    }

    #[tokio::test]
    async fn test_predict_model_unavailable_is_503() {
        let store = ModelStore::new(
            ModelSource::new("/nonexistent/model.onnx"),
            Arc::new(CountingLoader::fixed(0.9)),
            ModelFetcher::new().unwrap(),
        );
        let facade = ServingFacade::new(
            Arc::new(store),
            ImagePreprocessor::default(),
            InferenceEngine::default(),
            MetricsCollector::new(),
        );
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(AppState::new(
            facade,
            SubmissionArchive::new(dir.path()),
            1024 * 1024,
        ));

        let body = multipart_body("file", "leaf.jpg", "image/jpeg", &jpeg_bytes(16, 16));
        let response = router
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorResponse = body_json(response).await;
        assert!(!err.detail.contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_upload_over_limit_rejected() {
        let app = create_test_app_with_limit(0.87, 1024);
        let body = multipart_body("file", "big.jpg", "image/jpeg", &vec![0u8; 8 * 1024]);
        let response = app
            .router
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_submit_stores_file() {
        let app = create_test_app(0.87);
        let image = jpeg_bytes(32, 32);
        let body = multipart_body("file", "my leaf.jpg", "image/jpeg", &image);
        let response = app
            .router
            .clone()
            .oneshot(upload_request("/submit/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let msg: MessageResponse = body_json(response).await;
        assert_eq!(msg.message, "Image 'my_leaf.jpg' submitted successfully.");

        let stored: Vec<_> = std::fs::read_dir(app.submissions.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(std::fs::read(&stored[0]).unwrap(), image);

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("magnolia_submissions_total 1"));
    }

    #[tokio::test]
    async fn test_submit_empty_file_rejected() {
        let app = create_test_app(0.87);
        let body = multipart_body("file", "empty.jpg", "image/jpeg", b"");
        let response = app
            .router
            .oneshot(upload_request("/submit", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.detail, "Uploaded file is empty");
        assert!(!err.detail.contains("content type"));
        assert_eq!(std::fs::read_dir(app.submissions.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_predictions() {
        let app = create_test_app(0.87);
        let body = multipart_body("file", "leaf.jpg", "image/jpeg", &jpeg_bytes(40, 40));
        app.router
            .clone()
            .oneshot(upload_request("/predict/", body))
            .await
            .unwrap();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("magnolia_predictions_total{label=\"Nilo\"} 1"));
        assert!(text.contains("magnolia_model_loaded 1"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Decode), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::ModelUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorKind::ModelLoad),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(ErrorKind::Inference),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
