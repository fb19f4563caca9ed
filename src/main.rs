// Main entry point for the product image pipeline service

use aura_pipeline::{
    core::config::Config,
    core::errors::PipelineError,
    core::types::{CropRegion, ImageProcessingPolicy, ImageStage},
    pipeline::orchestrator::{
        AnalysisOutcome, PipelineOrchestrator, PipelineRunOutcome, ProcessedImage,
    },
    services::catalog::{CatalogClient, CategoryCache},
    services::signing::CredentialSigner,
    utils::metrics::Metrics,
};

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<PipelineOrchestrator>,
    signer: Arc<CredentialSigner>,
    catalog: Arc<CatalogClient>,
    categories: CategoryCache,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new()?;

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "aura_pipeline={},ort=off",
        match config.server.log_level {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== AURA FLOWERS IMAGE PIPELINE ===");
    info!(
        "Config: folder={} models={} seg_model={}",
        config.asset_host.upload_folder,
        config.analyzer.models.join(","),
        config.segmentation.model_path,
    );

    let metrics = Metrics::new();
    let categories = CategoryCache::new();
    let signer = Arc::new(CredentialSigner::new(&config.asset_host));
    let catalog = Arc::new(CatalogClient::new(&config.catalog)?);
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        &config,
        categories.clone(),
        catalog.clone(),
        metrics.clone(),
    )?);

    // Warm the category cache; the service still starts if the catalog
    // is unreachable
    match catalog.refresh_into(&categories).await {
        Ok(count) => info!("Category cache warmed with {} entries", count),
        Err(e) => warn!("Could not warm category cache: {}", e),
    }

    let state = AppState {
        orchestrator,
        signer,
        catalog,
        categories,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/sign", post(sign))
        .route("/process", post(process_image))
        .route("/publish", post(publish_processed))
        .route("/analyze", post(analyze))
        .route("/categories", get(list_categories))
        .route("/categories/refresh", post(refresh_categories))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .with_state(state)
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024)) // single product photos
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                   - Root endpoint");
    info!("  GET  /health             - Health check");
    info!("  POST /sign               - Signed upload credential");
    info!("  POST /process            - Transform and publish an image (multipart)");
    info!("  POST /publish            - Retry upload of an already-processed blob");
    info!("  POST /analyze            - AI metadata analysis for a published image");
    info!("  GET  /categories         - Cached category list");
    info!("  POST /categories/refresh - Refresh categories from the catalog");
    info!("  GET  /metrics            - Prometheus metrics");
    info!("  GET  /stats              - Detailed statistics");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Aura Flowers Product Image Pipeline"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Mint a fresh signed upload credential
async fn sign(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.metrics.record_endpoint_request("/sign");

    let credential = state.signer.issue().map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })?;

    state.metrics.record_credential_issued();
    Ok(Json(serde_json::json!(credential)))
}

/// Transform and publish one product image
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": the source image file
/// - Field "policy" (optional): ImageProcessingPolicy JSON
/// - Field "crop" (optional): CropRegion JSON, must be 3:4
/// - Field "image_count" (optional): images already on the product
async fn process_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.metrics.record_endpoint_request("/process");
    let start = std::time::Instant::now();

    let mut image_bytes: Option<Vec<u8>> = None;
    let mut policy = ImageProcessingPolicy::default();
    let mut crop: Option<CropRegion> = None;
    let mut image_count = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Read error: {}", e)))?;
                image_bytes = Some(data.to_vec());
            }
            "policy" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Policy read error: {}", e)))?;
                policy = serde_json::from_str(&text)
                    .map_err(|e| bad_request(format!("Invalid policy JSON: {}", e)))?;
            }
            "crop" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Crop read error: {}", e)))?;
                crop = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| bad_request(format!("Invalid crop JSON: {}", e)))?,
                );
            }
            "image_count" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Count read error: {}", e)))?;
                image_count = text
                    .trim()
                    .parse()
                    .map_err(|e| bad_request(format!("Invalid image count: {}", e)))?;
            }
            _ => {}
        }
    }

    let image_bytes = image_bytes.ok_or_else(|| bad_request("No image provided".to_string()))?;

    let outcome = state
        .orchestrator
        .run(&image_bytes, &policy, crop, image_count)
        .await
        .map_err(|e| match &e {
            PipelineError::Decode(_) | PipelineError::BadAspect { .. } => {
                bad_request(e.to_string())
            }
            PipelineError::Transform(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            ),
        })?;

    info!(
        "Process request completed in {:.2}s",
        start.elapsed().as_secs_f64()
    );

    match outcome {
        PipelineRunOutcome::Published(run) => Ok(Json(serde_json::json!({
            "stage": ImageStage::Uploaded,
            "url": run.url,
            "transparent_url": run.transparent_url,
            "background_stage": run.background_stage,
            "analysis": analysis_json(&run.analysis),
        }))),
        // The processed blob goes back to the client so a retry through
        // /publish skips the crop and background stages
        PipelineRunOutcome::UploadFailed { error, processed } => Err((
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "stage": ImageStage::UploadFailed,
                "error": error.to_string(),
                "background_stage": processed.background_stage,
                "processed_image": general_purpose::STANDARD.encode(&processed.png),
            })),
        )),
    }
}

/// Upload an already-processed blob, skipping the transform stage
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": the processed PNG (e.g. from a failed /process)
/// - Field "policy" (optional): ImageProcessingPolicy JSON, for the
///   serve-time style token
async fn publish_processed(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.metrics.record_endpoint_request("/publish");

    let mut image_bytes: Option<Vec<u8>> = None;
    let mut policy = ImageProcessingPolicy::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Read error: {}", e)))?;
                image_bytes = Some(data.to_vec());
            }
            "policy" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Policy read error: {}", e)))?;
                policy = serde_json::from_str(&text)
                    .map_err(|e| bad_request(format!("Invalid policy JSON: {}", e)))?;
            }
            _ => {}
        }
    }

    let png = image_bytes.ok_or_else(|| bad_request("No image provided".to_string()))?;
    let processed = ProcessedImage {
        png,
        background_stage: ImageStage::ReadyToUpload,
    };

    match state.orchestrator.publish(&processed, &policy).await {
        Ok(asset) => Ok(Json(serde_json::json!({
            "stage": ImageStage::Uploaded,
            "url": asset.url,
            "transparent_url": asset.transparent_url,
        }))),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "stage": ImageStage::UploadFailed,
                "error": e.to_string(),
            })),
        )),
    }
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    image_url: String,
}

/// Run metadata analysis for an already-published image
async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.metrics.record_endpoint_request("/analyze");

    match state.orchestrator.analyze(&request.image_url).await {
        AnalysisOutcome::Completed(result) => Ok(Json(serde_json::json!(result))),
        AnalysisOutcome::Failed { message } => Err((
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "error": "Analysis failed",
                "details": message,
            })),
        )),
        AnalysisOutcome::Skipped => unreachable!("manual analysis is never skipped"),
    }
}

async fn list_categories(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/categories");

    if state.categories.is_empty() {
        if let Err(e) = state.catalog.refresh_into(&state.categories).await {
            warn!("Category read-through refresh failed: {}", e);
        } else {
            state.metrics.record_category_refresh();
        }
    }

    Json(serde_json::json!({ "categories": state.categories.snapshot() }))
}

async fn refresh_categories(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.metrics.record_endpoint_request("/categories/refresh");

    match state.catalog.refresh_into(&state.categories).await {
        Ok(count) => {
            state.metrics.record_category_refresh();
            Ok(Json(serde_json::json!({ "refreshed": count })))
        }
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": e.to_string() })),
        )),
    }
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

fn bad_request(message: String) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

fn analysis_json(outcome: &AnalysisOutcome) -> serde_json::Value {
    match outcome {
        AnalysisOutcome::Skipped => serde_json::json!({ "status": "skipped" }),
        AnalysisOutcome::Completed(result) => serde_json::json!({
            "status": "completed",
            "result": result,
        }),
        AnalysisOutcome::Failed { message } => serde_json::json!({
            "status": "failed",
            "error": message,
        }),
    }
}
