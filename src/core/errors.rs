// Custom error types for the image pipeline
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Automatic Display/Error trait implementations
// - Source error chaining

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Analysis image width must be between 64 and 2048, got {0}")]
    InvalidAnalysisWidth(u32),

    #[error("Analysis image quality must be between 1 and 100, got {0}")]
    InvalidAnalysisQuality(u8),

    #[error("Segmentation target size must be between 256 and 2048, got {0}")]
    InvalidTargetSize(u32),

    #[error("No analyzer models configured (set GEMINI_MODELS environment variable)")]
    NoModels,

    #[error("Upload folder must not be empty")]
    EmptyUploadFolder,
}

/// Upload credential signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Asset host API secret is not configured (set CLOUDINARY_API_SECRET)")]
    MissingSecret,
}

/// Background segmentation errors
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("Failed to load segmentation model from {path}: {source}")]
    ModelLoad {
        path: String,
        source: std::io::Error,
    },

    #[error("ONNX inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("Matte shape mismatch: expected {expected} values, got {actual}")]
    MatteShape { expected: usize, actual: usize },

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Asset publishing errors
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Asset host rejected upload ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Asset host response did not contain a secure URL")]
    MalformedResponse,
}

/// Metadata analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Vision API key is not configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("No analyzer models configured")]
    NoModels,

    #[error("Quota exceeded for model {model}")]
    QuotaExceeded { model: String },

    #[error("Rate limited on model {model} (suggested wait {wait_secs:.1}s)")]
    RateLimited { model: String, wait_secs: f64 },

    #[error("Failed to fetch image for analysis: {0}")]
    ImageFetch(#[source] reqwest::Error),

    #[error("Analysis request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Model {model} returned error ({status}): {message}")]
    Api {
        model: String,
        status: u16,
        message: String,
    },

    #[error("Model response contained no text part")]
    MissingText,

    #[error("No JSON object found in model response")]
    JsonNotFound,

    #[error("Failed to parse model JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("All models exhausted; last error: {last}")]
    AllModelsExhausted {
        #[source]
        last: Box<AnalysisError>,
    },
}

impl AnalysisError {
    /// Message shown to the admin when analysis fails; the form stays editable.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::MissingApiKey => {
                "AI analysis is not configured. Fill in the product details manually.".to_string()
            }
            AnalysisError::AllModelsExhausted { .. } => {
                "AI quota exhausted across all models. Fill in the product details manually."
                    .to_string()
            }
            AnalysisError::JsonNotFound | AnalysisError::JsonParse(_) => {
                "AI response could not be parsed. Fill in the product details manually.".to_string()
            }
            _ => "AI analysis failed. Fill in the product details manually.".to_string(),
        }
    }
}

/// Catalog service errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Catalog service returned status {0}")]
    Status(u16),
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image decode failed: {0}")]
    Decode(#[source] anyhow::Error),

    #[error("Crop region {width}x{height} does not match the 3:4 product aspect")]
    BadAspect { width: u32, height: u32 },

    #[error("Image transform failed: {0}")]
    Transform(#[source] anyhow::Error),
}

// Convenience type aliases for Results
pub type SegmentationResult<T> = Result<T, SegmentationError>;
pub type UploadResult<T> = Result<T, UploadError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
