// Library exports for the product image pipeline service

// Core modules
pub mod core;
pub mod pipeline;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{
        AnalysisError, CatalogError, ConfigError, PipelineError, SegmentationError, SigningError,
        UploadError,
    },
    types::{
        AnalysisResult, BackgroundMode, BackgroundStyle, CanonicalCategory, CropRegion,
        ImageAsset, ImageProcessingPolicy, ImageStage, UploadCredential,
    },
};

pub use crate::pipeline::draft::{DraftField, ProductDraft};
pub use crate::pipeline::orchestrator::{
    should_auto_analyze, AnalysisOutcome, PipelineOrchestrator, PipelineRun, PipelineRunOutcome,
    ProcessedImage,
};
pub use crate::pipeline::reconciler::{reconcile, reconcile_analysis};

pub use crate::services::{
    analyzer::MetadataAnalyzer, catalog::CatalogClient, catalog::CategoryCache,
    publisher::AssetPublisher, segmentation::BackgroundRemover, signing::CredentialSigner,
};

pub use crate::utils::metrics::Metrics;
