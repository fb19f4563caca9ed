// Pipeline orchestrator: crop, background, publish, analyze

use anyhow::Context;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult, UploadError, UploadResult};
use crate::core::types::{
    AnalysisResult, BackgroundMode, CropRegion, ImageProcessingPolicy, ImageStage,
};
use crate::pipeline::reconciler;
use crate::services::analyzer::MetadataAnalyzer;
use crate::services::catalog::{CatalogClient, CategoryCache};
use crate::services::publisher::{apply_style, AssetPublisher, PublishedAsset};
use crate::services::segmentation::BackgroundRemover;
use crate::utils::image_ops;
use crate::utils::metrics::Metrics;

/// A transformed image ready for upload. Retained by callers so an
/// upload retry never re-runs the transform stage.
#[derive(Debug)]
pub struct ProcessedImage {
    pub png: Vec<u8>,
    pub background_stage: ImageStage,
}

/// Outcome of the conditional analysis step. Analysis failures never
/// fail the pipeline run; the admin fills the form in manually.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Skipped,
    Completed(AnalysisResult),
    Failed { message: String },
}

/// Everything a completed pipeline run produced.
pub struct PipelineRun {
    pub url: String,
    pub transparent_url: String,
    pub background_stage: ImageStage,
    pub analysis: AnalysisOutcome,
}

/// Result of a full run. Upload failure hands the processed blob back
/// so a retry skips the crop and background stages entirely.
pub enum PipelineRunOutcome {
    Published(PipelineRun),
    UploadFailed {
        error: UploadError,
        processed: ProcessedImage,
    },
}

/// Auto-analysis fires only for the first image of a product and only
/// when the policy opts in.
pub fn should_auto_analyze(image_count_before: usize, policy: &ImageProcessingPolicy) -> bool {
    image_count_before == 0 && policy.auto_analyze
}

pub struct PipelineOrchestrator {
    publisher: AssetPublisher,
    remover: BackgroundRemover,
    analyzer: MetadataAnalyzer,
    categories: CategoryCache,
    catalog: Arc<CatalogClient>,
    metrics: Metrics,
}

impl PipelineOrchestrator {
    pub fn new(
        config: &Config,
        categories: CategoryCache,
        catalog: Arc<CatalogClient>,
        metrics: Metrics,
    ) -> anyhow::Result<Self> {
        let publisher =
            AssetPublisher::new(&config.asset_host).context("Failed to build asset publisher")?;
        let analyzer =
            MetadataAnalyzer::new(&config.analyzer).context("Failed to build analyzer")?;
        let remover = BackgroundRemover::new(&config.segmentation);

        Ok(Self {
            publisher,
            remover,
            analyzer,
            categories,
            catalog,
            metrics,
        })
    }

    /// Transform raw image bytes into an upload-ready PNG: decode, crop
    /// to the confirmed region, then apply the background policy.
    ///
    /// Segmentation failure downgrades to the cropped image instead of
    /// failing the run.
    #[instrument(skip(self, bytes, policy), fields(bytes = bytes.len()))]
    pub async fn transform(
        &self,
        bytes: &[u8],
        policy: &ImageProcessingPolicy,
        crop: Option<CropRegion>,
    ) -> PipelineResult<ProcessedImage> {
        let start = Instant::now();

        let mut img = image_ops::load_image_from_memory_async(bytes)
            .await
            .map_err(PipelineError::Decode)?;

        if let Some(region) = crop {
            if !region.is_product_aspect() {
                return Err(PipelineError::BadAspect {
                    width: region.width,
                    height: region.height,
                });
            }
            img = image_ops::crop_image_async(img, region.x, region.y, region.width, region.height)
                .await
                .map_err(PipelineError::Transform)?;
        }

        let (img, background_stage) = match &policy.background {
            BackgroundMode::None => (img, ImageStage::ReadyToUpload),
            BackgroundMode::Remove { .. } => match self.remover.remove_background(&img).await {
                Ok(rgba) => {
                    self.metrics.record_background_removed();
                    (DynamicImage::ImageRgba8(rgba), ImageStage::BackgroundRemoved)
                }
                Err(e) => {
                    warn!("Background removal failed, keeping cropped image: {}", e);
                    self.metrics.record_background_skipped();
                    (img, ImageStage::BackgroundSkippedOnError)
                }
            },
        };

        let png = image_ops::encode_png_async(img)
            .await
            .map_err(PipelineError::Transform)?;

        self.metrics.record_transform_duration(start.elapsed());
        Ok(ProcessedImage {
            png,
            background_stage,
        })
    }

    /// Upload a processed blob and derive the serve URL.
    ///
    /// The stored asset is always the transparent blob; a solid-colour
    /// style only changes the URL, never the stored bytes. Safe to call
    /// again with the same blob after a failure.
    #[instrument(skip(self, processed, policy))]
    pub async fn publish(
        &self,
        processed: &ProcessedImage,
        policy: &ImageProcessingPolicy,
    ) -> UploadResult<PublishedAsset> {
        let start = Instant::now();
        let result = self.publisher.publish(processed.png.clone()).await;
        self.metrics.record_upload(result.is_ok(), start.elapsed());

        let transparent_url = result?;
        let url = match &policy.background {
            BackgroundMode::Remove { style } => apply_style(&transparent_url, style),
            BackgroundMode::None => transparent_url.clone(),
        };

        Ok(PublishedAsset {
            url,
            transparent_url,
        })
    }

    /// Run analysis against a published image, reporting failure as data
    /// rather than an error.
    ///
    /// An empty category cache is refreshed first so the prompt always
    /// carries canonical slugs, and the model's category guess goes
    /// through the reconciler before the result is emitted.
    pub async fn analyze(&self, image_url: &str) -> AnalysisOutcome {
        if self.categories.is_empty() {
            match self.catalog.refresh_into(&self.categories).await {
                Ok(count) => {
                    self.metrics.record_category_refresh();
                    info!("Category cache filled with {} entries before analysis", count);
                }
                Err(e) => warn!("Category refresh before analysis failed: {}", e),
            }
        }

        let start = Instant::now();
        let categories = self.categories.snapshot();
        let result = self
            .analyzer
            .analyze(image_url, &categories, Some(&self.metrics))
            .await;
        self.metrics.record_analysis(result.is_ok(), start.elapsed());

        match result {
            Ok(mut analysis) => {
                reconciler::reconcile_analysis(&mut analysis, &categories);
                AnalysisOutcome::Completed(analysis)
            }
            Err(e) => {
                warn!("Analysis failed: {}", e);
                AnalysisOutcome::Failed {
                    message: e.user_message(),
                }
            }
        }
    }

    /// Full run for one image: transform, publish, then analyze when the
    /// policy and position call for it.
    ///
    /// Transform errors fail the run; an upload failure returns the
    /// processed blob instead so the caller can retry the publish step
    /// alone.
    #[instrument(skip(self, bytes, policy), fields(auto_analyze = policy.auto_analyze))]
    pub async fn run(
        &self,
        bytes: &[u8],
        policy: &ImageProcessingPolicy,
        crop: Option<CropRegion>,
        image_count_before: usize,
    ) -> PipelineResult<PipelineRunOutcome> {
        let processed = self.transform(bytes, policy, crop).await?;
        let asset = match self.publish(&processed, policy).await {
            Ok(asset) => asset,
            Err(error) => {
                warn!("Upload failed, retaining processed blob for retry: {}", error);
                return Ok(PipelineRunOutcome::UploadFailed { error, processed });
            }
        };

        let analysis = if should_auto_analyze(image_count_before, policy) {
            self.analyze(&asset.transparent_url).await
        } else {
            AnalysisOutcome::Skipped
        };

        info!("Pipeline run complete: {}", asset.url);
        Ok(PipelineRunOutcome::Published(PipelineRun {
            url: asset.url,
            transparent_url: asset.transparent_url,
            background_stage: processed.background_stage,
            analysis,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{
        AnalyzerConfig, AssetHostConfig, CatalogConfig, SegmentationConfig, ServerConfig,
    };
    use crate::core::types::BackgroundStyle;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: tracing::Level::INFO,
            },
            asset_host: AssetHostConfig {
                cloud_name: "demo".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                upload_folder: "aura-flowers".to_string(),
                // Nothing listens here; uploads fail fast with a
                // connection error
                upload_base_url: "http://127.0.0.1:9".to_string(),
            },
            analyzer: AnalyzerConfig {
                api_key: String::new(),
                models: vec!["gemini-2.5-flash".to_string()],
                image_width: 512,
                image_quality: 70,
                request_timeout_secs: 60,
            },
            segmentation: SegmentationConfig {
                model_path: "models/rmbg.onnx".to_string(),
                target_size: 1024,
            },
            catalog: CatalogConfig {
                base_url: "http://127.0.0.1:9".to_string(),
            },
        }
    }

    fn orchestrator() -> PipelineOrchestrator {
        let config = test_config();
        let catalog = Arc::new(CatalogClient::new(&config.catalog).unwrap());
        PipelineOrchestrator::new(&config, CategoryCache::new(), catalog, Metrics::new()).unwrap()
    }

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([200, 100, 50, 255]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn auto_analyze_only_for_first_image_with_opt_in() {
        let opted_in = ImageProcessingPolicy {
            background: BackgroundMode::None,
            auto_analyze: true,
        };
        let opted_out = ImageProcessingPolicy::default();

        assert!(should_auto_analyze(0, &opted_in));
        assert!(!should_auto_analyze(1, &opted_in));
        assert!(!should_auto_analyze(0, &opted_out));
        assert!(!should_auto_analyze(3, &opted_out));
    }

    #[tokio::test]
    async fn transform_crops_to_region() {
        let orch = orchestrator();
        let bytes = sample_png(1200, 1200);
        let crop = CropRegion {
            x: 0,
            y: 0,
            width: 600,
            height: 800,
        };

        let processed = orch
            .transform(&bytes, &ImageProcessingPolicy::default(), Some(crop))
            .await
            .unwrap();
        assert_eq!(processed.background_stage, ImageStage::ReadyToUpload);

        let out = image::load_from_memory(&processed.png).unwrap();
        assert_eq!(out.width(), 600);
        assert_eq!(out.height(), 800);
    }

    #[tokio::test]
    async fn transform_rejects_wrong_aspect() {
        let orch = orchestrator();
        let bytes = sample_png(1000, 1000);
        let crop = CropRegion {
            x: 0,
            y: 0,
            width: 500,
            height: 500,
        };

        let err = orch
            .transform(&bytes, &ImageProcessingPolicy::default(), Some(crop))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BadAspect {
                width: 500,
                height: 500
            }
        ));
    }

    #[tokio::test]
    async fn transform_rejects_garbage_bytes() {
        let orch = orchestrator();
        let err = orch
            .transform(b"not an image", &ImageProcessingPolicy::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[tokio::test]
    async fn upload_failure_retains_processed_blob() {
        let orch = orchestrator();
        let bytes = sample_png(600, 800);

        let outcome = orch
            .run(&bytes, &ImageProcessingPolicy::default(), None, 0)
            .await
            .unwrap();

        match outcome {
            PipelineRunOutcome::UploadFailed { processed, .. } => {
                let img = image::load_from_memory(&processed.png).unwrap();
                assert_eq!((img.width(), img.height()), (600, 800));
                assert_eq!(processed.background_stage, ImageStage::ReadyToUpload);
            }
            PipelineRunOutcome::Published(_) => {
                panic!("publish cannot succeed without an asset host")
            }
        }
    }

    #[tokio::test]
    async fn analyze_with_empty_cache_degrades_to_failed_outcome() {
        // The catalog endpoint is unreachable, so the read-through
        // refresh logs and moves on; with no API key configured the
        // analysis itself reports failure as data
        let orch = orchestrator();

        match orch.analyze("https://example.com/rose.png").await {
            AnalysisOutcome::Failed { message } => {
                assert!(message.contains("manually"));
            }
            other => panic!("expected failed analysis, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn segmentation_failure_falls_back_to_cropped() {
        // Model path does not exist, so removal fails and the cropped
        // image is kept
        let orch = orchestrator();
        let bytes = sample_png(300, 400);
        let policy = ImageProcessingPolicy {
            background: BackgroundMode::Remove {
                style: BackgroundStyle::Transparent,
            },
            auto_analyze: false,
        };

        let processed = orch.transform(&bytes, &policy, None).await.unwrap();
        assert_eq!(
            processed.background_stage,
            ImageStage::BackgroundSkippedOnError
        );
        assert!(image::load_from_memory(&processed.png).is_ok());
    }
}
