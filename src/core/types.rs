// Shared types for the product image pipeline

use serde::{Deserialize, Serialize};

/// Short-lived signed parameter set authorizing a direct upload to the
/// asset host. Requested fresh for every upload; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCredential {
    pub timestamp: i64,
    pub folder: String,
    pub signature: String,
    pub api_key: String,
    pub cloud_name: String,
}

/// Serve-time optimization parameters baked into an asset URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizationParams {
    pub width: u32,
    pub quality: u8,
}

/// A published product image, owned by the in-progress draft until submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAsset {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationParams>,
}

/// Best-effort structured metadata returned by the vision model.
///
/// Transient: only accepted fields, post-reconciliation, flow into the
/// product draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub dimensions: Option<String>,
    /// The model's raw category text, kept so label-based reconciliation
    /// can still run after slug validation nulls `category`.
    #[serde(skip)]
    pub category_guess: Option<String>,
}

/// A catalog-defined category; the only valid form of a product's
/// category field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCategory {
    pub id: String,
    pub label: String,
    pub slug: String,
}

impl CanonicalCategory {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            slug: slug.into(),
        }
    }
}

/// Style applied to a background-removed image at serve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundStyle {
    SolidColor { hex: String },
    Transparent,
}

/// Background handling for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackgroundMode {
    None,
    Remove { style: BackgroundStyle },
}

/// Explicit processing policy passed into the orchestrator, replacing
/// scattered boolean toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProcessingPolicy {
    pub background: BackgroundMode,
    #[serde(default)]
    pub auto_analyze: bool,
}

impl Default for ImageProcessingPolicy {
    fn default() -> Self {
        Self {
            background: BackgroundMode::None,
            auto_analyze: false,
        }
    }
}

/// Product images are cropped to a fixed 3:4 aspect ratio.
pub const PRODUCT_ASPECT: (u32, u32) = (3, 4);

/// User-confirmed crop region against the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// True when the region matches the product aspect within rounding slack.
    pub fn is_product_aspect(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let (aw, ah) = PRODUCT_ASPECT;
        let ratio = self.width as f64 / self.height as f64;
        let expected = aw as f64 / ah as f64;
        (ratio - expected).abs() < 0.01
    }
}

/// Pipeline stages the service reports for one image.
///
/// Background removal either succeeds or is skipped on error; both
/// branches converge on an upload-ready blob, which then publishes or
/// fails. Crop selection happens client-side before the image reaches
/// this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStage {
    BackgroundRemoved,
    BackgroundSkippedOnError,
    ReadyToUpload,
    Uploaded,
    UploadFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_region_accepts_exact_three_four() {
        let region = CropRegion {
            x: 0,
            y: 0,
            width: 600,
            height: 800,
        };
        assert!(region.is_product_aspect());
    }

    #[test]
    fn crop_region_accepts_rounding_slack() {
        // 601x800 is off by less than a percent
        let region = CropRegion {
            x: 10,
            y: 20,
            width: 601,
            height: 800,
        };
        assert!(region.is_product_aspect());
    }

    #[test]
    fn crop_region_rejects_square() {
        let region = CropRegion {
            x: 0,
            y: 0,
            width: 800,
            height: 800,
        };
        assert!(!region.is_product_aspect());
    }

    #[test]
    fn policy_deserializes_tagged_background() {
        let policy: ImageProcessingPolicy = serde_json::from_str(
            r##"{"background":{"mode":"remove","style":{"solid_color":{"hex":"#FFFFFF"}}},"auto_analyze":true}"##,
        )
        .unwrap();
        assert!(policy.auto_analyze);
        assert_eq!(
            policy.background,
            BackgroundMode::Remove {
                style: BackgroundStyle::SolidColor {
                    hex: "#FFFFFF".to_string()
                }
            }
        );
    }
}
