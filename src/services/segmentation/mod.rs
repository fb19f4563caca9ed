// Background removal using an RMBG-style matting model

use image::{DynamicImage, GrayImage, RgbaImage};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::core::config::SegmentationConfig;
use crate::core::errors::{SegmentationError, SegmentationResult};
use crate::utils::image_ops::apply_alpha_matte;

/// Local background remover.
///
/// The ONNX session is loaded lazily on first use and reused across
/// requests. If an inference fails the session is discarded so the next
/// request starts from a freshly loaded model.
pub struct BackgroundRemover {
    session: Mutex<Option<Session>>,
    model_path: String,
    target_size: u32,
}

impl BackgroundRemover {
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            session: Mutex::new(None),
            model_path: config.model_path.clone(),
            target_size: config.target_size,
        }
    }

    /// Remove the background from an image, returning an RGBA image whose
    /// alpha channel is the predicted matte.
    #[instrument(skip(self, img), fields(width = img.width(), height = img.height()))]
    pub async fn remove_background(&self, img: &DynamicImage) -> SegmentationResult<RgbaImage> {
        let start = std::time::Instant::now();
        let mut guard = self.session.lock().await;

        let mut session = match guard.take() {
            Some(session) => session,
            None => {
                info!("Loading segmentation model from {}", self.model_path);
                self.load_session()?
            }
        };

        match Self::infer(&mut session, img, self.target_size) {
            Ok(matte) => {
                *guard = Some(session);
                debug!(
                    "Background removed in {:.2}ms",
                    start.elapsed().as_secs_f64() * 1000.0
                );
                Ok(apply_alpha_matte(img, &matte))
            }
            Err(e) => {
                // Session is dropped here; a fresh one is built next request
                warn!("Segmentation inference failed, discarding session: {}", e);
                Err(e)
            }
        }
    }

    fn load_session(&self) -> SegmentationResult<Session> {
        let model_bytes =
            std::fs::read(&self.model_path).map_err(|source| SegmentationError::ModelLoad {
                path: self.model_path.clone(),
                source,
            })?;
        info!(
            "Loaded segmentation model ({:.1} MB)",
            model_bytes.len() as f64 / 1_048_576.0
        );
        build_session(&model_bytes)
    }

    fn infer(
        session: &mut Session,
        img: &DynamicImage,
        target_size: u32,
    ) -> SegmentationResult<GrayImage> {
        let orig_width = img.width();
        let orig_height = img.height();
        let target = target_size as usize;

        // Resize to the model's square input and normalize to [-0.5, 0.5]
        let resized = img.resize_exact(
            target_size,
            target_size,
            image::imageops::FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        let mut input_array = Array4::<f32>::zeros((1, 3, target, target));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            input_array[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0 - 0.5;
            input_array[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0 - 0.5;
            input_array[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0 - 0.5;
        }

        let input_value = ort::value::Value::from_array(input_array)?;
        let outputs = session.run(ort::inputs!["input" => input_value])?;

        // Single-channel matte [1, 1, target, target]
        let (_shape, matte_data) = outputs["output"].try_extract_tensor::<f32>()?;
        if matte_data.len() != target * target {
            return Err(SegmentationError::MatteShape {
                expected: target * target,
                actual: matte_data.len(),
            });
        }

        let normalized = normalize_matte(matte_data);
        let matte_img = GrayImage::from_vec(target_size, target_size, normalized).ok_or(
            SegmentationError::MatteShape {
                expected: target * target,
                actual: 0,
            },
        )?;

        // Scale the matte back to the source dimensions
        let matte = image::imageops::resize(
            &matte_img,
            orig_width,
            orig_height,
            image::imageops::FilterType::Triangle,
        );

        Ok(matte)
    }
}

fn build_session(model_bytes: &[u8]) -> SegmentationResult<Session> {
    let mut providers = Vec::new();
    #[cfg(feature = "cuda")]
    providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    #[cfg(feature = "coreml")]
    providers.push(ort::execution_providers::CoreMLExecutionProvider::default().build());
    providers.push(ort::execution_providers::CPUExecutionProvider::default().build());

    let session = Session::builder()?
        .with_execution_providers(providers)?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(num_cpus::get().min(4))?
        .with_inter_threads(1)?
        .commit_from_memory(model_bytes)?;

    Ok(session)
}

/// Min-max normalize raw matte logits into 0..=255 alpha values.
fn normalize_matte(values: &[f32]) -> Vec<u8> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
    }
    let range = (max - min).max(f32::EPSILON);
    values
        .iter()
        .map(|&v| (((v - min) / range) * 255.0).round() as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_matte_spans_full_range() {
        let out = normalize_matte(&[0.0, 0.5, 1.0]);
        assert_eq!(out, vec![0, 128, 255]);
    }

    #[test]
    fn normalize_matte_handles_constant_input() {
        let out = normalize_matte(&[0.7, 0.7, 0.7]);
        assert_eq!(out, vec![0, 0, 0]);
    }
}
