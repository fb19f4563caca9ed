use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Asynchronously load an image from bytes using spawn_blocking.
///
/// Image decoding is CPU-intensive, especially for large uploads.
pub async fn load_image_from_memory_async(bytes: &[u8]) -> Result<DynamicImage> {
    let bytes = bytes.to_vec(); // Clone to move into blocking task
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).context("Failed to load image from memory")
    })
    .await
    .context("Failed to spawn blocking task for image loading")?
}

/// Asynchronously crop an image using spawn_blocking to avoid blocking the async runtime.
pub async fn crop_image_async(
    img: DynamicImage,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<DynamicImage> {
    tokio::task::spawn_blocking(move || {
        let cropped = img.crop_imm(x, y, width, height);
        Ok(cropped)
    })
    .await
    .context("Failed to spawn blocking task for image cropping")?
}

/// Asynchronously encode an image to PNG bytes using spawn_blocking.
///
/// PNG encoding is CPU-intensive and can block the async runtime if done synchronously.
pub async fn encode_png_async(img: DynamicImage) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let mut png_bytes = Vec::new();
        let mut cursor = Cursor::new(&mut png_bytes);
        img.write_to(&mut cursor, ImageFormat::Png)
            .context("Failed to encode image as PNG")?;
        Ok(png_bytes)
    })
    .await
    .context("Failed to spawn blocking task for PNG encoding")?
}

/// Apply a single-channel alpha matte to an image.
///
/// The matte must match the image dimensions; each luma value becomes the
/// pixel's alpha channel, leaving RGB untouched.
pub fn apply_alpha_matte(img: &DynamicImage, matte: &GrayImage) -> RgbaImage {
    let mut rgba = img.to_rgba8();
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        pixel.0[3] = matte.get_pixel(x, y).0[0];
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[tokio::test]
    async fn test_crop_async() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            100,
            100,
            Rgba([255, 0, 0, 255]),
        ));

        let cropped = crop_image_async(img, 10, 10, 30, 40).await.unwrap();
        assert_eq!(cropped.width(), 30);
        assert_eq!(cropped.height(), 40);
    }

    #[tokio::test]
    async fn test_load_image_async() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 255])));
        let mut png_bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .unwrap();

        let result = load_image_from_memory_async(&png_bytes).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_encode_png_async() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255])));
        let png_bytes = encode_png_async(img).await.unwrap();
        assert!(!png_bytes.is_empty());
    }

    #[test]
    fn test_apply_alpha_matte() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])));
        let mut matte = GrayImage::from_pixel(2, 2, Luma([0]));
        matte.put_pixel(1, 1, Luma([200]));

        let out = apply_alpha_matte(&img, &matte);
        assert_eq!(out.get_pixel(0, 0).0, [10, 20, 30, 0]);
        assert_eq!(out.get_pixel(1, 1).0, [10, 20, 30, 200]);
    }
}
