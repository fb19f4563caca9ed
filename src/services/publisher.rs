// Asset publisher: signed multipart upload plus serve-time URL transforms

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::core::config::AssetHostConfig;
use crate::core::errors::{UploadError, UploadResult};
use crate::core::types::BackgroundStyle;
use crate::services::signing::CredentialSigner;

/// A published asset. `url` is what the storefront serves (style token
/// applied); `transparent_url` always points at the raw stored blob.
#[derive(Debug, Clone)]
pub struct PublishedAsset {
    pub url: String,
    pub transparent_url: String,
}

pub struct AssetPublisher {
    client: reqwest::Client,
    signer: CredentialSigner,
    upload_endpoint: String,
}

impl AssetPublisher {
    pub fn new(config: &AssetHostConfig) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            signer: CredentialSigner::new(config),
            upload_endpoint: format!(
                "{}/{}/image/upload",
                config.upload_base_url.trim_end_matches('/'),
                config.cloud_name
            ),
        })
    }

    /// Upload a processed PNG blob with a freshly signed credential.
    #[instrument(skip(self, png_bytes), fields(bytes = png_bytes.len()))]
    pub async fn publish(&self, png_bytes: Vec<u8>) -> UploadResult<String> {
        let credential = self.signer.issue()?;
        let endpoint = &self.upload_endpoint;

        let form = Form::new()
            .part(
                "file",
                Part::bytes(png_bytes)
                    .file_name("image.png")
                    .mime_str("image/png")?,
            )
            .text("api_key", credential.api_key)
            .text("timestamp", credential.timestamp.to_string())
            .text("signature", credential.signature)
            .text("folder", credential.folder);

        debug!("Uploading asset to {}", endpoint);
        let response = self.client.post(endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        let body: UploadResponse = response.json().await?;
        let url = body.secure_url.ok_or(UploadError::MalformedResponse)?;
        info!("Asset published: {}", url);
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

/// Apply a serve-time background style to an asset URL.
///
/// Solid colours become a `b_rgb:<hex>` path segment after `/upload/`;
/// transparency needs no token since the stored blob is transparent.
pub fn apply_style(url: &str, style: &BackgroundStyle) -> String {
    match style {
        BackgroundStyle::Transparent => url.to_string(),
        BackgroundStyle::SolidColor { hex } => {
            let hex = hex.trim_start_matches('#');
            insert_transformation(url, &format!("b_rgb:{hex}"))
        }
    }
}

/// Bandwidth-optimised variant of an asset URL for analyzer fetches.
pub fn optimize_url(url: &str, width: u32, quality: u8) -> String {
    insert_transformation(url, &format!("w_{width},c_limit,q_{quality}"))
}

fn insert_transformation(url: &str, token: &str) -> String {
    match url.find("/upload/") {
        Some(idx) => {
            let split = idx + "/upload/".len();
            format!("{}{}/{}", &url[..split], token, &url[split..])
        }
        // Not an asset-host delivery URL; leave it untouched
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://res.cloudinary.com/demo/image/upload/v123/aura-flowers/rose.png";

    #[test]
    fn solid_color_style_inserts_token() {
        let styled = apply_style(
            URL,
            &BackgroundStyle::SolidColor {
                hex: "#F5F0EB".to_string(),
            },
        );
        assert_eq!(
            styled,
            "https://res.cloudinary.com/demo/image/upload/b_rgb:F5F0EB/v123/aura-flowers/rose.png"
        );
    }

    #[test]
    fn transparent_style_leaves_url_unchanged() {
        assert_eq!(apply_style(URL, &BackgroundStyle::Transparent), URL);
    }

    #[test]
    fn optimize_url_inserts_limit_params() {
        assert_eq!(
            optimize_url(URL, 512, 70),
            "https://res.cloudinary.com/demo/image/upload/w_512,c_limit,q_70/v123/aura-flowers/rose.png"
        );
    }

    #[test]
    fn non_delivery_url_is_untouched() {
        let url = "https://example.com/photo.png";
        assert_eq!(optimize_url(url, 512, 70), url);
    }
}
