// Signed upload gateway for the asset host

use sha1::{Digest, Sha1};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;

use crate::core::config::AssetHostConfig;
use crate::core::errors::SigningError;
use crate::core::types::UploadCredential;

/// Mints short-lived signed upload credentials.
///
/// The signature covers the sorted parameter string
/// `folder=<folder>&timestamp=<ts>` followed by the API secret, hashed
/// with SHA-1 and hex-encoded, matching what the asset host verifies.
pub struct CredentialSigner {
    cloud_name: String,
    api_key: String,
    api_secret: String,
    upload_folder: String,
}

impl CredentialSigner {
    pub fn new(config: &AssetHostConfig) -> Self {
        Self {
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            upload_folder: config.upload_folder.clone(),
        }
    }

    /// Issue a credential stamped with the current time.
    #[instrument(skip(self))]
    pub fn issue(&self) -> Result<UploadCredential, SigningError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.issue_at(timestamp)
    }

    /// Issue a credential for a specific timestamp.
    pub fn issue_at(&self, timestamp: i64) -> Result<UploadCredential, SigningError> {
        if self.api_secret.is_empty() {
            return Err(SigningError::MissingSecret);
        }

        let to_sign = format!(
            "folder={}&timestamp={}{}",
            self.upload_folder, timestamp, self.api_secret
        );
        let signature = hex::encode(Sha1::digest(to_sign.as_bytes()));

        Ok(UploadCredential {
            timestamp,
            folder: self.upload_folder.clone(),
            signature,
            api_key: self.api_key.clone(),
            cloud_name: self.cloud_name.clone(),
        })
    }
}
