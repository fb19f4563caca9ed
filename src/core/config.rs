use crate::core::errors::ConfigError;
use std::env;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Asset host (Cloudinary-style) configuration
#[derive(Debug, Clone)]
pub struct AssetHostConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub upload_folder: String,
    pub upload_base_url: String,
}

/// Metadata analyzer configuration
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub api_key: String,
    /// Priority-ordered model list; earlier entries are tried first.
    pub models: Vec<String>,
    pub image_width: u32,
    pub image_quality: u8,
    pub request_timeout_secs: u64,
}

/// Background segmentation configuration
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    pub model_path: String,
    /// Square input size the matting model expects.
    pub target_size: u32,
}

/// Catalog service configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub asset_host: AssetHostConfig,
    pub analyzer: AnalyzerConfig,
    pub segmentation: SegmentationConfig,
    pub catalog: CatalogConfig,
}

const DEFAULT_MODELS: [&str; 4] = [
    "gemini-2.5-flash",
    "gemini-2.0-flash-lite",
    "gemini-flash-latest",
    "gemini-2.0-flash",
];

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Self {
        // Model priority list from environment (comma-separated) or defaults
        let models: Vec<String> = env::var("GEMINI_MODELS")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODELS.iter().map(|s| s.to_string()).collect());

        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Self {
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1430),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            asset_host: AssetHostConfig {
                cloud_name: env::var("CLOUDINARY_CLOUD_NAME").unwrap_or_default(),
                api_key: env::var("CLOUDINARY_API_KEY").unwrap_or_default(),
                // May be empty at startup; the signer rejects at call time
                api_secret: env::var("CLOUDINARY_API_SECRET").unwrap_or_default(),
                upload_folder: env::var("CLOUDINARY_UPLOAD_FOLDER")
                    .unwrap_or_else(|_| "aura-flowers".to_string()),
                upload_base_url: env::var("CLOUDINARY_UPLOAD_BASE")
                    .unwrap_or_else(|_| "https://api.cloudinary.com/v1_1".to_string()),
            },
            analyzer: AnalyzerConfig {
                api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                models,
                image_width: env::var("ANALYSIS_IMAGE_WIDTH")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(512),
                image_quality: env::var("ANALYSIS_IMAGE_QUALITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(70),
                request_timeout_secs: env::var("API_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            },
            segmentation: SegmentationConfig {
                model_path: env::var("SEGMENTATION_MODEL_PATH")
                    .unwrap_or_else(|_| "models/rmbg.onnx".to_string()),
                target_size: env::var("SEGMENTATION_TARGET_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1024),
            },
            catalog: CatalogConfig {
                base_url: env::var("CATALOG_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Note: secrets are not validated here - the signer and analyzer
        // report missing credentials at call time so the rest of the
        // service stays usable

        if !(64..=2048).contains(&self.analyzer.image_width) {
            return Err(ConfigError::InvalidAnalysisWidth(self.analyzer.image_width));
        }

        if !(1..=100).contains(&self.analyzer.image_quality) {
            return Err(ConfigError::InvalidAnalysisQuality(
                self.analyzer.image_quality,
            ));
        }

        if !(256..=2048).contains(&self.segmentation.target_size) {
            return Err(ConfigError::InvalidTargetSize(self.segmentation.target_size));
        }

        if self.analyzer.models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        if self.asset_host.upload_folder.trim().is_empty() {
            return Err(ConfigError::EmptyUploadFolder);
        }

        Ok(())
    }
}

// Note: No Default implementation because Config::new() can fail
// Users should explicitly call Config::new()? and handle errors

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                port: 1430,
                host: "0.0.0.0".to_string(),
                log_level: Level::INFO,
            },
            asset_host: AssetHostConfig {
                cloud_name: "demo".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                upload_folder: "aura-flowers".to_string(),
                upload_base_url: "https://api.cloudinary.com/v1_1".to_string(),
            },
            analyzer: AnalyzerConfig {
                api_key: String::new(),
                models: DEFAULT_MODELS.iter().map(|s| s.to_string()).collect(),
                image_width: 512,
                image_quality: 70,
                request_timeout_secs: 60,
            },
            segmentation: SegmentationConfig {
                model_path: "models/rmbg.onnx".to_string(),
                target_size: 1024,
            },
            catalog: CatalogConfig {
                base_url: "http://localhost:3000".to_string(),
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_analysis_width() {
        let mut config = base_config();
        config.analyzer.image_width = 32;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAnalysisWidth(32))
        ));
    }

    #[test]
    fn rejects_empty_model_list() {
        let mut config = base_config();
        config.analyzer.models.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoModels)));
    }

    #[test]
    fn rejects_blank_upload_folder() {
        let mut config = base_config();
        config.asset_host.upload_folder = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyUploadFolder)
        ));
    }
}
