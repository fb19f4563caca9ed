// AI metadata analyzer with prioritized model fallback

use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::core::config::AnalyzerConfig;
use crate::core::errors::AnalysisError;
use crate::core::types::{AnalysisResult, CanonicalCategory};
use crate::services::publisher::optimize_url;
use crate::utils::metrics::Metrics;

/// One attempt against a single vision model, returning the raw text of
/// the model's reply. Abstracted so the fallback chain is testable
/// without a live endpoint.
pub trait ModelInvoker: Send + Sync {
    fn invoke(
        &self,
        model: &str,
    ) -> impl std::future::Future<Output = Result<String, AnalysisError>> + Send;
}

/// Walk the prioritized model list until one attempt succeeds.
///
/// Quota exhaustion moves to the next model. A rate limit with a
/// parseable wait is honoured once: sleep, retry the same model, and on
/// any retry failure move on. Every other error aborts immediately since
/// retrying elsewhere will not help.
pub async fn run_model_chain<I: ModelInvoker>(
    models: &[String],
    invoker: &I,
    metrics: Option<&Metrics>,
) -> Result<String, AnalysisError> {
    let mut last_error: Option<AnalysisError> = None;

    for model in models {
        match invoker.invoke(model).await {
            Ok(text) => return Ok(text),
            Err(err @ AnalysisError::QuotaExceeded { .. }) => {
                warn!("Model {} quota exhausted, trying next model", model);
                if let Some(m) = metrics {
                    m.record_model_fallback();
                }
                last_error = Some(err);
            }
            Err(AnalysisError::RateLimited { wait_secs, .. }) => {
                info!(
                    "Model {} rate limited, waiting {:.1}s before one retry",
                    model, wait_secs
                );
                tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
                match invoker.invoke(model).await {
                    Ok(text) => return Ok(text),
                    Err(retry_err) => {
                        warn!(
                            "Retry of model {} failed ({}), trying next model",
                            model, retry_err
                        );
                        if let Some(m) = metrics {
                            m.record_model_fallback();
                        }
                        last_error = Some(retry_err);
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }

    match last_error {
        Some(last) => Err(AnalysisError::AllModelsExhausted {
            last: Box::new(last),
        }),
        None => Err(AnalysisError::NoModels),
    }
}

/// Vision analyzer that turns a published product photo into draft
/// metadata.
pub struct MetadataAnalyzer {
    client: reqwest::Client,
    config: AnalyzerConfig,
}

impl MetadataAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(AnalysisError::Http)?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Analyze a published image and return reconciled draft metadata.
    ///
    /// The image is fetched through its bandwidth-optimised URL, sent to
    /// the model chain, and the category guess is validated against the
    /// canonical list (nulled when it matches nothing).
    #[instrument(skip(self, categories, metrics), fields(models = self.config.models.len()))]
    pub async fn analyze(
        &self,
        image_url: &str,
        categories: &[CanonicalCategory],
        metrics: Option<&Metrics>,
    ) -> Result<AnalysisResult, AnalysisError> {
        if self.config.api_key.is_empty() {
            return Err(AnalysisError::MissingApiKey);
        }

        let optimized = optimize_url(
            image_url,
            self.config.image_width,
            self.config.image_quality,
        );
        debug!("Fetching image for analysis: {}", optimized);

        let response = self
            .client
            .get(&optimized)
            .send()
            .await
            .map_err(AnalysisError::ImageFetch)?
            .error_for_status()
            .map_err(AnalysisError::ImageFetch)?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let image_bytes = response.bytes().await.map_err(AnalysisError::ImageFetch)?;

        let invoker = GeminiInvoker {
            client: self.client.clone(),
            api_key: self.config.api_key.clone(),
            prompt: build_prompt(categories),
            image_base64: general_purpose::STANDARD.encode(&image_bytes),
            mime_type,
        };

        let text = run_model_chain(&self.config.models, &invoker, metrics).await?;
        parse_analysis(&text, categories)
    }
}

/// Turn raw model output into an analysis result.
///
/// The category field is validated against the canonical slugs (exact or
/// case-insensitive); a failed validation nulls `category` but the raw
/// text survives in `category_guess` so the reconciler's label-based
/// strategies can still run downstream.
fn parse_analysis(
    text: &str,
    categories: &[CanonicalCategory],
) -> Result<AnalysisResult, AnalysisError> {
    let json_str = extract_first_json(text).ok_or(AnalysisError::JsonNotFound)?;
    let mut result: AnalysisResult = serde_json::from_str(json_str)?;
    result.category_guess = result.category.take();
    result.category = validate_category(result.category_guess.clone(), categories);
    Ok(result)
}

/// Live Gemini-style invoker used in production.
struct GeminiInvoker {
    client: reqwest::Client,
    api_key: String,
    prompt: String,
    image_base64: String,
    mime_type: String,
}

impl ModelInvoker for GeminiInvoker {
    fn invoke(
        &self,
        model: &str,
    ) -> impl std::future::Future<Output = Result<String, AnalysisError>> + Send {
        let model = model.to_string();
        async move {
            let url = format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
                model, self.api_key
            );

            let request_body = serde_json::json!({
                "contents": [{
                    "parts": [
                        {
                            "inline_data": {
                                "mime_type": self.mime_type,
                                "data": self.image_base64
                            }
                        },
                        {"text": self.prompt}
                    ]
                }],
                "generationConfig": {
                    "temperature": 0.4
                }
            });

            let response = self
                .client
                .post(&url)
                .json(&request_body)
                .send()
                .await
                .map_err(AnalysisError::Http)?;

            let status = response.status();
            let body = response.text().await.map_err(AnalysisError::Http)?;

            if !status.is_success() {
                return Err(classify_api_error(&model, status.as_u16(), &body));
            }

            let parsed: serde_json::Value = serde_json::from_str(&body)?;
            parsed["candidates"][0]["content"]["parts"][0]["text"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or(AnalysisError::MissingText)
        }
    }
}

fn build_prompt(categories: &[CanonicalCategory]) -> String {
    let slugs: Vec<&str> = categories.iter().map(|c| c.slug.as_str()).collect();
    format!(
        "You are cataloguing products for a floral boutique. Analyze the product photo \
         and respond with a single JSON object containing these fields: \
         \"title\" (a short elegant product name), \
         \"description\" (2-3 sentences for a storefront listing), \
         \"category\" (exactly one of: {}), \
         \"material\" (what the arrangement or item is made of), \
         \"dimensions\" (estimated size, or null if not inferable). \
         Use null for any field you cannot determine. Respond with the JSON object only.",
        slugs.join(", ")
    )
}

/// Classify a non-success model API response.
///
/// HTTP 429 with a parseable retry delay is a rate limit worth waiting
/// out; 429 without one, or an explicit quota message, means the model's
/// quota is gone for the day and the next model should be tried.
fn classify_api_error(model: &str, status: u16, body: &str) -> AnalysisError {
    if status == 429 {
        if let Some(wait_secs) = parse_retry_delay(body) {
            return AnalysisError::RateLimited {
                model: model.to_string(),
                wait_secs,
            };
        }
        return AnalysisError::QuotaExceeded {
            model: model.to_string(),
        };
    }

    if body.contains("RESOURCE_EXHAUSTED") || body.to_lowercase().contains("quota") {
        return AnalysisError::QuotaExceeded {
            model: model.to_string(),
        };
    }

    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.chars().take(200).collect());

    AnalysisError::Api {
        model: model.to_string(),
        status,
        message,
    }
}

/// Extract a suggested wait from an error body.
///
/// Looks for the structured `retryDelay` detail ("32s") first, then the
/// textual "retry in 26.37s" phrasing some responses use.
fn parse_retry_delay(body: &str) -> Option<f64> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(details) = value["error"]["details"].as_array() {
            for detail in details {
                if let Some(delay) = detail["retryDelay"].as_str() {
                    if let Ok(secs) = delay.trim_end_matches('s').parse::<f64>() {
                        return Some(secs);
                    }
                }
            }
        }
    }

    let lower = body.to_lowercase();
    let idx = lower.find("retry in ")?;
    let rest = &body[idx + "retry in ".len()..];
    let numeric: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.parse::<f64>().ok()
}

/// Extract the first balanced top-level JSON object from model output.
///
/// Models routinely wrap the object in prose or markdown fences; a
/// brace-balance scan that honours string literals handles both.
pub fn extract_first_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate a model's category guess against the canonical slug list.
///
/// Exact matches pass through; a case-insensitive match is rewritten to
/// the canonical slug; anything else becomes None so a wrong guess never
/// reaches the draft.
pub fn validate_category(
    guess: Option<String>,
    categories: &[CanonicalCategory],
) -> Option<String> {
    let guess = guess?;
    if categories.iter().any(|c| c.slug == guess) {
        return Some(guess);
    }
    categories
        .iter()
        .find(|c| c.slug.eq_ignore_ascii_case(&guess))
        .map(|c| c.slug.clone())
}
