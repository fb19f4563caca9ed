use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics collector for the pipeline service.
///
/// Tracks upload outcomes, segmentation fallbacks, analyzer usage, and
/// stage durations. Thread-safe and shared across the application.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Signing
    credentials_issued: AtomicUsize,

    // Transform stage
    backgrounds_removed: AtomicUsize,
    backgrounds_skipped_on_error: AtomicUsize,
    transform_duration_ms: RwLock<Vec<u64>>,

    // Upload stage
    uploads_success: AtomicUsize,
    uploads_failed: AtomicUsize,
    upload_duration_ms: RwLock<Vec<u64>>,

    // Analyzer
    analysis_calls_total: AtomicUsize,
    analysis_calls_success: AtomicUsize,
    analysis_calls_failed: AtomicUsize,
    analysis_model_fallbacks: AtomicUsize,
    analysis_duration_ms: RwLock<Vec<u64>>,

    // Category cache
    category_refreshes: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                credentials_issued: AtomicUsize::new(0),
                backgrounds_removed: AtomicUsize::new(0),
                backgrounds_skipped_on_error: AtomicUsize::new(0),
                transform_duration_ms: RwLock::new(Vec::new()),
                uploads_success: AtomicUsize::new(0),
                uploads_failed: AtomicUsize::new(0),
                upload_duration_ms: RwLock::new(Vec::new()),
                analysis_calls_total: AtomicUsize::new(0),
                analysis_calls_success: AtomicUsize::new(0),
                analysis_calls_failed: AtomicUsize::new(0),
                analysis_model_fallbacks: AtomicUsize::new(0),
                analysis_duration_ms: RwLock::new(Vec::new()),
                category_refreshes: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_credential_issued(&self) {
        self.inner.credentials_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_removed(&self) {
        self.inner.backgrounds_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_skipped(&self) {
        self.inner
            .backgrounds_skipped_on_error
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform_duration(&self, duration: Duration) {
        self.inner
            .transform_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_upload(&self, success: bool, duration: Duration) {
        if success {
            self.inner.uploads_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.uploads_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .upload_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_analysis(&self, success: bool, duration: Duration) {
        self.inner.analysis_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner
                .analysis_calls_success
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .analysis_calls_failed
                .fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .analysis_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_model_fallback(&self) {
        self.inner
            .analysis_model_fallbacks
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_category_refresh(&self) {
        self.inner.category_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let transform_durations = self.inner.transform_duration_ms.read();
        let transform_avg = avg(&transform_durations);
        drop(transform_durations);

        let upload_durations = self.inner.upload_duration_ms.read();
        let upload_avg = avg(&upload_durations);
        let upload_p95 = percentile(&upload_durations, 0.95);
        drop(upload_durations);

        let analysis_durations = self.inner.analysis_duration_ms.read();
        let analysis_avg = avg(&analysis_durations);
        let analysis_p95 = percentile(&analysis_durations, 0.95);
        drop(analysis_durations);

        MetricsSnapshot {
            credentials_issued: self.inner.credentials_issued.load(Ordering::Relaxed),
            backgrounds_removed: self.inner.backgrounds_removed.load(Ordering::Relaxed),
            backgrounds_skipped_on_error: self
                .inner
                .backgrounds_skipped_on_error
                .load(Ordering::Relaxed),
            transform_avg_ms: transform_avg,
            uploads_success: self.inner.uploads_success.load(Ordering::Relaxed),
            uploads_failed: self.inner.uploads_failed.load(Ordering::Relaxed),
            upload_avg_ms: upload_avg,
            upload_p95_ms: upload_p95,
            analysis_calls_total: self.inner.analysis_calls_total.load(Ordering::Relaxed),
            analysis_calls_success: self.inner.analysis_calls_success.load(Ordering::Relaxed),
            analysis_calls_failed: self.inner.analysis_calls_failed.load(Ordering::Relaxed),
            analysis_model_fallbacks: self
                .inner
                .analysis_model_fallbacks
                .load(Ordering::Relaxed),
            analysis_avg_ms: analysis_avg,
            analysis_p95_ms: analysis_p95,
            category_refreshes: self.inner.category_refreshes.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP credentials_issued_total Upload credentials issued
# TYPE credentials_issued_total counter
credentials_issued_total {{}} {}

# HELP backgrounds_removed_total Images with background removed
# TYPE backgrounds_removed_total counter
backgrounds_removed_total {{}} {}

# HELP backgrounds_skipped_total Images where segmentation failed and the cropped image was kept
# TYPE backgrounds_skipped_total counter
backgrounds_skipped_total {{}} {}

# HELP transform_avg_ms Average transform stage duration in milliseconds
# TYPE transform_avg_ms gauge
transform_avg_ms {{}} {}

# HELP uploads_success_total Successful asset uploads
# TYPE uploads_success_total counter
uploads_success_total {{}} {}

# HELP uploads_failed_total Failed asset uploads
# TYPE uploads_failed_total counter
uploads_failed_total {{}} {}

# HELP upload_avg_ms Average upload duration in milliseconds
# TYPE upload_avg_ms gauge
upload_avg_ms {{}} {}

# HELP analysis_calls_total Total analyzer runs
# TYPE analysis_calls_total counter
analysis_calls_total {{}} {}

# HELP analysis_calls_success Successful analyzer runs
# TYPE analysis_calls_success counter
analysis_calls_success {{}} {}

# HELP analysis_calls_failed Failed analyzer runs
# TYPE analysis_calls_failed counter
analysis_calls_failed {{}} {}

# HELP analysis_model_fallbacks_total Times the analyzer moved to the next model
# TYPE analysis_model_fallbacks_total counter
analysis_model_fallbacks_total {{}} {}

# HELP analysis_avg_ms Average analyzer duration in milliseconds
# TYPE analysis_avg_ms gauge
analysis_avg_ms {{}} {}

# HELP category_refreshes_total Category cache refreshes
# TYPE category_refreshes_total counter
category_refreshes_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.credentials_issued,
            snapshot.backgrounds_removed,
            snapshot.backgrounds_skipped_on_error,
            snapshot.transform_avg_ms,
            snapshot.uploads_success,
            snapshot.uploads_failed,
            snapshot.upload_avg_ms,
            snapshot.analysis_calls_total,
            snapshot.analysis_calls_success,
            snapshot.analysis_calls_failed,
            snapshot.analysis_model_fallbacks,
            snapshot.analysis_avg_ms,
            snapshot.category_refreshes,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub credentials_issued: usize,
    pub backgrounds_removed: usize,
    pub backgrounds_skipped_on_error: usize,
    pub transform_avg_ms: u64,
    pub uploads_success: usize,
    pub uploads_failed: usize,
    pub upload_avg_ms: u64,
    pub upload_p95_ms: u64,
    pub analysis_calls_total: usize,
    pub analysis_calls_success: usize,
    pub analysis_calls_failed: usize,
    pub analysis_model_fallbacks: usize,
    pub analysis_avg_ms: u64,
    pub analysis_p95_ms: u64,
    pub category_refreshes: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_upload(true, Duration::from_millis(100));
        metrics.record_upload(false, Duration::from_millis(50));
        metrics.record_background_removed();
        metrics.record_background_skipped();
        metrics.record_analysis(true, Duration::from_millis(300));
        metrics.record_model_fallback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.uploads_success, 1);
        assert_eq!(snapshot.uploads_failed, 1);
        assert_eq!(snapshot.backgrounds_removed, 1);
        assert_eq!(snapshot.backgrounds_skipped_on_error, 1);
        assert_eq!(snapshot.analysis_calls_total, 1);
        assert_eq!(snapshot.analysis_model_fallbacks, 1);
        assert_eq!(snapshot.upload_avg_ms, 75);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_upload(true, Duration::from_millis(100));

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("uploads_success_total {} 1"));
        assert!(prometheus.contains("uploads_failed_total {} 0"));
    }
}
