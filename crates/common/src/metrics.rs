//! Metrics collection for PdfAsk
//!
//! This module provides Prometheus metrics for observability.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for PdfAsk
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub inference: InferenceMetrics,
    pub upload: UploadMetrics,
}

/// Stream supervision metrics
#[derive(Debug, Clone)]
pub struct InferenceMetrics {
    /// Total number of sessions started
    pub sessions_total: IntCounter,

    /// Sessions that reached Completed
    pub sessions_completed: IntCounter,

    /// Sessions that reached TimedOut
    pub sessions_timed_out: IntCounter,

    /// Sessions that reached Failed
    pub sessions_failed: IntCounter,

    /// Failed sessions whose backend exited cleanly without output
    pub empty_output_total: IntCounter,

    /// Backend processes or connections that could not be started
    pub backend_spawn_failures: IntCounter,

    /// Session duration histogram
    pub session_duration: Histogram,

    /// Time until the first chunk reached the sink
    pub time_to_first_chunk: Histogram,

    /// Bytes forwarded to sinks
    pub bytes_streamed_total: IntCounter,

    /// Current active sessions
    pub active_sessions: IntGauge,
}

/// Upload metrics
#[derive(Debug, Clone)]
pub struct UploadMetrics {
    /// Uploads accepted and extracted
    pub uploads_accepted: IntCounter,

    /// Uploads rejected with a 400
    pub uploads_rejected: IntCounter,

    /// Extraction failures
    pub extraction_failures: IntCounter,

    /// Page count distribution
    pub pages: Histogram,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("counter registered once");
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::new(name, help).expect("valid gauge definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("gauge registered once");
    metric
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    let metric = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("valid histogram definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("histogram registered once");
    metric
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let inference = InferenceMetrics {
            sessions_total: counter(
                &registry,
                "inference_sessions_total",
                "Total number of inference sessions started",
            ),
            sessions_completed: counter(
                &registry,
                "inference_sessions_completed_total",
                "Sessions that completed successfully",
            ),
            sessions_timed_out: counter(
                &registry,
                "inference_sessions_timed_out_total",
                "Sessions that hit their deadline",
            ),
            sessions_failed: counter(
                &registry,
                "inference_sessions_failed_total",
                "Sessions that ended in failure",
            ),
            empty_output_total: counter(
                &registry,
                "inference_empty_output_total",
                "Backends that exited successfully without output",
            ),
            backend_spawn_failures: counter(
                &registry,
                "inference_backend_spawn_failures_total",
                "Backends that could not be started",
            ),
            session_duration: histogram(
                &registry,
                "inference_session_duration_seconds",
                "Inference session duration in seconds",
                vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 45.0, 90.0, 180.0],
            ),
            time_to_first_chunk: histogram(
                &registry,
                "inference_time_to_first_chunk_seconds",
                "Time until the first chunk reached the client",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            ),
            bytes_streamed_total: counter(
                &registry,
                "inference_bytes_streamed_total",
                "Bytes forwarded to clients",
            ),
            active_sessions: gauge(
                &registry,
                "inference_active_sessions",
                "Current number of in-flight sessions",
            ),
        };

        let upload = UploadMetrics {
            uploads_accepted: counter(
                &registry,
                "upload_accepted_total",
                "Uploads extracted successfully",
            ),
            uploads_rejected: counter(
                &registry,
                "upload_rejected_total",
                "Uploads rejected as invalid",
            ),
            extraction_failures: counter(
                &registry,
                "upload_extraction_failures_total",
                "Uploads whose text could not be extracted",
            ),
            pages: histogram(
                &registry,
                "upload_pages",
                "Page count of accepted uploads",
                vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 20.0],
            ),
        };

        MetricsRegistry {
            registry,
            inference,
            upload,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active session gauge when dropped
pub struct ActiveSessionGuard {
    gauge: IntGauge,
}

impl ActiveSessionGuard {
    pub fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.inference.sessions_total.inc();
        metrics.upload.pages.observe(3.0);

        let output = metrics.gather();
        assert!(output.contains("inference_sessions_total"));
        assert!(output.contains("upload_pages"));
    }

    #[test]
    fn test_active_session_guard() {
        let metrics = MetricsRegistry::new();

        {
            let _guard = ActiveSessionGuard::new(&metrics.inference.active_sessions);
            assert_eq!(metrics.inference.active_sessions.get(), 1);
        }

        assert_eq!(metrics.inference.active_sessions.get(), 0);
    }
}
