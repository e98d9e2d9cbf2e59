//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler and WebSocket actor:
//! the loaded configuration, runtime metrics, and the server start time.
//! Uses the Arc<RwLock<T>> pattern so concurrent requests can read freely
//! while metric updates take a short exclusive lock.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration. Read-only after startup; the lock exists only
    /// so handlers can take cheap snapshots.
    pub config: Arc<RwLock<AppConfig>>,

    /// Runtime counters, updated by middleware and the evaluation pipeline.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started.
    pub start_time: Instant,
}

/// Runtime counters across all requests and evaluation sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP/WebSocket upgrade requests since start
    pub request_count: u64,

    /// Total failed requests since start
    pub error_count: u64,

    /// Evaluation sessions currently in flight
    pub active_sessions: u32,

    /// Evaluations that resolved with a result
    pub evaluations_completed: u64,

    /// Evaluations that resolved with an error
    pub evaluations_failed: u64,

    /// Per-endpoint request statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the current configuration. Cloning releases the lock
    /// immediately so other threads are not blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Try to claim a session slot. Returns false when the configured
    /// concurrency limit is already reached; the caller must reject the
    /// request without contacting the remote service.
    pub fn try_begin_session(&self, max_concurrent: usize) -> bool {
        let mut metrics = self.metrics.write().unwrap();
        if (metrics.active_sessions as usize) >= max_concurrent {
            return false;
        }
        metrics.active_sessions += 1;
        true
    }

    /// Release a session slot and record its outcome. Underflow-guarded so a
    /// double release cannot wrap the counter.
    pub fn end_session(&self, success: bool) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
        if success {
            metrics.evaluations_completed += 1;
        } else {
            metrics.evaluations_failed += 1;
        }
    }

    /// Consistent copy of the metrics for the /metrics endpoint.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            evaluations_completed: metrics.evaluations_completed,
            evaluations_failed: metrics.evaluations_failed,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
