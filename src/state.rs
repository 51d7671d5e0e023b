//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Contents:
//! - **config**: current configuration, replaceable at runtime
//! - **metrics**: per-endpoint request metrics written by the middleware
//! - **store** / **hub**: lobby registry and connection routing
//! - **persistence**: finished measurements
//! - **pipeline**: analysis pipeline for the configured excitation, rebuilt
//!   whenever the excitation or analysis settings change
//!
//! Handlers take a [`LobbyContext`] snapshot per request, so a running
//! measurement keeps the settings and pipeline it started with.

use crate::analysis::pipeline::AnalysisPipeline;
use crate::config::AppConfig;
use crate::lobby::{ConnectionHub, LobbyContext, MeasurementStats, SessionStore};
use crate::persistence::{InMemoryMeasurementStore, MeasurementStore};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::info;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    /// When the server started (never changes)
    pub start_time: Instant,
    pub store: Arc<SessionStore>,
    pub hub: Arc<ConnectionHub>,
    pub persistence: Arc<dyn MeasurementStore>,
    pub stats: Arc<MeasurementStats>,
    pipeline: Arc<RwLock<Arc<AnalysisPipeline>>>,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Cumulative processing time in milliseconds
    pub total_duration_ms: u64,
    pub error_count: u64,
}

fn build_pipeline(config: &AppConfig) -> anyhow::Result<AnalysisPipeline> {
    let excitation = &config.excitation;
    let pipeline = AnalysisPipeline::new(
        excitation.sweep().generate(),
        excitation.sample_rate,
        config.analysis.ir_threshold,
        config.analysis.include_impulse_response,
    )?;
    Ok(pipeline)
}

impl AppState {
    /// Create the state for a validated configuration.
    ///
    /// Fails when the analysis pipeline cannot be built for the configured
    /// excitation.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let pipeline = build_pipeline(&config)?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            store: Arc::new(SessionStore::new()),
            hub: Arc::new(ConnectionHub::new()),
            persistence: Arc::new(InMemoryMeasurementStore::new()),
            stats: Arc::new(MeasurementStats::default()),
            pipeline: Arc::new(RwLock::new(Arc::new(pipeline))),
        })
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// A new pipeline is built before anything is swapped, so a failure
    /// leaves both the configuration and the pipeline untouched.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;

        let current = self.get_config();
        let rebuild =
            current.excitation != new_config.excitation || current.analysis != new_config.analysis;
        if rebuild {
            let pipeline = build_pipeline(&new_config).map_err(|e| e.to_string())?;
            *write(&self.pipeline) = Arc::new(pipeline);
            info!(
                sample_rate = new_config.excitation.sample_rate,
                bands = self.pipeline().center_frequencies().len(),
                "Analysis pipeline rebuilt"
            );
        }

        *write(&self.config) = new_config;
        Ok(())
    }

    pub fn pipeline(&self) -> Arc<AnalysisPipeline> {
        read(&self.pipeline).clone()
    }

    /// Everything a lobby operation needs, snapshotted now.
    pub fn lobby_context(&self) -> LobbyContext {
        LobbyContext {
            store: self.store.clone(),
            transport: self.hub.clone(),
            persistence: self.persistence.clone(),
            pipeline: self.pipeline(),
            settings: read(&self.config).measurement.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn increment_request_count(&self) {
        write(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write(&self.metrics).error_count += 1;
    }

    /// Record one finished request for `endpoint`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Clone of the metrics, so no lock is held while responding.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
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

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
