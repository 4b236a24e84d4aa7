//! Prometheus metrics for the gateway
//!
//! Each `GatewayMetrics` owns its registry, so independent gateways (and
//! tests) never collide on metric registration.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

/// Metrics for request handling, descriptor resolution and backend calls
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    /// Requests by endpoint and response status
    pub requests_total: Arc<CounterVec>,

    /// Request latency by endpoint
    pub request_duration_seconds: Arc<HistogramVec>,

    /// Descriptor lookups by result: hit, miss, descriptor, direct_file
    pub descriptor_lookups_total: Arc<CounterVec>,

    /// Backend calls by operation (stat, read) and outcome
    pub backend_calls_total: Arc<CounterVec>,
}

impl GatewayMetrics {
    /// Create metrics registered in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered in the given registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = CounterVec::new(
            Opts::new("sep_gateway_requests_total", "Total number of HTTP requests"),
            &["endpoint", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sep_gateway_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["endpoint"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let descriptor_lookups_total = CounterVec::new(
            Opts::new(
                "sep_gateway_descriptor_lookups_total",
                "Descriptor lookups by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(descriptor_lookups_total.clone()))?;

        let backend_calls_total = CounterVec::new(
            Opts::new("sep_gateway_backend_calls_total", "Backend calls by operation and outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(backend_calls_total.clone()))?;

        Ok(Self {
            registry,
            requests_total: Arc::new(requests_total),
            request_duration_seconds: Arc::new(request_duration_seconds),
            descriptor_lookups_total: Arc::new(descriptor_lookups_total),
            backend_calls_total: Arc::new(backend_calls_total),
        })
    }

    /// Record a completed HTTP request
    pub fn record_request(&self, endpoint: &str, status: u16, duration: Duration) {
        self.requests_total
            .with_label_values(&[endpoint, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[endpoint])
            .observe(duration.as_secs_f64());
    }

    /// Record a descriptor lookup step
    pub fn record_descriptor_lookup(&self, result: &str) {
        self.descriptor_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a backend call
    pub fn record_backend_call(&self, operation: &str, outcome: &str) {
        self.backend_calls_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Render every metric in Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
