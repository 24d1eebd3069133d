//! Prometheus metrics for the bootstrap
//!
//! Instruments are created once on a process-wide [`METRICS`] and exported
//! through an OpenTelemetry Prometheus reader bound to a private registry.
//! [`BootstrapMetrics::gather`] renders the registry in the text exposition
//! format.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::time::Duration;

pub static METRICS: Lazy<BootstrapMetrics> = Lazy::new(BootstrapMetrics::init);

pub struct BootstrapMetrics {
    registry: Registry,
    // Keeps the Prometheus reader alive for the life of the process.
    _provider: Option<SdkMeterProvider>,
    pub statements_total: Counter<u64>,
    pub statement_errors_total: Counter<u64>,
    pub statement_duration: Histogram<f64>,
    pub connection_wait_duration: Histogram<f64>,
    pub phase_statements_failed: Counter<u64>,
}

impl BootstrapMetrics {
    pub fn init() -> Self {
        let registry = Registry::new();
        let provider = match opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
        {
            Ok(exporter) => Some(SdkMeterProvider::builder().with_reader(exporter).build()),
            Err(e) => {
                log::warn!("Prometheus exporter unavailable, metrics are not exported: {e}");
                None
            }
        };
        let meter: Meter = match &provider {
            Some(provider) => provider.meter("insurforce"),
            None => global::meter("insurforce"),
        };

        let statements_total = meter
            .u64_counter("insurforce_statements_total")
            .with_description("Statements sent to the database")
            .build();

        let statement_errors_total = meter
            .u64_counter("insurforce_statement_errors_total")
            .with_description("Statements rejected by the database")
            .build();

        let statement_duration = meter
            .f64_histogram("insurforce_statement_duration_seconds")
            .with_description("Duration of statements")
            .build();

        let connection_wait_duration = meter
            .f64_histogram("insurforce_connection_wait_seconds")
            .with_description("Time spent waiting for the database to accept a connection")
            .build();

        let phase_statements_failed = meter
            .u64_counter("insurforce_phase_statements_failed_total")
            .with_description("Failed statements per bootstrap phase")
            .build();

        Self {
            registry,
            _provider: provider,
            statements_total,
            statement_errors_total,
            statement_duration,
            connection_wait_duration,
            phase_statements_failed,
        }
    }

    pub fn record_statement_duration(&self, elapsed: Duration) {
        self.statements_total.add(1, &[]);
        self.statement_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_statement_error(&self) {
        self.statement_errors_total.add(1, &[]);
    }

    pub fn record_connection_wait(&self, waited: Duration) {
        self.connection_wait_duration.record(waited.as_secs_f64(), &[]);
    }

    pub fn record_phase_failures(&self, phase: &'static str, failed: usize) {
        self.phase_statements_failed
            .add(failed as u64, &[KeyValue::new("phase", phase)]);
    }

    /// Current values in the Prometheus text format
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            log::warn!("Could not encode metrics: {e}");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
