//! Observability hooks
//!
//! With the `metrics` feature, [`METRICS`] records migration activity through
//! OpenTelemetry instruments exported to a Prometheus registry. With the `tracing`
//! feature, [`tracing_helpers`] builds the spans wrapped around migration runs,
//! lock waits and setup.

#[cfg(feature = "metrics")]
pub use self::otel::{MigrationMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        metrics::{Counter, Histogram, MeterProvider},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<MigrationMetrics> = Lazy::new(MigrationMetrics::init);

    pub struct MigrationMetrics {
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub changesets_applied: Counter<u64>,
        pub lock_checks: Counter<u64>,
        pub statement_failures: Counter<u64>,
        pub migration_duration: Histogram<f64>,
    }

    impl MigrationMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => SdkMeterProvider::builder().with_reader(exporter).build(),
                Err(e) => {
                    log::error!("Failed to build prometheus exporter, metrics disabled: {e:?}");
                    SdkMeterProvider::builder().build()
                }
            };
            let meter = provider.meter("drydock");

            let changesets_applied = meter
                .u64_counter("drydock_changesets_applied_total")
                .with_description("Changesets applied by Up")
                .build();

            let lock_checks = meter
                .u64_counter("drydock_lock_checks_total")
                .with_description("Migration lock checks made while waiting")
                .build();

            let statement_failures = meter
                .u64_counter("drydock_forced_statement_failures_total")
                .with_description("Statements skipped by a forced migration")
                .build();

            let migration_duration = meter
                .f64_histogram("drydock_migration_duration_seconds")
                .with_description("Duration of migration runs")
                .build();

            Self {
                registry,
                provider,
                changesets_applied,
                lock_checks,
                statement_failures,
                migration_duration,
            }
        }

        pub fn record_changesets_applied(&self, count: u64) {
            self.changesets_applied.add(count, &[]);
        }

        pub fn record_lock_check(&self) {
            self.lock_checks.add(1, &[]);
        }

        pub fn record_statement_failure(&self) {
            self.statement_failures.add(1, &[]);
        }

        pub fn record_migration(&self, direction: &'static str, elapsed: Duration) {
            self.migration_duration
                .record(elapsed.as_secs_f64(), &[KeyValue::new("direction", direction)]);
        }

        /// Prometheus text exposition of everything recorded so far
        pub fn render(&self) -> Result<String, prometheus::Error> {
            if let Err(e) = self.provider.force_flush() {
                log::debug!("Metric flush failed: {e:?}");
            }
            let mut buf = Vec::new();
            TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
            String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_recorded_counters_are_rendered() {
            METRICS.record_changesets_applied(2);
            METRICS.record_lock_check();
            METRICS.record_migration("up", Duration::from_millis(12));
            let text = METRICS.render().unwrap();
            assert!(text.contains("drydock_changesets_applied_total"), "{text}");
            assert!(text.contains("drydock_migration_duration_seconds"));
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn migrate_span(direction: &str) -> Span {
        info_span!("drydock.migrate", direction = direction)
    }

    pub fn lock_wait_span() -> Span {
        info_span!("drydock.lock_wait")
    }

    pub fn setup_span() -> Span {
        info_span!("drydock.setup")
    }
}
