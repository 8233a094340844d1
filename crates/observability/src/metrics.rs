//! Warning metrics.
//!
//! Instruments are OpenTelemetry counters on the `nightbatch` meter. Each
//! recording is also mirrored to the log under the `nightbatch::metrics`
//! target, so an installation without a metrics exporter still sees it.

use std::fmt::Display;
use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};
use tracing::warn;

pub const METER_NAME: &str = "nightbatch";
pub const WINDOW_OVERRUNS: &str = "nightbatch.window_overruns";

/// Handles to the batch engine's instruments.
#[derive(Clone)]
pub struct BatchMetrics {
    pub window_overruns: Counter<u64>,
}

impl BatchMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            window_overruns: meter
                .u64_counter(WINDOW_OVERRUNS)
                .with_description("Job executions that finished after their processing window")
                .build(),
        }
    }

    /// Report that a job execution ran past its processing window.
    ///
    /// Never aborts anything; the run has already finished when this is called.
    pub fn record_window_overrun(
        &self,
        job: &str,
        execution_id: impl Display,
        elapsed: Duration,
        window: Duration,
    ) {
        self.window_overruns
            .add(1, &[KeyValue::new("job", job.to_string())]);
        warn!(
            target: "nightbatch::metrics",
            metric = WINDOW_OVERRUNS,
            job = %job,
            execution_id = %execution_id,
            elapsed_secs = elapsed.as_secs(),
            window_secs = window.as_secs(),
            "job exceeded its processing window"
        );
    }
}

static GLOBAL: OnceLock<BatchMetrics> = OnceLock::new();

/// Instruments on the global meter provider, created on first use.
///
/// Install the process's meter provider with
/// [`opentelemetry::global::set_meter_provider`] before the first job runs.
pub fn batch_metrics() -> &'static BatchMetrics {
    GLOBAL.get_or_init(|| BatchMetrics::new(&global::meter(METER_NAME)))
}

pub fn record_window_overrun(
    job: &str,
    execution_id: impl Display,
    elapsed: Duration,
    window: Duration,
) {
    batch_metrics().record_window_overrun(job, execution_id, elapsed, window);
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    fn provider() -> (SdkMeterProvider, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        (provider, exporter)
    }

    fn overruns_by_job(exporter: &InMemoryMetricExporter) -> Vec<(String, u64)> {
        let exported = exporter.get_finished_metrics().unwrap();
        let Some(latest) = exported.last() else {
            return Vec::new();
        };
        let mut points = Vec::new();
        for metric in latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|m| m.name() == WINDOW_OVERRUNS)
        {
            if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                for point in sum.data_points() {
                    let job = point
                        .attributes()
                        .find(|kv| kv.key.as_str() == "job")
                        .map(|kv| kv.value.to_string())
                        .unwrap_or_default();
                    points.push((job, point.value()));
                }
            }
        }
        points
    }

    #[test]
    fn overrun_is_counted_per_job() {
        let (provider, exporter) = provider();
        let metrics = BatchMetrics::new(&provider.meter(METER_NAME));

        let window = Duration::from_secs(4 * 3600);
        let elapsed = Duration::from_secs(5 * 3600);
        metrics.record_window_overrun("interest-calculation", "exec-1", elapsed, window);
        metrics.record_window_overrun("interest-calculation", "exec-2", elapsed, window);
        metrics.record_window_overrun("transaction-report", "exec-3", elapsed, window);
        provider.force_flush().unwrap();

        let mut points = overruns_by_job(&exporter);
        points.sort();
        assert_eq!(
            points,
            [
                ("interest-calculation".to_string(), 2),
                ("transaction-report".to_string(), 1)
            ]
        );
    }

    #[test]
    fn nothing_is_exported_without_an_overrun() {
        let (provider, exporter) = provider();
        let _metrics = BatchMetrics::new(&provider.meter(METER_NAME));
        provider.force_flush().unwrap();
        assert!(overruns_by_job(&exporter).is_empty());
    }

    #[test]
    fn global_instruments_are_created_once() {
        assert!(std::ptr::eq(batch_metrics(), batch_metrics()));
        record_window_overrun("posting", "exec-9", Duration::from_secs(2), Duration::from_secs(1));
    }
}
