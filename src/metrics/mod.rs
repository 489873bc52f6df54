//! Timings and counts of snapshot operations.
//!
//! Instruments come from the global meter, so they are no-ops until
//! [`initialize_metrics`] installs the Prometheus exporter.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Histogram;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::new_view;
use opentelemetry_sdk::metrics::Aggregation;
use opentelemetry_sdk::metrics::Instrument;
use opentelemetry_sdk::metrics::MeterProvider;
use opentelemetry_sdk::metrics::Stream;
use prometheus::default_registry;
use prometheus::Encoder;
use prometheus::TextEncoder;

use crate::comm::ParticipantIndex;
use crate::errors::Result;
use crate::errors::SnapshotError;

#[macro_export]
macro_rules! with_timer {
    ($histogram: expr, $labels: expr, $body: expr) => {{
        let now = std::time::Instant::now();
        let res = $body;
        $histogram.record(now.elapsed().as_secs_f64(), &$labels);
        res
    }};
}

/// Initialize the global registry for Prometheus metrics,
/// and create a global MeterProvider.
pub fn initialize_metrics() -> Result<()> {
    // The default registry is a lazy static; touch it so the exporter
    // and `render_metrics` share it.
    let registry = default_registry();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .with_namespace("amrsnap")
        .build()
        .map_err(|err| SnapshotError::Metrics(err.to_string()))?;

    let provider = MeterProvider::builder()
        .with_reader(exporter)
        .with_view(
            new_view(
                Instrument::new().name("*duration*"), // Must match histogram name
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![
                        0.0, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                        300.0, 900.0,
                    ],
                    record_min_max: true,
                }),
            )
            .map_err(|err| SnapshotError::Metrics(err.to_string()))?,
        )
        .build();
    global::set_meter_provider(provider);
    Ok(())
}

/// Prometheus text exposition of everything recorded so far.
pub fn render_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&default_registry().gather(), &mut buffer)
        .map_err(|err| SnapshotError::Metrics(err.to_string()))?;
    String::from_utf8(buffer).map_err(|err| SnapshotError::Metrics(err.to_string()))
}

/// Instruments shared by the snapshot writers and the restarter.
pub(crate) struct SnapshotMetrics {
    pub(crate) checkpoint_write: Histogram<f64>,
    pub(crate) plot_write: Histogram<f64>,
    pub(crate) restart: Histogram<f64>,
    pub(crate) fabs_written: Counter<u64>,
    pub(crate) labels: Vec<KeyValue>,
}

impl SnapshotMetrics {
    pub(crate) fn new(participant: ParticipantIndex) -> Self {
        let meter = global::meter("amrsnap");
        Self {
            checkpoint_write: meter
                .f64_histogram("checkpoint_write_duration_seconds")
                .with_description("time to write one checkpoint, all levels")
                .init(),
            plot_write: meter
                .f64_histogram("plot_write_duration_seconds")
                .with_description("time to write one plot file, all levels")
                .init(),
            restart: meter
                .f64_histogram("restart_duration_seconds")
                .with_description("time to restore state from a checkpoint")
                .init(),
            fabs_written: meter
                .u64_counter("fabs_written")
                .with_description("fabs this participant wrote to array storage")
                .init(),
            labels: vec![KeyValue::new("participant", participant.0 as i64)],
        }
    }
}

#[test]
fn instruments_work_without_exporter() {
    let metrics = SnapshotMetrics::new(ParticipantIndex(3));
    let doubled = with_timer!(metrics.restart, metrics.labels, 21 * 2);
    metrics.fabs_written.add(4, &metrics.labels);
    assert_eq!(doubled, 42);
}
