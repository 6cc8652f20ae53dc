use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

pub fn low_latency_boundaries() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0,
        500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0, 10000.0,
    ]
}

pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
    instance_id: Option<&String>,
    service_version: &str,
) -> Result<Option<SdkMeterProvider>> {
    if !enable_metrics {
        return Ok(None);
    }

    let mut resource_builder = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "blobvault"))
        .with_attribute(KeyValue::new("service.name", "blobvault-server"))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ));
    if let Some(instance_id) = instance_id {
        resource_builder = resource_builder.with_attribute(KeyValue::new(
            "blobvault.instance.id",
            instance_id.to_owned(),
        ));
    }
    let resource = resource_builder.build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the elapsed time into `metric` when dropped.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start_with_labels(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), self.labels);
    }
}

pub mod blob_store_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    use crate::low_latency_boundaries;

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub operations: Counter<u64>,
        pub operation_errors: Counter<u64>,
        pub operation_bytes: Counter<u64>,
        pub operation_duration: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("blob-store");

            let operations = meter
                .u64_counter("blob_store.operations")
                .with_description("number of successful blob store operations")
                .build();
            let operation_errors = meter
                .u64_counter("blob_store.operation_errors")
                .with_description("number of failed blob store operations")
                .build();
            let operation_bytes = meter
                .u64_counter("blob_store.operation_bytes")
                .with_unit("By")
                .with_description("bytes transferred by blob store operations")
                .build();
            let operation_duration = meter
                .f64_histogram("blob_store.operation_duration")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("blob store operation latencies in seconds")
                .build();

            Metrics {
                operations,
                operation_errors,
                operation_bytes,
                operation_duration,
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    pub writes: Histogram<f64>,
    pub reads: Histogram<f64>,
    pub records_created: Counter<u64>,
    pub records_deleted: Counter<u64>,
}

impl Default for IndexMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("soft-delete-index");

        let writes = meter
            .f64_histogram("blob_store.soft_delete_index_write_duration")
            .with_unit("s")
            .with_boundaries(low_latency_boundaries())
            .with_description("soft delete index write latency in seconds")
            .build();
        let reads = meter
            .f64_histogram("blob_store.soft_delete_index_read_duration")
            .with_unit("s")
            .with_boundaries(low_latency_boundaries())
            .with_description("soft delete index read latency in seconds")
            .build();
        let records_created = meter
            .u64_counter("blob_store.soft_delete_records_created")
            .with_description("number of soft delete records created")
            .build();
        let records_deleted = meter
            .u64_counter("blob_store.soft_delete_records_deleted")
            .with_description("number of soft delete records removed")
            .build();

        Self {
            writes,
            reads,
            records_created,
            records_deleted,
        }
    }
}

pub mod jobs_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    use crate::low_latency_boundaries;

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub sweeps: Counter<u64>,
        pub sweep_hard_deletes: Counter<u64>,
        pub sweep_failures: Counter<u64>,
        pub sweep_duration: Histogram<f64>,
        pub quota_checks: Counter<u64>,
        pub quota_violations: Counter<u64>,
        pub quota_check_errors: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("blob-store-jobs");

            let sweeps = meter
                .u64_counter("blob_store.reconciliation_sweeps")
                .with_description("number of completed reconciliation sweeps")
                .build();
            let sweep_hard_deletes = meter
                .u64_counter("blob_store.reconciliation_hard_deletes")
                .with_description("number of blobs hard deleted by reconciliation")
                .build();
            let sweep_failures = meter
                .u64_counter("blob_store.reconciliation_failures")
                .with_description("number of records a sweep failed to reconcile")
                .build();
            let sweep_duration = meter
                .f64_histogram("blob_store.reconciliation_duration")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("reconciliation sweep latencies in seconds")
                .build();
            let quota_checks = meter
                .u64_counter("blob_store.quota_checks")
                .with_description("number of quota checks")
                .build();
            let quota_violations = meter
                .u64_counter("blob_store.quota_violations")
                .with_description("number of quota checks reporting a violation")
                .build();
            let quota_check_errors = meter
                .u64_counter("blob_store.quota_check_errors")
                .with_description("number of quota checks that failed")
                .build();

            Metrics {
                sweeps,
                sweep_hard_deletes,
                sweep_failures,
                sweep_duration,
                quota_checks,
                quota_violations,
                quota_check_errors,
            }
        }
    }
}
