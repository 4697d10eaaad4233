//! Metrics sinks and the enqueue instrumentation wrapper.
//!
//! Metric names are dotted (`enqueue_job.success`) and tags are plain
//! key/value pairs. [`NoopMetrics`] is the default sink; with the `metrics`
//! feature, [`PrometheusMetrics`] exports everything to a Prometheus registry.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key/value labels attached to a metric.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// Receives counters and timings.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one.
    fn increment(&self, name: &str, tags: Tags<'_>);

    /// Record a duration.
    fn timing(&self, name: &str, duration: Duration, tags: Tags<'_>);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _tags: Tags<'_>) {}

    fn timing(&self, _name: &str, _duration: Duration, _tags: Tags<'_>) {}
}

/// One recorded metric event.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// Counter increment
    Increment {
        /// Metric name
        name: String,
        /// Labels
        tags: Vec<(String, String)>,
    },
    /// Timing sample
    Timing {
        /// Metric name
        name: String,
        /// Measured duration
        duration: Duration,
        /// Labels
        tags: Vec<(String, String)>,
    },
}

impl MetricEvent {
    /// Metric name of this event.
    pub fn name(&self) -> &str {
        match self {
            Self::Increment { name, .. } | Self::Timing { name, .. } => name,
        }
    }

    /// Value of the tag `key`, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        let tags = match self {
            Self::Increment { tags, .. } | Self::Timing { tags, .. } => tags,
        };
        tags.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events in order.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events with the given name.
    pub fn named(&self, name: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name() == name)
            .collect()
    }

    /// Number of increments recorded under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.named(name)
            .iter()
            .filter(|event| matches!(event, MetricEvent::Increment { .. }))
            .count()
    }

    fn push(&self, event: MetricEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

fn owned_tags(tags: Tags<'_>) -> Vec<(String, String)> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, name: &str, tags: Tags<'_>) {
        self.push(MetricEvent::Increment {
            name: name.to_string(),
            tags: owned_tags(tags),
        });
    }

    fn timing(&self, name: &str, duration: Duration, tags: Tags<'_>) {
        self.push(MetricEvent::Timing {
            name: name.to_string(),
            duration,
            tags: owned_tags(tags),
        });
    }
}

/// Run `work`, then record its latency under `name`.
///
/// The outcome label returned by `outcome` is added as an `outcome` tag, so a
/// single timing sample carries both latency and result.
pub async fn instrument<F, T>(
    metrics: &dyn MetricsSink,
    name: &str,
    tags: Tags<'_>,
    outcome: impl FnOnce(&T) -> &'static str,
    work: F,
) -> T
where
    F: Future<Output = T>,
{
    tracing::trace!(metric = name, "instrumented call started");
    let start = Instant::now();
    let result = work.await;
    let elapsed = start.elapsed();

    let mut all_tags: Vec<(&str, &str)> = tags.to_vec();
    all_tags.push(("outcome", outcome(&result)));
    metrics.timing(name, elapsed, &all_tags);

    result
}

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub use prometheus_sink::PrometheusMetrics;

#[cfg(feature = "metrics")]
mod prometheus_sink {
    use super::{MetricsSink, Tags};
    use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Default histogram buckets for enqueue latency (in seconds)
    const DEFAULT_BUCKETS: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    /// Prometheus-backed metrics sink.
    ///
    /// `enqueue_job.success` becomes the counter `anvilq_enqueue_job_success_total`;
    /// timings become `anvilq_<name>_seconds` histograms. Collectors are created
    /// lazily on first use with the tag keys of that first sample as label names.
    pub struct PrometheusMetrics {
        registry: Registry,
        counters: Mutex<HashMap<String, IntCounterVec>>,
        histograms: Mutex<HashMap<String, HistogramVec>>,
    }

    impl PrometheusMetrics {
        /// Create a sink with its own registry.
        pub fn new() -> Self {
            Self::with_registry(Registry::new())
        }

        /// Create a sink that registers into an existing registry.
        pub fn with_registry(registry: Registry) -> Self {
            Self {
                registry,
                counters: Mutex::new(HashMap::new()),
                histograms: Mutex::new(HashMap::new()),
            }
        }

        /// The underlying Prometheus registry.
        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// Render all collected metrics in the Prometheus text format.
        pub fn render(&self) -> String {
            use prometheus::{Encoder, TextEncoder};

            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                tracing::warn!("Failed to encode metrics: {}", e);
            }
            String::from_utf8(buffer).unwrap_or_default()
        }

        fn metric_name(name: &str, suffix: &str) -> String {
            let sanitized: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("anvilq_{}_{}", sanitized, suffix)
        }

        fn register<C>(&self, collector: C) -> Option<C>
        where
            C: prometheus::core::Collector + Clone + 'static,
        {
            match self.registry.register(Box::new(collector.clone())) {
                Ok(()) => Some(collector),
                Err(e) => {
                    tracing::warn!("Failed to register metric: {}", e);
                    None
                }
            }
        }
    }

    impl Default for PrometheusMetrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MetricsSink for PrometheusMetrics {
        fn increment(&self, name: &str, tags: Tags<'_>) {
            let Ok(mut counters) = self.counters.lock() else {
                return;
            };

            if !counters.contains_key(name) {
                let labels: Vec<&str> = tags.iter().map(|(k, _)| *k).collect();
                let counter = IntCounterVec::new(
                    Opts::new(Self::metric_name(name, "total"), format!("{} count", name)),
                    &labels,
                );
                match counter.ok().and_then(|c| self.register(c)) {
                    Some(counter) => {
                        counters.insert(name.to_string(), counter);
                    }
                    None => return,
                }
            }

            let values: Vec<&str> = tags.iter().map(|(_, v)| *v).collect();
            if let Some(counter) = counters.get(name) {
                match counter.get_metric_with_label_values(&values) {
                    Ok(metric) => metric.inc(),
                    Err(e) => tracing::warn!(metric = name, "Label mismatch: {}", e),
                }
            }
        }

        fn timing(&self, name: &str, duration: Duration, tags: Tags<'_>) {
            let Ok(mut histograms) = self.histograms.lock() else {
                return;
            };

            if !histograms.contains_key(name) {
                let labels: Vec<&str> = tags.iter().map(|(k, _)| *k).collect();
                let histogram = HistogramVec::new(
                    HistogramOpts::new(
                        Self::metric_name(name, "seconds"),
                        format!("{} duration in seconds", name),
                    )
                    .buckets(DEFAULT_BUCKETS.to_vec()),
                    &labels,
                );
                match histogram.ok().and_then(|h| self.register(h)) {
                    Some(histogram) => {
                        histograms.insert(name.to_string(), histogram);
                    }
                    None => return,
                }
            }

            let values: Vec<&str> = tags.iter().map(|(_, v)| *v).collect();
            if let Some(histogram) = histograms.get(name) {
                match histogram.get_metric_with_label_values(&values) {
                    Ok(metric) => metric.observe(duration.as_secs_f64()),
                    Err(e) => tracing::warn!(metric = name, "Label mismatch: {}", e),
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_prometheus_counter_and_histogram() {
            let metrics = PrometheusMetrics::new();
            metrics.increment("enqueue_job.success", &[("jobName", "sendReport")]);
            metrics.increment("enqueue_job.success", &[("jobName", "sendReport")]);
            metrics.timing(
                "enqueue_job",
                Duration::from_millis(3),
                &[("jobName", "sendReport"), ("outcome", "success")],
            );

            let rendered = metrics.render();
            assert!(rendered.contains("anvilq_enqueue_job_success_total{jobName=\"sendReport\"} 2"));
            assert!(rendered.contains("anvilq_enqueue_job_seconds_count"));
        }

        #[test]
        fn test_prometheus_label_mismatch_is_ignored() {
            let metrics = PrometheusMetrics::new();
            metrics.increment("enqueue_job.fail", &[("jobName", "a")]);
            metrics.increment("enqueue_job.fail", &[("jobName", "a"), ("extra", "b")]);
            assert!(metrics.render().contains("anvilq_enqueue_job_fail_total{jobName=\"a\"} 1"));
        }
    }
}
