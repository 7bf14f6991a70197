//! Prometheus export of detection activity

use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

use super::bottleneck::Bottleneck;
use crate::error::Result;

/// Detection counters and gauges in a private registry
#[derive(Debug, Clone)]
pub struct DetectionMetrics {
    ticks_total: Counter,
    ticks_skipped_total: Counter,
    sampling_failures_total: Counter,
    bottlenecks_total: CounterVec,
    overall_score: Gauge,
    tick_duration_seconds: Histogram,
    registry: Arc<Registry>,
}

impl DetectionMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let ticks_total = Counter::new("perfscope_ticks_total", "Completed detection ticks")?;
        registry.register(Box::new(ticks_total.clone()))?;

        let ticks_skipped_total = Counter::new(
            "perfscope_ticks_skipped_total",
            "Ticks skipped because the previous tick was still running",
        )?;
        registry.register(Box::new(ticks_skipped_total.clone()))?;

        let sampling_failures_total = Counter::new(
            "perfscope_sampling_failures_total",
            "Component samples that could not be retrieved",
        )?;
        registry.register(Box::new(sampling_failures_total.clone()))?;

        let bottlenecks_total = CounterVec::new(
            Opts::new("perfscope_bottlenecks_total", "Recorded bottlenecks"),
            &["severity", "type"],
        )?;
        registry.register(Box::new(bottlenecks_total.clone()))?;

        let overall_score = Gauge::new(
            "perfscope_overall_score",
            "Health score of the current session (0-100)",
        )?;
        overall_score.set(100.0);
        registry.register(Box::new(overall_score.clone()))?;

        // 1ms .. 10s
        let tick_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("perfscope_tick_duration_seconds", "Detection tick duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(tick_duration_seconds.clone()))?;

        Ok(Self {
            ticks_total,
            ticks_skipped_total,
            sampling_failures_total,
            bottlenecks_total,
            overall_score,
            tick_duration_seconds,
            registry,
        })
    }

    pub fn record_tick(&self, duration_secs: f64) {
        self.ticks_total.inc();
        self.tick_duration_seconds.observe(duration_secs);
    }

    pub fn record_skipped_tick(&self) {
        self.ticks_skipped_total.inc();
    }

    pub fn record_sampling_failures(&self, count: u64) {
        if count > 0 {
            self.sampling_failures_total.inc_by(count as f64);
        }
    }

    pub fn record_bottleneck(&self, bottleneck: &Bottleneck) {
        self.bottlenecks_total
            .with_label_values(&[bottleneck.severity.as_str(), bottleneck.bottleneck_type.as_str()])
            .inc();
    }

    pub fn set_overall_score(&self, score: u8) {
        self.overall_score.set(score as f64);
    }

    /// Renders every metric in the Prometheus text format
    pub fn export_text(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
