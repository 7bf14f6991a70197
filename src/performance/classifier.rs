//! Threshold rules turning metric windows into bottlenecks

use std::time::Duration;

use super::bottleneck::{Bottleneck, BottleneckType, Severity};
use super::metrics::{Component, MetricSample, BYTES_PER_MB};
use super::trend::{LeakSeverity, TrendAnalyzer, TrendDirection, TrendResult};
use crate::config::{DetectionConfig, DetectionThresholds};

/// Stateless bottleneck classifier
///
/// Each dimension has its own rule set; rules only look at the samples that
/// carry their dimension.
#[derive(Debug, Clone)]
pub struct BottleneckClassifier {
    thresholds: DetectionThresholds,
    analyzer: TrendAnalyzer,
}

impl BottleneckClassifier {
    /// Creates a classifier with the given thresholds
    pub fn new(thresholds: DetectionThresholds) -> Self {
        let analyzer = TrendAnalyzer::new(&thresholds.memory, Duration::from_secs(1));
        Self {
            thresholds,
            analyzer,
        }
    }

    /// Creates a classifier from a detection configuration
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            analyzer: TrendAnalyzer::new(&config.thresholds.memory, config.tick_interval()),
        }
    }

    /// Evaluates every rule set against a component's window
    ///
    /// `memory_trend` is the heap trend over the same window.
    pub fn evaluate(
        &self,
        component: Component,
        samples: &[MetricSample],
        memory_trend: &TrendResult,
    ) -> Vec<Bottleneck> {
        let mut bottlenecks = Vec::new();

        if let Some(b) = self.check_memory(component, samples, memory_trend) {
            bottlenecks.push(b);
        }
        if let Some(b) = self.check_cpu(component, samples) {
            bottlenecks.push(b);
        }
        bottlenecks.extend(self.check_network(component, samples));
        bottlenecks.extend(self.check_queue(component, samples));
        if component.supports_rendering() {
            bottlenecks.extend(self.check_render(component, samples));
        }
        bottlenecks.extend(self.check_processing(component, samples));

        bottlenecks
    }

    /// Emits a system-wide finding when most components leak at once
    ///
    /// `trends` holds the heap trend of every monitored component.
    pub fn correlate(&self, trends: &[(Component, TrendResult)]) -> Option<Bottleneck> {
        if trends.is_empty() {
            return None;
        }

        let leaking: Vec<Component> = trends
            .iter()
            .filter(|(_, trend)| self.analyzer.is_leaking(trend))
            .map(|(component, _)| *component)
            .collect();

        if leaking.len() * 2 <= trends.len() {
            return None;
        }

        let names: Vec<&str> = leaking.iter().map(Component::as_str).collect();
        let share = leaking.len() as f64 / trends.len() as f64;
        Some(
            Bottleneck::new(
                Component::System,
                BottleneckType::AlgorithmInefficiency,
                Severity::High,
                format!(
                    "Synchronized memory growth in {} of {} components ({})",
                    leaking.len(),
                    trends.len(),
                    names.join(", ")
                ),
            )
            .with_slowdown(BottleneckType::AlgorithmInefficiency.estimated_slowdown(share))
            .with_metric("leaking_components", leaking.len() as f64)
            .with_metric("monitored_components", trends.len() as f64),
        )
    }

    /// Leak finding from the heap trend, or static usage against the limit
    fn check_memory(
        &self,
        component: Component,
        samples: &[MetricSample],
        trend: &TrendResult,
    ) -> Option<Bottleneck> {
        let t = &self.thresholds.memory;

        let leak = if trend.direction == TrendDirection::Increasing {
            let rate_mb = trend.growth_rate_per_second / BYTES_PER_MB;
            let severity = match self.analyzer.leak_severity(trend.growth_rate_per_second) {
                LeakSeverity::None => None,
                LeakSeverity::Minor => Some(Severity::Medium),
                LeakSeverity::Moderate => Some(Severity::High),
                LeakSeverity::Severe => Some(Severity::Critical),
            };
            severity.map(|severity| {
                Bottleneck::new(
                    component,
                    BottleneckType::MemoryLeak,
                    severity,
                    format!(
                        "Heap growing at {:.2} MB/s over {} samples",
                        rate_mb, trend.sample_count
                    ),
                )
                .with_slowdown(BottleneckType::MemoryLeak.estimated_slowdown(excess_above(
                    rate_mb,
                    t.leak_minor_mb_per_sec,
                )))
                .with_metric("growth_mb_per_sec", rate_mb)
                .with_metric("threshold_mb_per_sec", t.leak_minor_mb_per_sec)
            })
        } else {
            None
        };

        let usage = samples
            .iter()
            .rev()
            .find_map(|s| s.memory)
            .and_then(|memory| {
                let ratio = memory.usage_ratio();
                let severity = if ratio > t.usage_critical {
                    Severity::Critical
                } else if ratio > t.usage_high {
                    Severity::High
                } else {
                    return None;
                };
                Some(
                    Bottleneck::new(
                        component,
                        BottleneckType::MemoryLeak,
                        severity,
                        format!(
                            "Heap at {:.1}% of its limit ({:.1} MB used)",
                            ratio * 100.0,
                            memory.used_heap / BYTES_PER_MB
                        ),
                    )
                    .with_slowdown(
                        BottleneckType::MemoryLeak
                            .estimated_slowdown(excess_above(ratio, t.usage_high)),
                    )
                    .with_metric("usage_ratio", ratio)
                    .with_metric("threshold_ratio", t.usage_high),
                )
            });

        match (leak, usage) {
            (Some(leak), Some(usage)) if usage.severity > leak.severity => Some(usage),
            (Some(leak), _) => Some(leak),
            (None, usage) => usage,
        }
    }

    /// Cumulative blocking time across the window
    fn check_cpu(&self, component: Component, samples: &[MetricSample]) -> Option<Bottleneck> {
        let t = &self.thresholds.cpu;
        let cpu_samples: Vec<_> = samples.iter().filter_map(|s| s.cpu.as_ref()).collect();
        if cpu_samples.is_empty() {
            return None;
        }

        let blocking_ms: f64 = cpu_samples.iter().map(|c| c.blocking_time_ms()).sum();
        let severity = grade_above(blocking_ms, t.blocking_medium_ms, t.blocking_high_ms)?;
        let operations: usize = cpu_samples.iter().map(|c| c.blocking_operations.len()).sum();

        Some(
            Bottleneck::new(
                component,
                BottleneckType::CpuIntensive,
                severity,
                format!(
                    "{} blocking operations held the main thread for {:.0}ms",
                    operations, blocking_ms
                ),
            )
            .with_slowdown(
                BottleneckType::CpuIntensive
                    .estimated_slowdown(excess_above(blocking_ms, t.blocking_medium_ms)),
            )
            .with_metric("blocking_time_ms", blocking_ms)
            .with_metric("threshold_ms", t.blocking_medium_ms),
        )
    }

    /// Mean latency and failure rate, as independent findings
    fn check_network(&self, component: Component, samples: &[MetricSample]) -> Vec<Bottleneck> {
        let t = &self.thresholds.network;
        let network: Vec<_> = samples.iter().filter_map(|s| s.network).collect();
        let mut bottlenecks = Vec::new();
        if network.is_empty() {
            return bottlenecks;
        }

        let latency = mean(network.iter().map(|n| n.latency_ms));
        if let Some(severity) = grade_above(latency, t.latency_medium_ms, t.latency_high_ms) {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::NetworkLatency,
                    severity,
                    format!("Slow network requests: {:.0}ms average latency", latency),
                )
                .with_slowdown(
                    BottleneckType::NetworkLatency
                        .estimated_slowdown(excess_above(latency, t.latency_medium_ms)),
                )
                .with_metric("latency_ms", latency)
                .with_metric("threshold_ms", t.latency_medium_ms),
            );
        }

        let total: u64 = network.iter().map(|n| n.total_count).sum();
        if total > 0 {
            let failures: u64 = network.iter().map(|n| n.failure_count).sum();
            let rate = failures as f64 / total as f64;
            if let Some(severity) =
                grade_above(rate, t.failure_rate_medium, t.failure_rate_high)
            {
                bottlenecks.push(
                    Bottleneck::new(
                        component,
                        BottleneckType::NetworkLatency,
                        severity,
                        format!(
                            "{:.1}% of network requests failed ({} of {})",
                            rate * 100.0,
                            failures,
                            total
                        ),
                    )
                    .with_slowdown(
                        BottleneckType::NetworkLatency
                            .estimated_slowdown(excess_above(rate, t.failure_rate_medium)),
                    )
                    .with_metric("failure_rate", rate)
                    .with_metric("threshold_rate", t.failure_rate_medium),
                );
            }
        }

        bottlenecks
    }

    /// Latest backlog and mean delivery latency
    fn check_queue(&self, component: Component, samples: &[MetricSample]) -> Vec<Bottleneck> {
        let t = &self.thresholds.queue;
        let queue: Vec<_> = samples.iter().filter_map(|s| s.queue).collect();
        let mut bottlenecks = Vec::new();
        let Some(latest) = queue.last() else {
            return bottlenecks;
        };

        let backlog = latest.backlog as f64;
        if let Some(severity) = grade_above(backlog, t.backlog_medium, t.backlog_high) {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::MessageQueue,
                    severity,
                    format!("{} messages waiting in the queue", latest.backlog),
                )
                .with_slowdown(
                    BottleneckType::MessageQueue
                        .estimated_slowdown(excess_above(backlog, t.backlog_medium)),
                )
                .with_metric("backlog", backlog)
                .with_metric("threshold", t.backlog_medium),
            );
        }

        let latency = mean(queue.iter().map(|q| q.avg_latency_ms));
        if let Some(severity) = grade_above(latency, t.latency_medium_ms, t.latency_high_ms) {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::MessageQueue,
                    severity,
                    format!("Messages take {:.0}ms on average to deliver", latency),
                )
                .with_slowdown(
                    BottleneckType::MessageQueue
                        .estimated_slowdown(excess_above(latency, t.latency_medium_ms)),
                )
                .with_metric("latency_ms", latency)
                .with_metric("threshold_ms", t.latency_medium_ms),
            );
        }

        bottlenecks
    }

    /// Mean frame rate and latest DOM size
    fn check_render(&self, component: Component, samples: &[MetricSample]) -> Vec<Bottleneck> {
        let t = &self.thresholds.render;
        let render: Vec<_> = samples.iter().filter_map(|s| s.render).collect();
        let mut bottlenecks = Vec::new();
        let Some(latest) = render.last() else {
            return bottlenecks;
        };

        let fps = mean(render.iter().map(|r| r.frame_rate));
        if let Some(severity) = grade_below(fps, t.frame_rate_medium, t.frame_rate_high) {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::Rendering,
                    severity,
                    format!("Frame rate dropped to {:.1} fps", fps),
                )
                .with_slowdown(
                    BottleneckType::Rendering
                        .estimated_slowdown(excess_below(fps, t.frame_rate_medium)),
                )
                .with_metric("frame_rate", fps)
                .with_metric("threshold_fps", t.frame_rate_medium),
            );
        }

        let dom_size = latest.dom_size as f64;
        if let Some(severity) = grade_above(dom_size, t.dom_size_medium, t.dom_size_high) {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::Rendering,
                    severity,
                    format!("DOM has grown to {} nodes", latest.dom_size),
                )
                .with_slowdown(
                    BottleneckType::Rendering
                        .estimated_slowdown(excess_above(dom_size, t.dom_size_medium)),
                )
                .with_metric("dom_size", dom_size)
                .with_metric("threshold_nodes", t.dom_size_medium),
            );
        }

        bottlenecks
    }

    /// Mean job duration and mean cache hit rate
    fn check_processing(&self, component: Component, samples: &[MetricSample]) -> Vec<Bottleneck> {
        let t = &self.thresholds.processing;
        let processing: Vec<_> = samples.iter().filter_map(|s| s.processing).collect();
        let mut bottlenecks = Vec::new();
        if processing.is_empty() {
            return bottlenecks;
        }

        let duration = mean(processing.iter().map(|p| p.duration_ms));
        if let Some(severity) = grade_above(duration, t.duration_medium_ms, t.duration_high_ms) {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::AiProcessing,
                    severity,
                    format!("Processing jobs take {:.1}s on average", duration / 1000.0),
                )
                .with_slowdown(
                    BottleneckType::AiProcessing
                        .estimated_slowdown(excess_above(duration, t.duration_medium_ms)),
                )
                .with_metric("duration_ms", duration)
                .with_metric("threshold_ms", t.duration_medium_ms),
            );
        }

        let hit_rate = mean(processing.iter().map(|p| p.cache_hit_rate));
        if let Some(severity) =
            grade_below(hit_rate, t.cache_hit_rate_medium, t.cache_hit_rate_high)
        {
            bottlenecks.push(
                Bottleneck::new(
                    component,
                    BottleneckType::AiProcessing,
                    severity,
                    format!("Processing cache hit rate is {:.1}%", hit_rate * 100.0),
                )
                .with_slowdown(
                    BottleneckType::AiProcessing
                        .estimated_slowdown(excess_below(hit_rate, t.cache_hit_rate_medium)),
                )
                .with_metric("cache_hit_rate", hit_rate)
                .with_metric("threshold_rate", t.cache_hit_rate_medium),
            );
        }

        bottlenecks
    }
}

impl Default for BottleneckClassifier {
    fn default() -> Self {
        Self::new(DetectionThresholds::default())
    }
}

/// Sorts bottlenecks by severity, most severe first
pub fn prioritize(mut bottlenecks: Vec<Bottleneck>) -> Vec<Bottleneck> {
    bottlenecks.sort_by_key(|b| std::cmp::Reverse(b.severity));
    bottlenecks
}

fn grade_above(value: f64, medium: f64, high: f64) -> Option<Severity> {
    if value > high {
        Some(Severity::High)
    } else if value > medium {
        Some(Severity::Medium)
    } else {
        None
    }
}

fn grade_below(value: f64, medium: f64, high: f64) -> Option<Severity> {
    if value < high {
        Some(Severity::High)
    } else if value < medium {
        Some(Severity::Medium)
    } else {
        None
    }
}

fn excess_above(value: f64, threshold: f64) -> f64 {
    if threshold > 0.0 {
        (value - threshold) / threshold
    } else {
        0.0
    }
}

fn excess_below(value: f64, threshold: f64) -> f64 {
    if threshold > 0.0 {
        (threshold - value) / threshold
    } else {
        0.0
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::metrics::TrendField;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn at(component: Component, secs: i64) -> MetricSample {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        MetricSample::at(component, base + ChronoDuration::seconds(secs))
    }

    fn leaking_trend() -> TrendResult {
        TrendResult {
            direction: TrendDirection::Increasing,
            growth_rate_per_second: 2.0 * BYTES_PER_MB,
            sample_count: 5,
        }
    }

    #[test]
    fn test_memory_near_limit_is_critical() {
        let classifier = BottleneckClassifier::default();
        let samples = vec![at(Component::Background, 0).with_memory(
            96.0 * BYTES_PER_MB,
            98.0 * BYTES_PER_MB,
            100.0 * BYTES_PER_MB,
        )];

        let result = classifier.evaluate(
            Component::Background,
            &samples,
            &TrendResult::insufficient(1),
        );

        let memory: Vec<_> = result
            .iter()
            .filter(|b| b.bottleneck_type == BottleneckType::MemoryLeak)
            .collect();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory[0].severity, Severity::Critical);
    }

    #[test]
    fn test_memory_keeps_more_severe_finding() {
        let classifier = BottleneckClassifier::default();
        // 85% usage is high, a 2 MB/s leak is also high: only one is reported
        let samples = vec![at(Component::Offscreen, 0).with_memory(
            85.0 * BYTES_PER_MB,
            90.0 * BYTES_PER_MB,
            100.0 * BYTES_PER_MB,
        )];

        let result = classifier.evaluate(Component::Offscreen, &samples, &leaking_trend());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].severity, Severity::High);

        // A severe leak outranks high static usage
        let severe = TrendResult {
            growth_rate_per_second: 8.0 * BYTES_PER_MB,
            ..leaking_trend()
        };
        let result = classifier.evaluate(Component::Offscreen, &samples, &severe);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].severity, Severity::Critical);
        assert!(result[0].metrics.contains_key("growth_mb_per_sec"));
    }

    #[test]
    fn test_decreasing_heap_is_not_a_leak() {
        let classifier = BottleneckClassifier::default();
        let trend = TrendResult {
            direction: TrendDirection::Decreasing,
            growth_rate_per_second: 20.0 * BYTES_PER_MB,
            sample_count: 5,
        };
        assert!(classifier
            .evaluate(Component::Background, &[], &trend)
            .is_empty());
    }

    #[test]
    fn test_network_latency_high() {
        let classifier = BottleneckClassifier::default();
        let samples = vec![
            at(Component::Background, 0).with_network(5500.0, 0, 10),
            at(Component::Background, 1).with_network(6500.0, 0, 10),
        ];

        let result = classifier.evaluate(
            Component::Background,
            &samples,
            &TrendResult::insufficient(0),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bottleneck_type, BottleneckType::NetworkLatency);
        assert_eq!(result[0].severity, Severity::High);
        assert_eq!(result[0].impact.estimated_slowdown_percent, 60.0);
    }

    #[test]
    fn test_network_failure_rate_is_independent() {
        let classifier = BottleneckClassifier::default();
        let samples = vec![
            at(Component::Popup, 0).with_network(100.0, 3, 10),
            at(Component::Popup, 1).with_network(100.0, 0, 10),
        ];

        let result =
            classifier.evaluate(Component::Popup, &samples, &TrendResult::insufficient(0));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].severity, Severity::Medium);
        assert_eq!(result[0].metrics["failure_rate"], 0.15);
    }

    #[test]
    fn test_cpu_blocking_accumulates_over_window() {
        let classifier = BottleneckClassifier::default();
        let samples: Vec<_> = (0..4)
            .map(|i| at(Component::ContentScript, i).with_blocking_operation("layout", 40.0))
            .collect();

        let result = classifier.evaluate(
            Component::ContentScript,
            &samples,
            &TrendResult::insufficient(0),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bottleneck_type, BottleneckType::CpuIntensive);
        assert_eq!(result[0].severity, Severity::Medium);
    }

    #[test]
    fn test_rendering_only_for_render_capable_components() {
        let classifier = BottleneckClassifier::default();
        let popup = vec![at(Component::Popup, 0).with_render(12.0, 12_000)];
        let background = vec![at(Component::Background, 0).with_render(12.0, 12_000)];

        let popup_result =
            classifier.evaluate(Component::Popup, &popup, &TrendResult::insufficient(1));
        assert_eq!(popup_result.len(), 2);
        assert!(popup_result.iter().all(|b| b.severity == Severity::High));

        let background_result = classifier.evaluate(
            Component::Background,
            &background,
            &TrendResult::insufficient(1),
        );
        assert!(background_result.is_empty());
    }

    #[test]
    fn test_queue_and_processing_rules() {
        let classifier = BottleneckClassifier::default();
        let samples = vec![
            at(Component::Offscreen, 0)
                .with_queue(5, 300.0)
                .with_processing(12_000.0, 2, 0.8),
            at(Component::Offscreen, 1)
                .with_queue(60, 300.0)
                .with_processing(12_000.0, 2, 0.4),
        ];

        let result = classifier.evaluate(
            Component::Offscreen,
            &samples,
            &TrendResult::insufficient(0),
        );

        let queue: Vec<_> = result
            .iter()
            .filter(|b| b.bottleneck_type == BottleneckType::MessageQueue)
            .collect();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().any(|b| b.severity == Severity::High));

        // mean hit rate 0.6 stays above the medium limit
        let processing: Vec<_> = result
            .iter()
            .filter(|b| b.bottleneck_type == BottleneckType::AiProcessing)
            .collect();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].metrics["duration_ms"], 12_000.0);
    }

    #[test]
    fn test_healthy_window_yields_nothing() {
        let classifier = BottleneckClassifier::default();
        let samples = vec![at(Component::Popup, 0)
            .with_memory(10.0 * BYTES_PER_MB, 20.0 * BYTES_PER_MB, 100.0 * BYTES_PER_MB)
            .with_network(120.0, 0, 5)
            .with_queue(1, 5.0)
            .with_render(60.0, 800)];

        assert!(classifier
            .evaluate(Component::Popup, &samples, &TrendResult::insufficient(1))
            .is_empty());
    }

    #[test]
    fn test_correlation_majority() {
        let classifier = BottleneckClassifier::default();
        let stable = TrendResult::insufficient(1);
        let trends = vec![
            (Component::Background, leaking_trend()),
            (Component::ContentScript, leaking_trend()),
            (Component::Offscreen, leaking_trend()),
            (Component::Popup, stable),
        ];

        let finding = classifier.correlate(&trends).unwrap();
        assert_eq!(finding.component, Component::System);
        assert_eq!(finding.bottleneck_type, BottleneckType::AlgorithmInefficiency);
        assert_eq!(finding.severity, Severity::High);
    }

    #[test]
    fn test_correlation_requires_more_than_half() {
        let classifier = BottleneckClassifier::default();
        let stable = TrendResult::insufficient(1);
        let trends = vec![
            (Component::Background, leaking_trend()),
            (Component::ContentScript, leaking_trend()),
            (Component::Offscreen, stable),
            (Component::Popup, stable),
        ];
        assert!(classifier.correlate(&trends).is_none());
        assert!(classifier.correlate(&[]).is_none());
    }

    #[test]
    fn test_evaluate_with_real_trend() {
        let classifier = BottleneckClassifier::default();
        let analyzer = TrendAnalyzer::default();
        let samples: Vec<_> = (0..5)
            .map(|i| {
                let used = (100.0 + 10.0 * i as f64) * BYTES_PER_MB;
                at(Component::Background, i).with_memory(used, used, 4096.0 * BYTES_PER_MB)
            })
            .collect();

        let trend = analyzer.analyze(&samples, TrendField::UsedHeap);
        let result = classifier.evaluate(Component::Background, &samples, &trend);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].severity, Severity::Critical);
    }

    #[test]
    fn test_prioritize_orders_by_severity() {
        let low = Bottleneck::new(
            Component::Popup,
            BottleneckType::Rendering,
            Severity::Low,
            "low".to_string(),
        );
        let critical = Bottleneck::new(
            Component::Background,
            BottleneckType::MemoryLeak,
            Severity::Critical,
            "critical".to_string(),
        );

        let sorted = prioritize(vec![low, critical]);
        assert_eq!(sorted[0].severity, Severity::Critical);
    }
}
