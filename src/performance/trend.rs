//! Growth trend estimation over a metric window

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::metrics::{MetricSample, TrendField, BYTES_PER_MB};
use crate::config::MemoryThresholds;

/// Direction of a metric over the analysis window
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TrendDirection {
    /// More rises than falls between consecutive samples
    Increasing,
    /// As many rises as falls, or no movement
    #[default]
    Stable,
    /// More falls than rises between consecutive samples
    Decreasing,
}

/// Estimated trend of one metric field
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TrendResult {
    /// Direction by majority of consecutive deltas
    pub direction: TrendDirection,
    /// Least-squares slope in field units per second
    pub growth_rate_per_second: f64,
    /// Number of samples the estimate is based on
    pub sample_count: usize,
}

impl TrendResult {
    /// Result used when fewer than two samples are available
    pub fn insufficient(sample_count: usize) -> Self {
        Self {
            direction: TrendDirection::Stable,
            growth_rate_per_second: 0.0,
            sample_count,
        }
    }

    /// True when the estimate is based on fewer than two samples
    pub fn is_insufficient(&self) -> bool {
        self.sample_count < 2
    }
}

/// Memory leak classification of a growth rate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum LeakSeverity {
    None,
    Minor,
    Moderate,
    Severe,
}

/// Trend analyzer
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    leak_minor_mb_per_sec: f64,
    leak_moderate_mb_per_sec: f64,
    leak_severe_mb_per_sec: f64,
    /// Spacing assumed between samples when all timestamps coincide
    nominal_interval: Duration,
}

impl TrendAnalyzer {
    /// Creates an analyzer with the memory leak buckets from configuration
    pub fn new(memory: &MemoryThresholds, nominal_interval: Duration) -> Self {
        Self {
            leak_minor_mb_per_sec: memory.leak_minor_mb_per_sec,
            leak_moderate_mb_per_sec: memory.leak_moderate_mb_per_sec,
            leak_severe_mb_per_sec: memory.leak_severe_mb_per_sec,
            nominal_interval,
        }
    }

    /// Analyzes one field over a window of samples
    ///
    /// Samples that do not carry the field are ignored. Never fails: with fewer
    /// than two usable samples the result is stable with zero growth.
    pub fn analyze(&self, samples: &[MetricSample], field: TrendField) -> TrendResult {
        let Some(first) = samples.first() else {
            return TrendResult::insufficient(0);
        };
        let origin = first.timestamp;

        let points: Vec<(f64, f64)> = samples
            .iter()
            .filter_map(|s| {
                field.extract(s).map(|value| {
                    let elapsed = (s.timestamp - origin).num_milliseconds() as f64 / 1000.0;
                    (elapsed, value)
                })
            })
            .collect();

        self.analyze_points(&points)
    }

    /// Analyzes `(elapsed_seconds, value)` points in chronological order
    pub fn analyze_points(&self, points: &[(f64, f64)]) -> TrendResult {
        if points.len() < 2 {
            return TrendResult::insufficient(points.len());
        }

        let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        let direction = majority_direction(&values);

        let slope = least_squares_slope(points).unwrap_or_else(|| {
            // Identical timestamps: fall back to index spacing
            let step = self.nominal_interval.as_secs_f64().max(f64::EPSILON);
            let indexed: Vec<(f64, f64)> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (i as f64 * step, *v))
                .collect();
            least_squares_slope(&indexed).unwrap_or(0.0)
        });

        TrendResult {
            direction,
            growth_rate_per_second: if slope.is_finite() { slope } else { 0.0 },
            sample_count: points.len(),
        }
    }

    /// Buckets a heap growth rate given in bytes per second
    pub fn leak_severity(&self, growth_rate_bytes_per_second: f64) -> LeakSeverity {
        let mb_per_sec = growth_rate_bytes_per_second / BYTES_PER_MB;
        if mb_per_sec > self.leak_severe_mb_per_sec {
            LeakSeverity::Severe
        } else if mb_per_sec > self.leak_moderate_mb_per_sec {
            LeakSeverity::Moderate
        } else if mb_per_sec > self.leak_minor_mb_per_sec {
            LeakSeverity::Minor
        } else {
            LeakSeverity::None
        }
    }

    /// True when a heap trend is rising fast enough to count as a leak
    pub fn is_leaking(&self, memory_trend: &TrendResult) -> bool {
        memory_trend.direction == TrendDirection::Increasing
            && self.leak_severity(memory_trend.growth_rate_per_second) != LeakSeverity::None
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(&MemoryThresholds::default(), Duration::from_secs(1))
    }
}

/// Direction by majority sign of consecutive deltas; ties are stable
fn majority_direction(values: &[f64]) -> TrendDirection {
    let (mut rises, mut falls) = (0usize, 0usize);
    for pair in values.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            rises += 1;
        } else if delta < 0.0 {
            falls += 1;
        }
    }

    match rises.cmp(&falls) {
        std::cmp::Ordering::Greater => TrendDirection::Increasing,
        std::cmp::Ordering::Less => TrendDirection::Decreasing,
        std::cmp::Ordering::Equal => TrendDirection::Stable,
    }
}

/// Ordinary least-squares slope; `None` when x has no variance
fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, y) in points {
        let x_diff = x - x_mean;
        numerator += x_diff * (y - y_mean);
        denominator += x_diff * x_diff;
    }

    if denominator.abs() < f64::EPSILON {
        return None;
    }
    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::metrics::Component;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn heap_series(values_mb: &[f64], step_secs: i64) -> Vec<MetricSample> {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        values_mb
            .iter()
            .enumerate()
            .map(|(i, mb)| {
                MetricSample::at(
                    Component::Background,
                    base + ChronoDuration::seconds(i as i64 * step_secs),
                )
                .with_memory(mb * BYTES_PER_MB, mb * BYTES_PER_MB, 4096.0 * BYTES_PER_MB)
            })
            .collect()
    }

    #[test]
    fn test_severe_leak_detected() {
        let analyzer = TrendAnalyzer::default();
        let samples = heap_series(&[100.0, 110.0, 120.0, 130.0, 140.0], 1);

        let trend = analyzer.analyze(&samples, TrendField::UsedHeap);
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.growth_rate_per_second / BYTES_PER_MB - 10.0).abs() < 1e-6);
        assert_eq!(
            analyzer.leak_severity(trend.growth_rate_per_second),
            LeakSeverity::Severe
        );
        assert!(analyzer.is_leaking(&trend));
    }

    #[test]
    fn test_insufficient_data_is_stable() {
        let analyzer = TrendAnalyzer::default();

        let empty = analyzer.analyze(&[], TrendField::UsedHeap);
        assert_eq!(empty.direction, TrendDirection::Stable);
        assert_eq!(empty.growth_rate_per_second, 0.0);

        let single = analyzer.analyze(&heap_series(&[100.0], 1), TrendField::UsedHeap);
        assert_eq!(single.direction, TrendDirection::Stable);
        assert_eq!(single.growth_rate_per_second, 0.0);
        assert!(single.is_insufficient());
    }

    #[test]
    fn test_elapsed_time_regression() {
        let analyzer = TrendAnalyzer::default();
        // 10 MB every 5 seconds is 2 MB/s, not 10 MB per sample
        let samples = heap_series(&[100.0, 110.0, 120.0], 5);

        let trend = analyzer.analyze(&samples, TrendField::UsedHeap);
        assert!((trend.growth_rate_per_second / BYTES_PER_MB - 2.0).abs() < 1e-6);
        assert_eq!(
            analyzer.leak_severity(trend.growth_rate_per_second),
            LeakSeverity::Moderate
        );
    }

    #[test]
    fn test_oscillation_is_stable() {
        let analyzer = TrendAnalyzer::default();
        let samples = heap_series(&[100.0, 120.0, 100.0, 120.0, 100.0], 1);

        let trend = analyzer.analyze(&samples, TrendField::UsedHeap);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert!(!analyzer.is_leaking(&trend));
    }

    #[test]
    fn test_decreasing_trend() {
        let analyzer = TrendAnalyzer::default();
        let samples = heap_series(&[140.0, 130.0, 131.0, 110.0], 1);

        let trend = analyzer.analyze(&samples, TrendField::UsedHeap);
        assert_eq!(trend.direction, TrendDirection::Decreasing);
        assert!(trend.growth_rate_per_second < 0.0);
    }

    #[test]
    fn test_identical_timestamps_use_nominal_interval() {
        let analyzer = TrendAnalyzer::new(&MemoryThresholds::default(), Duration::from_secs(2));
        let points = [(0.0, 0.0), (0.0, 4.0), (0.0, 8.0)];

        let trend = analyzer.analyze_points(&points);
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.growth_rate_per_second - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_leak_buckets() {
        let analyzer = TrendAnalyzer::default();
        assert_eq!(analyzer.leak_severity(0.05 * BYTES_PER_MB), LeakSeverity::None);
        assert_eq!(analyzer.leak_severity(0.5 * BYTES_PER_MB), LeakSeverity::Minor);
        assert_eq!(analyzer.leak_severity(3.0 * BYTES_PER_MB), LeakSeverity::Moderate);
        assert_eq!(analyzer.leak_severity(6.0 * BYTES_PER_MB), LeakSeverity::Severe);
        assert_eq!(analyzer.leak_severity(-8.0 * BYTES_PER_MB), LeakSeverity::None);
    }

    #[test]
    fn test_samples_without_field_are_skipped() {
        let analyzer = TrendAnalyzer::default();
        let mut samples = heap_series(&[100.0, 110.0], 1);
        samples.insert(1, MetricSample::at(Component::Background, samples[0].timestamp));

        let trend = analyzer.analyze(&samples, TrendField::UsedHeap);
        assert_eq!(trend.sample_count, 2);
    }
}
