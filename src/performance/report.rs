//! Detection results and health scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bottleneck::{Bottleneck, BottleneckType, Severity};
use super::classifier::prioritize;
use super::metrics::Component;
use super::recommendation::OptimizationRecommendation;

/// Counters describing how a monitoring session went
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionStatistics {
    pub ticks_completed: u64,
    /// Ticks skipped because the previous one was still running
    pub ticks_skipped: u64,
    pub sampling_failures: u64,
    pub out_of_order_rejected: u64,
    /// Repeated findings suppressed within the cooldown
    pub suppressed_duplicates: u64,
}

/// Report of a monitoring session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detection_id: String,
    pub timestamp: DateTime<Utc>,
    pub monitoring_duration_ms: u64,
    pub total_bottlenecks: usize,
    pub critical_bottlenecks: usize,
    pub counts_by_component: BTreeMap<Component, usize>,
    pub counts_by_type: BTreeMap<BottleneckType, usize>,
    /// Health score, 0 to 100
    pub overall_score: u8,
    pub recommendations: Vec<OptimizationRecommendation>,
    /// Most severe first
    pub bottlenecks: Vec<Bottleneck>,
    pub statistics: DetectionStatistics,
    pub monitored_components: Vec<Component>,
}

impl DetectionResult {
    /// Builds a report over the bottlenecks accumulated so far
    pub fn new(
        bottlenecks: Vec<Bottleneck>,
        recommendations: Vec<OptimizationRecommendation>,
        monitoring_duration_ms: u64,
        statistics: DetectionStatistics,
        monitored_components: Vec<Component>,
    ) -> Self {
        let mut counts_by_component = BTreeMap::new();
        let mut counts_by_type = BTreeMap::new();
        for bottleneck in &bottlenecks {
            *counts_by_component.entry(bottleneck.component).or_insert(0) += 1;
            *counts_by_type.entry(bottleneck.bottleneck_type).or_insert(0) += 1;
        }

        Self {
            detection_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            monitoring_duration_ms,
            total_bottlenecks: bottlenecks.len(),
            critical_bottlenecks: bottlenecks
                .iter()
                .filter(|b| b.severity == Severity::Critical)
                .count(),
            counts_by_component,
            counts_by_type,
            overall_score: overall_score(&bottlenecks),
            recommendations,
            bottlenecks: prioritize(bottlenecks),
            statistics,
            monitored_components,
        }
    }

    /// True when nothing was detected
    pub fn is_healthy(&self) -> bool {
        self.bottlenecks.is_empty()
    }

    /// Serializes the report as JSON
    pub fn to_json(&self, pretty: bool) -> crate::error::Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

/// `max(0, 100 - Σ severity penalty)`
pub fn overall_score(bottlenecks: &[Bottleneck]) -> u8 {
    let penalty: u32 = bottlenecks.iter().map(|b| b.severity.penalty()).sum();
    100u32.saturating_sub(penalty) as u8
}
