//! Bottleneck records produced by the classifier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::metrics::Component;

/// Bottleneck types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum BottleneckType {
    /// Heap growth or heap near its limit
    MemoryLeak,
    /// Main thread blocked by synchronous work
    CpuIntensive,
    /// Slow or failing network requests
    NetworkLatency,
    /// Backlogged or slow runtime messaging
    MessageQueue,
    /// Low frame rate or oversized DOM
    Rendering,
    /// Slow offscreen processing jobs
    AiProcessing,
    /// Synchronized degradation across components
    AlgorithmInefficiency,
}

impl BottleneckType {
    /// Returns a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            BottleneckType::MemoryLeak => "Memory Usage",
            BottleneckType::CpuIntensive => "CPU Processing",
            BottleneckType::NetworkLatency => "Network I/O",
            BottleneckType::MessageQueue => "Message Passing",
            BottleneckType::Rendering => "Rendering",
            BottleneckType::AiProcessing => "Background Processing",
            BottleneckType::AlgorithmInefficiency => "Cross-Component Coordination",
        }
    }

    /// Stable identifier used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            BottleneckType::MemoryLeak => "memory-leak",
            BottleneckType::CpuIntensive => "cpu-intensive",
            BottleneckType::NetworkLatency => "network-latency",
            BottleneckType::MessageQueue => "message-queue",
            BottleneckType::Rendering => "rendering",
            BottleneckType::AiProcessing => "ai-processing",
            BottleneckType::AlgorithmInefficiency => "algorithm-inefficiency",
        }
    }

    /// Upper bound of the estimated slowdown for this type (percent)
    pub fn slowdown_cap(&self) -> f64 {
        match self {
            BottleneckType::MemoryLeak => 50.0,
            BottleneckType::CpuIntensive => 80.0,
            BottleneckType::NetworkLatency => 60.0,
            BottleneckType::MessageQueue => 40.0,
            BottleneckType::Rendering => 30.0,
            BottleneckType::AiProcessing => 70.0,
            BottleneckType::AlgorithmInefficiency => 60.0,
        }
    }

    /// Estimated slowdown for a violation `relative_excess` past the medium threshold
    ///
    /// Linear in the excess, never negative, capped per type.
    pub fn estimated_slowdown(&self, relative_excess: f64) -> f64 {
        let excess = if relative_excess.is_finite() {
            relative_excess.max(0.0)
        } else {
            0.0
        };
        (10.0 + 40.0 * excess).min(self.slowdown_cap())
    }

    /// (user experience, system resources, functionality) weights
    fn impact_weights(&self) -> (f64, f64, f64) {
        match self {
            BottleneckType::MemoryLeak => (0.6, 1.0, 0.5),
            BottleneckType::CpuIntensive => (1.0, 0.8, 0.4),
            BottleneckType::NetworkLatency => (0.8, 0.3, 0.7),
            BottleneckType::MessageQueue => (0.7, 0.4, 0.8),
            BottleneckType::Rendering => (1.0, 0.5, 0.3),
            BottleneckType::AiProcessing => (0.5, 0.9, 0.6),
            BottleneckType::AlgorithmInefficiency => (0.8, 0.9, 0.7),
        }
    }

    /// Likely root cause for this type
    pub fn root_cause(&self) -> &'static str {
        match self {
            BottleneckType::MemoryLeak => {
                "Retained references (event listeners, closures, detached DOM nodes or \
                 unbounded caches) keep objects alive"
            }
            BottleneckType::CpuIntensive => {
                "Synchronous work on the main thread blocks the event loop"
            }
            BottleneckType::NetworkLatency => {
                "Slow or failing endpoints, missing timeouts or too many sequential requests"
            }
            BottleneckType::MessageQueue => {
                "Message producers outpace consumers or handlers perform heavy work inline"
            }
            BottleneckType::Rendering => {
                "Layout thrashing, expensive style recalculation or an oversized DOM"
            }
            BottleneckType::AiProcessing => {
                "Processing jobs run on the critical path without batching or result caching"
            }
            BottleneckType::AlgorithmInefficiency => {
                "Resource contention or coordination inefficiency between execution contexts"
            }
        }
    }

    /// Remediation steps for this type
    pub fn remediation(&self) -> Vec<String> {
        let steps: &[&str] = match self {
            BottleneckType::MemoryLeak => &[
                "Remove event listeners and observers when contexts unload",
                "Bound in-memory caches with size limits or LRU eviction",
                "Take heap snapshots to locate retained objects",
            ],
            BottleneckType::CpuIntensive => &[
                "Split long synchronous work into chunks",
                "Move heavy computation to the offscreen document or a worker",
                "Debounce handlers for high-frequency events",
            ],
            BottleneckType::NetworkLatency => &[
                "Add request timeouts and retry with backoff",
                "Batch or parallelize independent requests",
                "Cache responses that do not change often",
            ],
            BottleneckType::MessageQueue => &[
                "Batch messages between contexts",
                "Use long-lived ports instead of one-off messages",
                "Keep message handlers short and defer heavy work",
            ],
            BottleneckType::Rendering => &[
                "Batch DOM reads and writes to avoid layout thrashing",
                "Virtualize long lists to keep the DOM small",
                "Schedule visual updates with requestAnimationFrame",
            ],
            BottleneckType::AiProcessing => &[
                "Cache processing results keyed by input",
                "Queue and batch processing jobs",
                "Reduce input size before processing",
            ],
            BottleneckType::AlgorithmInefficiency => &[
                "Review shared state and locking between contexts",
                "Stagger periodic work so contexts do not peak together",
                "Profile cross-context message flows end to end",
            ],
        };
        steps.iter().map(|s| s.to_string()).collect()
    }

    /// Baseline fix estimate at medium severity
    fn base_fix_minutes(&self) -> u32 {
        match self {
            BottleneckType::MemoryLeak => 120,
            BottleneckType::CpuIntensive => 90,
            BottleneckType::NetworkLatency => 60,
            BottleneckType::MessageQueue => 60,
            BottleneckType::Rendering => 90,
            BottleneckType::AiProcessing => 120,
            BottleneckType::AlgorithmInefficiency => 240,
        }
    }
}

impl fmt::Display for BottleneckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels for bottlenecks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Low severity
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Critical severity
    Critical,
}

impl Severity {
    /// Returns severity score (0-100)
    pub fn score(&self) -> u8 {
        match self {
            Severity::Low => 25,
            Severity::Medium => 50,
            Severity::High => 75,
            Severity::Critical => 100,
        }
    }

    /// Points deducted from the overall health score
    pub fn penalty(&self) -> u32 {
        match self {
            Severity::Low => 3,
            Severity::Medium => 8,
            Severity::High => 15,
            Severity::Critical => 25,
        }
    }

    fn fix_multiplier(&self) -> f64 {
        match self {
            Severity::Low => 0.5,
            Severity::Medium => 1.0,
            Severity::High => 1.5,
            Severity::Critical => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected impact of a bottleneck
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Impact {
    /// 0-100, grows with severity
    pub user_experience: u8,
    /// 0-100
    pub system_resources: u8,
    /// 0-100
    pub functionality: u8,
    /// Bounded estimate of how much slower the component runs
    pub estimated_slowdown_percent: f64,
}

impl Impact {
    /// Derives the impact of a bottleneck type at a given severity
    pub fn derive(
        bottleneck_type: BottleneckType,
        severity: Severity,
        slowdown_percent: f64,
    ) -> Self {
        let (ux, resources, functionality) = bottleneck_type.impact_weights();
        let score = severity.score() as f64;
        Self {
            user_experience: (score * ux).round() as u8,
            system_resources: (score * resources).round() as u8,
            functionality: (score * functionality).round() as u8,
            estimated_slowdown_percent: slowdown_percent.clamp(0.0, bottleneck_type.slowdown_cap()),
        }
    }
}

/// Detected performance bottleneck
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bottleneck {
    /// Unique identifier
    pub id: String,
    /// Detection timestamp
    pub timestamp: DateTime<Utc>,
    /// Affected component
    pub component: Component,
    /// Bottleneck type
    #[serde(rename = "type")]
    pub bottleneck_type: BottleneckType,
    /// Severity level
    pub severity: Severity,
    /// Human-readable description
    pub description: String,
    pub impact: Impact,
    pub root_cause: String,
    pub recommendations: Vec<String>,
    pub estimated_fix_minutes: u32,
    /// Observed values and thresholds that triggered the rule
    pub metrics: BTreeMap<String, f64>,
}

impl Bottleneck {
    /// Creates a new bottleneck with the type's template filled in
    pub fn new(
        component: Component,
        bottleneck_type: BottleneckType,
        severity: Severity,
        description: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component,
            bottleneck_type,
            severity,
            description,
            impact: Impact::derive(bottleneck_type, severity, 0.0),
            root_cause: bottleneck_type.root_cause().to_string(),
            recommendations: bottleneck_type.remediation(),
            estimated_fix_minutes: (bottleneck_type.base_fix_minutes() as f64
                * severity.fix_multiplier())
            .round() as u32,
            metrics: BTreeMap::new(),
        }
    }

    /// Sets the estimated slowdown, clamped to the type's cap
    pub fn with_slowdown(mut self, slowdown_percent: f64) -> Self {
        self.impact = Impact::derive(self.bottleneck_type, self.severity, slowdown_percent);
        self
    }

    /// Adds a metric to the bottleneck
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Deduplication key
    pub fn key(&self) -> (Component, BottleneckType) {
        (self.component, self.bottleneck_type)
    }

    /// True for findings that are not tied to a single component
    pub fn is_system_wide(&self) -> bool {
        self.component == Component::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottleneck_creation() {
        let bottleneck = Bottleneck::new(
            Component::Background,
            BottleneckType::CpuIntensive,
            Severity::High,
            "Test bottleneck".to_string(),
        );

        assert_eq!(bottleneck.bottleneck_type, BottleneckType::CpuIntensive);
        assert_eq!(bottleneck.severity, Severity::High);
        assert!(!bottleneck.recommendations.is_empty());
        assert_eq!(bottleneck.estimated_fix_minutes, 135);
        assert_eq!(bottleneck.impact.user_experience, 75);
    }

    #[test]
    fn test_unique_ids() {
        let a = Bottleneck::new(
            Component::Popup,
            BottleneckType::Rendering,
            Severity::Medium,
            "a".to_string(),
        );
        let b = Bottleneck::new(
            Component::Popup,
            BottleneckType::Rendering,
            Severity::Medium,
            "b".to_string(),
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_user_experience_scales_with_severity() {
        let low = Impact::derive(BottleneckType::Rendering, Severity::Low, 0.0);
        let critical = Impact::derive(BottleneckType::Rendering, Severity::Critical, 0.0);
        assert!(critical.user_experience > low.user_experience);
    }

    #[test]
    fn test_slowdown_is_capped() {
        assert_eq!(BottleneckType::Rendering.estimated_slowdown(100.0), 30.0);
        assert_eq!(BottleneckType::CpuIntensive.estimated_slowdown(100.0), 80.0);
        assert_eq!(BottleneckType::NetworkLatency.estimated_slowdown(0.0), 10.0);
        assert_eq!(BottleneckType::NetworkLatency.estimated_slowdown(-1.0), 10.0);
        assert_eq!(BottleneckType::NetworkLatency.estimated_slowdown(f64::NAN), 10.0);
    }

    #[test]
    fn test_severity_ordering_and_penalty() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::Critical.penalty(), 25);
        assert_eq!(Severity::Low.penalty(), 3);
    }

    #[test]
    fn test_serialized_type_field() {
        let bottleneck = Bottleneck::new(
            Component::Offscreen,
            BottleneckType::AiProcessing,
            Severity::Low,
            "slow job".to_string(),
        );
        let json = serde_json::to_value(&bottleneck).unwrap();
        assert_eq!(json["type"], "ai-processing");
        assert_eq!(json["severity"], "low");
        assert_eq!(json["component"], "offscreen");
    }
}
