//! Bottleneck detection for the extension's execution contexts
//!
//! Samples flow from a [`MetricSource`] into the [`MetricStore`], are turned
//! into trends by the [`TrendAnalyzer`] and classified by the
//! [`BottleneckClassifier`]. The [`DetectionCoordinator`] drives this on a
//! fixed interval and reports a [`DetectionResult`].

pub mod bottleneck;
pub mod classifier;
pub mod coordinator;
pub mod metrics;
pub mod recommendation;
pub mod report;
pub mod source;
pub mod store;
#[cfg(feature = "prometheus")]
pub mod telemetry;
pub mod trend;

pub use bottleneck::{Bottleneck, BottleneckType, Impact, Severity};
pub use classifier::{prioritize, BottleneckClassifier};
pub use coordinator::{DetectionCoordinator, DetectionCoordinatorBuilder};
pub use metrics::{Component, MetricSample, TrendField, BYTES_PER_MB};
pub use recommendation::{
    DefaultRecommendationEngine, Effort, OptimizationRecommendation, RecommendationCategory,
    RecommendationEngine,
};
pub use report::{overall_score, DetectionResult, DetectionStatistics};
pub use source::{InMemoryMetricSource, MetricSource, SyntheticMetricSource, SyntheticProfile};
pub use store::{ComponentSeries, MetricStore};
#[cfg(feature = "prometheus")]
pub use telemetry::DetectionMetrics;
pub use trend::{LeakSeverity, TrendAnalyzer, TrendDirection, TrendResult};
