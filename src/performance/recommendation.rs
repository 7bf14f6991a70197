//! Consolidated optimization recommendations

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::bottleneck::{Bottleneck, BottleneckType, Severity};

/// Bottleneck count above which a monitoring recommendation is added
pub const MONITORING_RECOMMENDATION_THRESHOLD: usize = 10;

/// Area a recommendation belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationCategory {
    Memory,
    Cpu,
    Network,
    Messaging,
    Rendering,
    Processing,
    Architecture,
    Monitoring,
}

impl From<BottleneckType> for RecommendationCategory {
    fn from(bottleneck_type: BottleneckType) -> Self {
        match bottleneck_type {
            BottleneckType::MemoryLeak => RecommendationCategory::Memory,
            BottleneckType::CpuIntensive => RecommendationCategory::Cpu,
            BottleneckType::NetworkLatency => RecommendationCategory::Network,
            BottleneckType::MessageQueue => RecommendationCategory::Messaging,
            BottleneckType::Rendering => RecommendationCategory::Rendering,
            BottleneckType::AiProcessing => RecommendationCategory::Processing,
            BottleneckType::AlgorithmInefficiency => RecommendationCategory::Architecture,
        }
    }
}

/// Implementation effort
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    /// Converts an estimated fix time to an effort level
    pub fn from_minutes(minutes: u32) -> Self {
        if minutes <= 60 {
            Effort::Low
        } else if minutes <= 240 {
            Effort::Medium
        } else {
            Effort::High
        }
    }
}

/// Performance improvement recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationRecommendation {
    /// Highest severity among the bottlenecks it addresses
    pub priority: Severity,
    pub category: RecommendationCategory,
    pub title: String,
    pub description: String,
    /// Implementation steps
    pub implementation: Vec<String>,
    pub estimated_impact: String,
    pub effort: Effort,
    pub dependencies: Vec<String>,
}

/// Recommendation engine trait
pub trait RecommendationEngine: Send + Sync {
    /// Generates recommendations for a set of bottlenecks, highest priority first
    fn generate(&self, bottlenecks: &[Bottleneck]) -> Vec<OptimizationRecommendation>;
}

/// Default recommendation engine
#[derive(Debug, Clone, Default)]
pub struct DefaultRecommendationEngine;

impl DefaultRecommendationEngine {
    /// Creates a new recommendation engine
    pub fn new() -> Self {
        Self
    }

    /// Merges every bottleneck of one type into a single recommendation
    fn consolidate(
        &self,
        bottleneck_type: BottleneckType,
        group: &[&Bottleneck],
    ) -> OptimizationRecommendation {
        let priority = group
            .iter()
            .map(|b| b.severity)
            .max()
            .unwrap_or(Severity::Low);
        let components: BTreeSet<&str> = group.iter().map(|b| b.component.as_str()).collect();
        let components: Vec<&str> = components.into_iter().collect();
        let fix_minutes = group
            .iter()
            .map(|b| b.estimated_fix_minutes)
            .max()
            .unwrap_or(0);
        let slowdown = group
            .iter()
            .map(|b| b.impact.estimated_slowdown_percent)
            .fold(0.0_f64, f64::max);

        OptimizationRecommendation {
            priority,
            category: bottleneck_type.into(),
            title: format!("Address {} bottlenecks", bottleneck_type.description()),
            description: format!(
                "{} {} finding(s) in {}. {}",
                group.len(),
                bottleneck_type,
                components.join(", "),
                bottleneck_type.root_cause()
            ),
            implementation: bottleneck_type.remediation(),
            estimated_impact: format!("Up to {:.0}% faster in affected components", slowdown),
            effort: Effort::from_minutes(fix_minutes),
            dependencies: Vec::new(),
        }
    }

    /// Single architecture recommendation covering critical and system-wide findings
    fn architecture_review(
        &self,
        critical: usize,
        system_wide: &[&Bottleneck],
    ) -> OptimizationRecommendation {
        let priority = if critical > 0 {
            Severity::Critical
        } else {
            system_wide
                .iter()
                .map(|b| b.severity)
                .max()
                .unwrap_or(Severity::Low)
        };

        let mut findings = Vec::new();
        if critical > 0 {
            findings.push(format!("{} critical bottleneck(s) detected", critical));
        }
        findings.extend(system_wide.iter().map(|b| b.description.clone()));

        let mut implementation = vec![
            "Map work and data flow across execution contexts".to_string(),
            "Move long-running work off user-facing contexts".to_string(),
            "Introduce budgets for memory and main-thread time per context".to_string(),
        ];
        if !system_wide.is_empty() {
            implementation.extend(BottleneckType::AlgorithmInefficiency.remediation());
        }

        OptimizationRecommendation {
            priority,
            category: RecommendationCategory::Architecture,
            title: "Review extension architecture".to_string(),
            description: format!(
                "{}; targeted fixes may not be enough",
                findings.join("; ")
            ),
            implementation,
            estimated_impact: "Removes the root of the most severe slowdowns".to_string(),
            effort: Effort::High,
            dependencies: Vec::new(),
        }
    }

    fn continuous_monitoring(&self, total: usize) -> OptimizationRecommendation {
        OptimizationRecommendation {
            priority: Severity::Medium,
            category: RecommendationCategory::Monitoring,
            title: "Add continuous performance monitoring".to_string(),
            description: format!(
                "{} bottlenecks detected in one session; regressions are likely to recur",
                total
            ),
            implementation: vec![
                "Run detection in CI against representative workloads".to_string(),
                "Alert when the overall score drops below an agreed budget".to_string(),
            ],
            estimated_impact: "Catches regressions before release".to_string(),
            effort: Effort::Medium,
            dependencies: vec!["Address the higher-priority recommendations first".to_string()],
        }
    }
}

impl RecommendationEngine for DefaultRecommendationEngine {
    fn generate(&self, bottlenecks: &[Bottleneck]) -> Vec<OptimizationRecommendation> {
        let mut groups: BTreeMap<BottleneckType, Vec<&Bottleneck>> = BTreeMap::new();
        let mut system_wide = Vec::new();
        for bottleneck in bottlenecks {
            if bottleneck.is_system_wide() {
                system_wide.push(bottleneck);
                continue;
            }
            groups
                .entry(bottleneck.bottleneck_type)
                .or_default()
                .push(bottleneck);
        }

        let mut recommendations: Vec<OptimizationRecommendation> = groups
            .iter()
            .map(|(bottleneck_type, group)| self.consolidate(*bottleneck_type, group))
            .collect();

        let critical = bottlenecks
            .iter()
            .filter(|b| b.severity == Severity::Critical)
            .count();
        if critical > 0 || !system_wide.is_empty() {
            recommendations.push(self.architecture_review(critical, &system_wide));
        }

        if bottlenecks.len() > MONITORING_RECOMMENDATION_THRESHOLD {
            recommendations.push(self.continuous_monitoring(bottlenecks.len()));
        }

        // sort_by_key is stable
        recommendations.sort_by_key(|r| std::cmp::Reverse(r.priority));
        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::metrics::Component;

    fn bottleneck(component: Component, t: BottleneckType, severity: Severity) -> Bottleneck {
        Bottleneck::new(component, t, severity, "test".to_string())
    }

    #[test]
    fn test_empty_input() {
        let engine = DefaultRecommendationEngine::new();
        assert!(engine.generate(&[]).is_empty());
    }

    #[test]
    fn test_group_takes_highest_severity() {
        let engine = DefaultRecommendationEngine::new();
        let bottlenecks = vec![
            bottleneck(Component::Background, BottleneckType::MemoryLeak, Severity::High),
            bottleneck(Component::Offscreen, BottleneckType::MemoryLeak, Severity::Critical),
        ];

        let recommendations = engine.generate(&bottlenecks);
        let memory: Vec<_> = recommendations
            .iter()
            .filter(|r| r.category == RecommendationCategory::Memory)
            .collect();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory[0].priority, Severity::Critical);
        assert!(memory[0].description.contains("background, offscreen"));

        // The critical finding also triggers the architecture review
        assert!(recommendations
            .iter()
            .any(|r| r.category == RecommendationCategory::Architecture));
    }

    #[test]
    fn test_system_wide_finding_folds_into_architecture_review() {
        let engine = DefaultRecommendationEngine::new();
        let system = Bottleneck::new(
            Component::System,
            BottleneckType::AlgorithmInefficiency,
            Severity::High,
            "Synchronized memory growth in 3 of 4 components".to_string(),
        );

        let recommendations = engine.generate(&[system.clone()]);
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].category, RecommendationCategory::Architecture);
        assert_eq!(recommendations[0].priority, Severity::High);

        let bottlenecks = vec![
            system,
            bottleneck(Component::Background, BottleneckType::MemoryLeak, Severity::Critical),
        ];
        let recommendations = engine.generate(&bottlenecks);
        let architecture: Vec<_> = recommendations
            .iter()
            .filter(|r| r.category == RecommendationCategory::Architecture)
            .collect();
        assert_eq!(architecture.len(), 1);
        assert_eq!(architecture[0].priority, Severity::Critical);
        assert!(architecture[0].description.contains("1 critical"));
        assert!(architecture[0].description.contains("Synchronized memory growth"));
        assert_eq!(recommendations.len(), 2);
    }

    #[test]
    fn test_sorted_by_priority() {
        let engine = DefaultRecommendationEngine::new();
        let bottlenecks = vec![
            bottleneck(Component::Popup, BottleneckType::Rendering, Severity::Low),
            bottleneck(Component::Background, BottleneckType::NetworkLatency, Severity::High),
            bottleneck(Component::Popup, BottleneckType::MessageQueue, Severity::Medium),
        ];

        let recommendations = engine.generate(&bottlenecks);
        let priorities: Vec<Severity> = recommendations.iter().map(|r| r.priority).collect();
        assert_eq!(
            priorities,
            vec![Severity::High, Severity::Medium, Severity::Low]
        );
    }

    #[test]
    fn test_monitoring_recommendation_above_threshold() {
        let engine = DefaultRecommendationEngine::new();
        let bottlenecks: Vec<_> = (0..11)
            .map(|_| bottleneck(Component::Popup, BottleneckType::Rendering, Severity::Low))
            .collect();

        let recommendations = engine.generate(&bottlenecks);
        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].category, RecommendationCategory::Monitoring);

        let ten: Vec<_> = bottlenecks.into_iter().take(10).collect();
        assert_eq!(engine.generate(&ten).len(), 1);
    }

    #[test]
    fn test_effort_from_minutes() {
        assert_eq!(Effort::from_minutes(30), Effort::Low);
        assert_eq!(Effort::from_minutes(120), Effort::Medium);
        assert_eq!(Effort::from_minutes(480), Effort::High);
    }
}
