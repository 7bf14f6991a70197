//! Metric sources polled by the detection coordinator

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;

use super::metrics::{Component, MetricSample, BYTES_PER_MB};
use crate::error::{Error, Result};

/// Source of metric samples for the monitored execution contexts
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Takes one sample of a component
    ///
    /// Failures are reported as [`Error::SamplingFailure`]; the coordinator
    /// skips the component for that tick.
    async fn sample(&self, component: Component) -> Result<MetricSample>;

    /// Source name for logs
    fn name(&self) -> &str {
        "metric-source"
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Sample(MetricSample),
    Failure(String),
}

#[derive(Debug, Default)]
struct ComponentScript {
    queue: VecDeque<Scripted>,
    /// Used once the queue is drained
    fallback: Option<Scripted>,
}

/// Source replaying queued samples and failures
///
/// Queued entries are returned in order. Once a component's queue is empty,
/// its fallback is used: a repeating failure, or a template sample restamped
/// with the current time.
#[derive(Debug, Default)]
pub struct InMemoryMetricSource {
    scripts: Mutex<HashMap<Component, ComponentScript>>,
}

impl InMemoryMetricSource {
    /// Creates an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a sample for the sample's component
    pub async fn push_sample(&self, sample: MetricSample) {
        let mut scripts = self.scripts.lock().await;
        scripts
            .entry(sample.component)
            .or_default()
            .queue
            .push_back(Scripted::Sample(sample));
    }

    /// Queues several samples
    pub async fn extend(&self, samples: impl IntoIterator<Item = MetricSample>) {
        let mut scripts = self.scripts.lock().await;
        for sample in samples {
            scripts
                .entry(sample.component)
                .or_default()
                .queue
                .push_back(Scripted::Sample(sample));
        }
    }

    /// Queues a single failure for a component
    pub async fn push_failure(&self, component: Component, reason: impl Into<String>) {
        let mut scripts = self.scripts.lock().await;
        scripts
            .entry(component)
            .or_default()
            .queue
            .push_back(Scripted::Failure(reason.into()));
    }

    /// Makes a component fail every time its queue is empty
    pub async fn fail_always(&self, component: Component, reason: impl Into<String>) {
        let mut scripts = self.scripts.lock().await;
        scripts.entry(component).or_default().fallback = Some(Scripted::Failure(reason.into()));
    }

    /// Repeats `template` (restamped) every time the component's queue is empty
    pub async fn repeat(&self, template: MetricSample) {
        let component = template.component;
        let mut scripts = self.scripts.lock().await;
        scripts.entry(component).or_default().fallback = Some(Scripted::Sample(template));
    }

    /// Number of queued entries left for a component
    pub async fn remaining(&self, component: Component) -> usize {
        let scripts = self.scripts.lock().await;
        scripts.get(&component).map_or(0, |s| s.queue.len())
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn sample(&self, component: Component) -> Result<MetricSample> {
        let mut scripts = self.scripts.lock().await;
        let Some(script) = scripts.get_mut(&component) else {
            return Err(Error::sampling(component, "no sample available"));
        };

        if let Some(entry) = script.queue.pop_front() {
            return match entry {
                Scripted::Sample(sample) => Ok(sample),
                Scripted::Failure(reason) => Err(Error::sampling(component, reason)),
            };
        }

        match &script.fallback {
            Some(Scripted::Sample(template)) => {
                let mut sample = template.clone();
                sample.timestamp = Utc::now();
                Ok(sample)
            }
            Some(Scripted::Failure(reason)) => Err(Error::sampling(component, reason.clone())),
            None => Err(Error::sampling(component, "no sample available")),
        }
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Behaviour generated by [`SyntheticMetricSource`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyntheticProfile {
    /// Every dimension well within its limits
    #[default]
    Healthy,
    /// Heap grows steadily in most components
    Leaking,
    /// Slow network, backed-up queues, janky rendering and slow processing
    Degraded,
}

impl SyntheticProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyntheticProfile::Healthy => "healthy",
            SyntheticProfile::Leaking => "leaking",
            SyntheticProfile::Degraded => "degraded",
        }
    }
}

impl fmt::Display for SyntheticProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyntheticProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "healthy" => Ok(SyntheticProfile::Healthy),
            "leaking" => Ok(SyntheticProfile::Leaking),
            "degraded" => Ok(SyntheticProfile::Degraded),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown profile '{}' (expected healthy, leaking or degraded)",
                other
            ))),
        }
    }
}

/// Deterministic generator for demos and benchmarks
///
/// Values depend only on the profile, the component, the sampling time and how
/// many samples the component has produced.
#[derive(Debug)]
pub struct SyntheticMetricSource {
    profile: SyntheticProfile,
    started_at: DateTime<Utc>,
    steps: Mutex<HashMap<Component, u64>>,
}

impl SyntheticMetricSource {
    pub fn new(profile: SyntheticProfile) -> Self {
        Self {
            profile,
            started_at: Utc::now(),
            steps: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the sample a component reports at `timestamp` on its `step`-th call
    pub fn generate(
        &self,
        component: Component,
        timestamp: DateTime<Utc>,
        step: u64,
    ) -> MetricSample {
        let elapsed_secs = (timestamp - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let heap_limit = 2048.0 * BYTES_PER_MB;
        let jitter = (step % 2) as f64;
        let mut sample = MetricSample::at(component, timestamp);

        match self.profile {
            SyntheticProfile::Healthy => {
                let used = (40.0 + jitter) * BYTES_PER_MB;
                sample = sample
                    .with_memory(used, used * 1.25, heap_limit)
                    .with_blocking_operation("storage.get", 5.0 + jitter)
                    .with_queue(2, 15.0);
                if matches!(component, Component::Background | Component::ContentScript) {
                    sample = sample.with_network(120.0 + 10.0 * jitter, 0, 10);
                }
                if component.supports_rendering() {
                    sample = sample.with_render(60.0 - jitter, 1_500);
                }
                if component == Component::Offscreen {
                    sample = sample.with_processing(800.0, 1, 0.9);
                }
            }
            SyntheticProfile::Leaking => {
                let rate_mb_per_sec = match component {
                    Component::Background => 6.0,
                    Component::ContentScript => 3.0,
                    Component::Offscreen => 2.0,
                    Component::Popup | Component::System => 0.05,
                };
                let used = (40.0 + rate_mb_per_sec * elapsed_secs) * BYTES_PER_MB;
                sample = sample
                    .with_memory(used, used * 1.25, heap_limit)
                    .with_blocking_operation("storage.get", 5.0)
                    .with_queue(2, 15.0);
                if component.supports_rendering() {
                    sample = sample.with_render(58.0, 2_000 + 50 * step);
                }
            }
            SyntheticProfile::Degraded => {
                let used = 0.9 * heap_limit;
                sample = sample
                    .with_memory(used, used, heap_limit)
                    .with_blocking_operation("JSON.parse", 250.0)
                    .with_blocking_operation("querySelectorAll", 120.0)
                    .with_queue(60 + step, 1_200.0);
                if matches!(component, Component::Background | Component::ContentScript) {
                    sample = sample.with_network(6_000.0 + 100.0 * jitter, 3, 10);
                }
                if component.supports_rendering() {
                    sample = sample.with_render(12.0, 12_000);
                }
                if component == Component::Offscreen {
                    sample = sample.with_processing(35_000.0, 8, 0.1);
                }
            }
        }

        sample
    }
}

#[async_trait]
impl MetricSource for SyntheticMetricSource {
    async fn sample(&self, component: Component) -> Result<MetricSample> {
        if component == Component::System {
            return Err(Error::sampling(component, "the system component has no metrics"));
        }

        let step = {
            let mut steps = self.steps.lock().await;
            let step = steps.entry(component).or_insert(0);
            *step += 1;
            *step - 1
        };

        Ok(self.generate(component, Utc::now(), step))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_replays_in_order() {
        let source = InMemoryMetricSource::new();
        let first = MetricSample::new(Component::Popup).with_queue(1, 1.0);
        let second = MetricSample::new(Component::Popup).with_queue(2, 1.0);
        source.extend(vec![first.clone(), second.clone()]).await;
        source.push_failure(Component::Popup, "detached").await;

        assert_eq!(source.sample(Component::Popup).await.unwrap(), first);
        assert_eq!(source.sample(Component::Popup).await.unwrap(), second);
        assert!(matches!(
            source.sample(Component::Popup).await,
            Err(Error::SamplingFailure { .. })
        ));
        assert_eq!(source.remaining(Component::Popup).await, 0);
    }

    #[tokio::test]
    async fn test_in_memory_fallbacks() {
        let source = InMemoryMetricSource::new();
        source
            .repeat(MetricSample::new(Component::Background).with_queue(3, 5.0))
            .await;
        source.fail_always(Component::Offscreen, "crashed").await;

        let a = source.sample(Component::Background).await.unwrap();
        let b = source.sample(Component::Background).await.unwrap();
        assert_eq!(a.queue, b.queue);
        assert!(b.timestamp >= a.timestamp);

        let err = source.sample(Component::Offscreen).await.unwrap_err();
        assert!(err.to_string().contains("crashed"));

        // Nothing scripted at all
        assert!(source.sample(Component::ContentScript).await.is_err());
    }

    #[tokio::test]
    async fn test_synthetic_profiles() {
        let healthy = SyntheticMetricSource::new(SyntheticProfile::Healthy);
        let sample = healthy.sample(Component::Popup).await.unwrap();
        assert!(sample.render.is_some());
        assert!(sample.processing.is_none());

        let degraded = SyntheticMetricSource::new(SyntheticProfile::Degraded);
        let sample = degraded.sample(Component::Offscreen).await.unwrap();
        assert!(sample.processing.is_some());
        assert!(sample.render.is_none());

        assert!(degraded.sample(Component::System).await.is_err());
    }

    #[test]
    fn test_remaining_counts_queue_only() {
        let source = InMemoryMetricSource::new();
        tokio_test::block_on(async {
            source.push_failure(Component::Offscreen, "busy").await;
            source.push_failure(Component::Offscreen, "busy").await;
            source.fail_always(Component::Offscreen, "gone").await;
            assert_eq!(source.remaining(Component::Offscreen).await, 2);

            let _ = source.sample(Component::Offscreen).await;
            assert_eq!(source.remaining(Component::Offscreen).await, 1);
        });
    }

    #[test]
    fn test_leaking_profile_grows_with_time() {
        let source = SyntheticMetricSource::new(SyntheticProfile::Leaking);
        let t0 = source.started_at;
        let t1 = t0 + chrono::Duration::seconds(10);

        let before = source.generate(Component::Background, t0, 0).memory.unwrap();
        let after = source.generate(Component::Background, t1, 1).memory.unwrap();
        let growth_mb = (after.used_heap - before.used_heap) / BYTES_PER_MB;
        assert!((growth_mb - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!(
            "Leaking".parse::<SyntheticProfile>().unwrap(),
            SyntheticProfile::Leaking
        );
        assert!("chaotic".parse::<SyntheticProfile>().is_err());
        assert_eq!(SyntheticProfile::Degraded.to_string(), "degraded");
    }
}
