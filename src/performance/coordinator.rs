//! Polling loop tying sources, analysis and reporting together

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bottleneck::{Bottleneck, BottleneckType, Severity};
use super::classifier::BottleneckClassifier;
use super::metrics::{Component, TrendField};
use super::recommendation::{DefaultRecommendationEngine, RecommendationEngine};
use super::report::{DetectionResult, DetectionStatistics};
use super::source::MetricSource;
use super::store::MetricStore;
#[cfg(feature = "prometheus")]
use super::telemetry::DetectionMetrics;
use super::trend::TrendAnalyzer;
use crate::config::DetectionConfig;
use crate::error::{Error, Result};

/// Mutable session state, guarded by a single lock
#[derive(Debug)]
struct DetectionState {
    store: MetricStore,
    bottlenecks: Vec<Bottleneck>,
    /// Last emission time and severity per (component, type)
    last_seen: HashMap<(Component, BottleneckType), (Instant, Severity)>,
    statistics: DetectionStatistics,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    /// Bumped on every start/stop so late ticks of an old session are dropped
    generation: u64,
}

impl DetectionState {
    fn new(capacity: usize) -> Self {
        Self {
            store: MetricStore::new(capacity),
            bottlenecks: Vec::new(),
            last_seen: HashMap::new(),
            statistics: DetectionStatistics::default(),
            started_at: None,
            stopped_at: None,
            generation: 0,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.store.clear();
        self.bottlenecks.clear();
        self.last_seen.clear();
        self.statistics = DetectionStatistics::default();
        self.started_at = Some(now);
        self.stopped_at = None;
        self.generation += 1;
    }

    fn monitoring_duration(&self) -> Duration {
        match self.started_at {
            Some(started) => self.stopped_at.unwrap_or_else(Instant::now) - started,
            None => Duration::ZERO,
        }
    }

    /// Records the findings of one tick, suppressing repeats within the cooldown
    ///
    /// Findings of the same tick never suppress each other.
    fn merge(
        &mut self,
        found: Vec<Bottleneck>,
        now: Instant,
        cooldown: Duration,
    ) -> Vec<Bottleneck> {
        let previous = self.last_seen.clone();
        let mut recorded = Vec::new();

        for bottleneck in found {
            let key = bottleneck.key();
            if !cooldown.is_zero() {
                if let Some((seen, severity)) = previous.get(&key) {
                    if now.duration_since(*seen) < cooldown && bottleneck.severity <= *severity {
                        self.statistics.suppressed_duplicates += 1;
                        continue;
                    }
                }
            }

            let severity = match self.last_seen.get(&key) {
                Some((seen, kept)) if now.duration_since(*seen) < cooldown => {
                    (*kept).max(bottleneck.severity)
                }
                _ => bottleneck.severity,
            };
            self.last_seen.insert(key, (now, severity));

            self.bottlenecks.push(bottleneck.clone());
            recorded.push(bottleneck);
        }

        recorded
    }
}

/// Shared engine used by the loop and by every tick task
struct DetectionEngine {
    config: DetectionConfig,
    source: Arc<dyn MetricSource>,
    analyzer: TrendAnalyzer,
    classifier: BottleneckClassifier,
    recommender: Box<dyn RecommendationEngine>,
    state: Mutex<DetectionState>,
    /// Held for the whole of a tick, so ticks never overlap
    tick_permit: Arc<Mutex<()>>,
    #[cfg(feature = "prometheus")]
    metrics: Option<Arc<DetectionMetrics>>,
}

impl DetectionEngine {
    /// Samples every monitored component, then analyzes under one lock
    ///
    /// Callers must hold the tick permit.
    async fn tick(&self) -> Vec<Bottleneck> {
        let tick_started = Instant::now();
        let generation = self.state.lock().await.generation;

        let samples = join_all(self.config.components.iter().map(|&component| async move {
            (component, self.source.sample(component).await)
        }))
        .await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Discarding tick from a finished session");
            return Vec::new();
        }
        if state.started_at.is_none() {
            state.started_at = Some(tick_started);
        }

        let mut sampled = Vec::new();
        let mut failures = 0u64;
        for (component, result) in samples {
            let appended = result.and_then(|mut sample| {
                sample.component = component;
                state.store.append(component, sample)
            });
            match appended {
                Ok(()) => sampled.push(component),
                Err(e @ Error::OutOfOrderSample { .. }) => {
                    debug!(component = %component, "Sample not stored: {}", e);
                    state.statistics.out_of_order_rejected += 1;
                }
                Err(e) => {
                    warn!(
                        component = %component,
                        source = self.source.name(),
                        "Sampling failed: {}",
                        e
                    );
                    state.statistics.sampling_failures += 1;
                    failures += 1;
                }
            }
        }

        let window_size = self.config.analysis_window_size;
        let mut found = Vec::new();
        let mut trends = Vec::with_capacity(self.config.components.len());
        for &component in &self.config.components {
            let window = state.store.window(component, window_size);
            let trend = self.analyzer.analyze(&window, TrendField::UsedHeap);
            if sampled.contains(&component) {
                found.extend(self.classifier.evaluate(component, &window, &trend));
            }
            trends.push((component, trend));
        }
        found.extend(self.classifier.correlate(&trends));

        let recorded = state.merge(found, Instant::now(), self.config.dedup_cooldown());
        state.statistics.ticks_completed += 1;

        for bottleneck in &recorded {
            info!(
                component = %bottleneck.component,
                bottleneck_type = %bottleneck.bottleneck_type,
                severity = %bottleneck.severity,
                "Bottleneck detected: {}",
                bottleneck.description
            );
        }
        debug!(
            sampled = sampled.len(),
            failures,
            recorded = recorded.len(),
            total = state.bottlenecks.len(),
            "Tick completed"
        );

        #[cfg(feature = "prometheus")]
        if let Some(metrics) = &self.metrics {
            metrics.record_tick(tick_started.elapsed().as_secs_f64());
            metrics.record_sampling_failures(failures);
            for bottleneck in &recorded {
                metrics.record_bottleneck(bottleneck);
            }
        }

        recorded
    }

    async fn record_skipped_tick(&self) {
        self.state.lock().await.statistics.ticks_skipped += 1;
        #[cfg(feature = "prometheus")]
        if let Some(metrics) = &self.metrics {
            metrics.record_skipped_tick();
        }
    }

    async fn snapshot(&self) -> DetectionResult {
        let state = self.state.lock().await;
        let bottlenecks = state.bottlenecks.clone();
        let recommendations = self.recommender.generate(&bottlenecks);
        let result = DetectionResult::new(
            bottlenecks,
            recommendations,
            state.monitoring_duration().as_millis() as u64,
            state.statistics,
            self.config.components.clone(),
        );

        #[cfg(feature = "prometheus")]
        if let Some(metrics) = &self.metrics {
            metrics.set_overall_score(result.overall_score);
        }

        result
    }

    /// Drives ticks until cancelled, then waits for the in-flight tick
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<Vec<Bottleneck>>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Ok(permit) = Arc::clone(&self.tick_permit).try_lock_owned() else {
                        warn!("Previous tick still running, skipping this tick");
                        self.record_skipped_tick().await;
                        continue;
                    };
                    let engine = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move {
                        let _permit = permit;
                        engine.tick().await
                    }));
                }
            }
        }

        if let Some(handle) = in_flight {
            match timeout(self.config.stop_timeout(), handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Tick task failed: {}", e),
                Err(_) => warn!(
                    timeout_ms = self.config.stop_timeout_ms,
                    "In-flight tick did not finish before the stop timeout"
                ),
            }
        }
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic bottleneck detection over a [`MetricSource`]
///
/// ```no_run
/// use std::sync::Arc;
/// use perfscope::config::DetectionConfig;
/// use perfscope::performance::{DetectionCoordinator, SyntheticMetricSource, SyntheticProfile};
///
/// # async fn run() -> perfscope::Result<()> {
/// let source = Arc::new(SyntheticMetricSource::new(SyntheticProfile::Leaking));
/// let coordinator = DetectionCoordinator::new(DetectionConfig::default(), source)?;
/// coordinator.start().await;
/// tokio::time::sleep(std::time::Duration::from_secs(10)).await;
/// let result = coordinator.stop().await;
/// println!("score: {}", result.overall_score);
/// # Ok(())
/// # }
/// ```
pub struct DetectionCoordinator {
    engine: Arc<DetectionEngine>,
    running: Mutex<Option<RunningLoop>>,
}

impl DetectionCoordinator {
    /// Creates a coordinator with the default recommendation engine
    pub fn new(config: DetectionConfig, source: Arc<dyn MetricSource>) -> Result<Self> {
        Self::builder(config).source(source).build()
    }

    pub fn builder(config: DetectionConfig) -> DetectionCoordinatorBuilder {
        DetectionCoordinatorBuilder {
            config,
            source: None,
            recommender: None,
            #[cfg(feature = "prometheus")]
            metrics: None,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.engine.config
    }

    /// Opens a new session and starts ticking
    ///
    /// Bottlenecks, history and statistics of a previous session are cleared.
    /// Calling `start` on a running coordinator does nothing.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
        {
            warn!("Detection already running");
            return;
        }

        self.engine.state.lock().await.reset(Instant::now());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.engine).run(cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });

        info!(
            interval_ms = self.engine.config.tick_interval_ms,
            components = self.engine.config.components.len(),
            source = self.engine.source.name(),
            "Bottleneck detection started"
        );
    }

    /// Stops ticking and returns the session report
    ///
    /// Waits up to `stop_timeout_ms` for an in-flight tick. Never fails; on an
    /// idle coordinator it returns the current snapshot.
    pub async fn stop(&self) -> DetectionResult {
        // Held until the report is taken so a concurrent start waits for us
        let mut running = self.running.lock().await;

        if let Some(RunningLoop { cancel, handle }) = running.take() {
            cancel.cancel();
            // The loop itself bounds its wait by the stop timeout
            let grace = self.engine.config.stop_timeout() + Duration::from_millis(100);
            match timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Detection loop failed: {}", e),
                Err(_) => warn!("Detection loop did not stop in time"),
            }

            let mut state = self.engine.state.lock().await;
            state.stopped_at = Some(Instant::now());
            state.generation += 1;
        }

        let result = self.engine.snapshot().await;
        info!(
            total = result.total_bottlenecks,
            critical = result.critical_bottlenecks,
            score = result.overall_score,
            duration_ms = result.monitoring_duration_ms,
            "Bottleneck detection stopped"
        );
        drop(running);
        result
    }

    /// Current report without stopping
    pub async fn snapshot(&self) -> DetectionResult {
        self.engine.snapshot().await
    }

    /// Runs one tick and returns the newly recorded bottlenecks
    ///
    /// Waits for a tick already in flight to finish first.
    pub async fn run_tick(&self) -> Vec<Bottleneck> {
        let _permit = self.engine.tick_permit.lock().await;
        self.engine.tick().await
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Bottlenecks recorded for one component in the current session
    pub async fn bottlenecks_for(&self, component: Component) -> Vec<Bottleneck> {
        self.engine
            .state
            .lock()
            .await
            .bottlenecks
            .iter()
            .filter(|b| b.component == component)
            .cloned()
            .collect()
    }

    /// Samples stored for a component
    pub async fn history_len(&self, component: Component) -> usize {
        self.engine.state.lock().await.store.len(component)
    }
}

/// Builder for [`DetectionCoordinator`]
pub struct DetectionCoordinatorBuilder {
    config: DetectionConfig,
    source: Option<Arc<dyn MetricSource>>,
    recommender: Option<Box<dyn RecommendationEngine>>,
    #[cfg(feature = "prometheus")]
    metrics: Option<Arc<DetectionMetrics>>,
}

impl DetectionCoordinatorBuilder {
    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn recommendation_engine(mut self, engine: Box<dyn RecommendationEngine>) -> Self {
        self.recommender = Some(engine);
        self
    }

    #[cfg(feature = "prometheus")]
    pub fn metrics(mut self, metrics: Arc<DetectionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the configuration and builds the coordinator
    pub fn build(self) -> Result<DetectionCoordinator> {
        self.config.validate()?;
        let source = self.source.ok_or_else(|| {
            Error::InvalidConfiguration("a metric source is required".to_string())
        })?;

        let engine = DetectionEngine {
            analyzer: TrendAnalyzer::new(
                &self.config.thresholds.memory,
                self.config.tick_interval(),
            ),
            classifier: BottleneckClassifier::from_config(&self.config),
            recommender: self
                .recommender
                .unwrap_or_else(|| Box::new(DefaultRecommendationEngine::new())),
            state: Mutex::new(DetectionState::new(self.config.series_capacity)),
            tick_permit: Arc::new(Mutex::new(())),
            source,
            #[cfg(feature = "prometheus")]
            metrics: self.metrics,
            config: self.config,
        };

        Ok(DetectionCoordinator {
            engine: Arc::new(engine),
            running: Mutex::new(None),
        })
    }
}
