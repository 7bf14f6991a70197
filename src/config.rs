//! Detection configuration and loading

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::performance::metrics::Component;

/// Environment variable prefix (e.g. `PERFSCOPE_TICK_INTERVAL_MS=500`)
pub const ENV_PREFIX: &str = "PERFSCOPE";

/// Top-level detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Delay between ticks
    pub tick_interval_ms: u64,
    /// Samples kept per component
    pub series_capacity: usize,
    /// Samples per component considered by each analysis
    pub analysis_window_size: usize,
    /// Window in which a repeated (component, type) finding is suppressed; 0 disables
    pub dedup_cooldown_ms: u64,
    /// Upper bound `stop()` waits for an in-flight tick
    pub stop_timeout_ms: u64,
    /// Components polled every tick
    pub components: Vec<Component>,
    /// Classification thresholds
    pub thresholds: DetectionThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            series_capacity: 100,
            analysis_window_size: 10,
            dedup_cooldown_ms: 60_000,
            stop_timeout_ms: 5_000,
            components: Component::MONITORED.to_vec(),
            thresholds: DetectionThresholds::default(),
        }
    }
}

/// Per-dimension thresholds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    pub memory: MemoryThresholds,
    pub cpu: CpuThresholds,
    pub network: NetworkThresholds,
    pub queue: QueueThresholds,
    pub render: RenderThresholds,
    pub processing: ProcessingThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    /// used/limit ratio above which usage is high
    pub usage_high: f64,
    /// used/limit ratio above which usage is critical
    pub usage_critical: f64,
    pub leak_minor_mb_per_sec: f64,
    pub leak_moderate_mb_per_sec: f64,
    pub leak_severe_mb_per_sec: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            usage_high: 0.8,
            usage_critical: 0.95,
            leak_minor_mb_per_sec: 0.1,
            leak_moderate_mb_per_sec: 1.0,
            leak_severe_mb_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuThresholds {
    /// Cumulative blocking time in the window
    pub blocking_medium_ms: f64,
    pub blocking_high_ms: f64,
}

impl Default for CpuThresholds {
    fn default() -> Self {
        Self {
            blocking_medium_ms: 100.0,
            blocking_high_ms: 500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkThresholds {
    pub latency_medium_ms: f64,
    pub latency_high_ms: f64,
    /// Failed / total requests
    pub failure_rate_medium: f64,
    pub failure_rate_high: f64,
}

impl Default for NetworkThresholds {
    fn default() -> Self {
        Self {
            latency_medium_ms: 2000.0,
            latency_high_ms: 5000.0,
            failure_rate_medium: 0.10,
            failure_rate_high: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueThresholds {
    pub backlog_medium: f64,
    pub backlog_high: f64,
    pub latency_medium_ms: f64,
    pub latency_high_ms: f64,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self {
            backlog_medium: 10.0,
            backlog_high: 50.0,
            latency_medium_ms: 200.0,
            latency_high_ms: 1000.0,
        }
    }
}

/// Rendering thresholds; frame rate is bad when it falls *below* a limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderThresholds {
    pub frame_rate_medium: f64,
    pub frame_rate_high: f64,
    pub dom_size_medium: f64,
    pub dom_size_high: f64,
}

impl Default for RenderThresholds {
    fn default() -> Self {
        Self {
            frame_rate_medium: 30.0,
            frame_rate_high: 15.0,
            dom_size_medium: 5000.0,
            dom_size_high: 10000.0,
        }
    }
}

/// Background processing thresholds; cache hit rate is bad *below* a limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingThresholds {
    pub duration_medium_ms: f64,
    pub duration_high_ms: f64,
    pub cache_hit_rate_medium: f64,
    pub cache_hit_rate_high: f64,
}

impl Default for ProcessingThresholds {
    fn default() -> Self {
        Self {
            duration_medium_ms: 10_000.0,
            duration_high_ms: 30_000.0,
            cache_hit_rate_medium: 0.5,
            cache_hit_rate_high: 0.2,
        }
    }
}

impl DetectionConfig {
    /// Loads defaults, then an optional TOML file, then `PERFSCOPE_*` variables
    ///
    /// Nested keys use a double underscore, e.g.
    /// `PERFSCOPE_THRESHOLDS__NETWORK__LATENCY_HIGH_MS=8000`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: DetectionConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML
    pub fn save_to_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.into(), content)?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn dedup_cooldown(&self) -> Duration {
        Duration::from_millis(self.dedup_cooldown_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validates intervals, sizes and threshold ordering
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be greater than 0"));
        }
        if self.series_capacity == 0 {
            return Err(invalid("series_capacity must be greater than 0"));
        }
        if self.analysis_window_size < 2 {
            return Err(invalid("analysis_window_size must be at least 2"));
        }
        if self.analysis_window_size > self.series_capacity {
            return Err(invalid("analysis_window_size cannot exceed series_capacity"));
        }
        if self.components.is_empty() {
            return Err(invalid("at least one component must be monitored"));
        }
        if self.components.contains(&Component::System) {
            return Err(invalid("the system component cannot be sampled"));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.components.iter().find(|c| !seen.insert(**c)) {
            return Err(Error::InvalidConfiguration(format!(
                "component {} is listed more than once",
                duplicate
            )));
        }

        let t = &self.thresholds;
        ascending("memory.usage_high", t.memory.usage_high, t.memory.usage_critical)?;
        ascending(
            "memory.leak_minor_mb_per_sec",
            t.memory.leak_minor_mb_per_sec,
            t.memory.leak_moderate_mb_per_sec,
        )?;
        ascending(
            "memory.leak_moderate_mb_per_sec",
            t.memory.leak_moderate_mb_per_sec,
            t.memory.leak_severe_mb_per_sec,
        )?;
        ascending("cpu.blocking_medium_ms", t.cpu.blocking_medium_ms, t.cpu.blocking_high_ms)?;
        ascending(
            "network.latency_medium_ms",
            t.network.latency_medium_ms,
            t.network.latency_high_ms,
        )?;
        ascending(
            "network.failure_rate_medium",
            t.network.failure_rate_medium,
            t.network.failure_rate_high,
        )?;
        ascending("queue.backlog_medium", t.queue.backlog_medium, t.queue.backlog_high)?;
        ascending(
            "queue.latency_medium_ms",
            t.queue.latency_medium_ms,
            t.queue.latency_high_ms,
        )?;
        // lower-is-worse limits run the other way
        ascending(
            "render.frame_rate_high",
            t.render.frame_rate_high,
            t.render.frame_rate_medium,
        )?;
        ascending("render.dom_size_medium", t.render.dom_size_medium, t.render.dom_size_high)?;
        ascending(
            "processing.duration_medium_ms",
            t.processing.duration_medium_ms,
            t.processing.duration_high_ms,
        )?;
        ascending(
            "processing.cache_hit_rate_high",
            t.processing.cache_hit_rate_high,
            t.processing.cache_hit_rate_medium,
        )?;

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfiguration(message.to_string())
}

fn ascending(name: &str, lower: f64, upper: f64) -> Result<()> {
    if !(lower.is_finite() && upper.is_finite()) || lower <= 0.0 || lower >= upper {
        return Err(Error::InvalidConfiguration(format!(
            "{} ({}) must be positive and below its upper bound ({})",
            name, lower, upper
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.series_capacity, 100);
        assert_eq!(config.components.len(), 4);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = DetectionConfig {
            tick_interval_ms: 0,
            ..DetectionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = DetectionConfig::default();
        config.thresholds.network.latency_medium_ms = 6000.0;
        assert!(config.validate().is_err());

        let mut config = DetectionConfig::default();
        config.thresholds.render.frame_rate_high = 45.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_system_component_rejected() {
        let config = DetectionConfig {
            components: vec![Component::Background, Component::System],
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let config = DetectionConfig {
            components: vec![Component::Background, Component::Background, Component::Popup],
            ..DetectionConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("background"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = DetectionConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: DetectionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
