//! Metric samples collected from the extension's execution contexts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bytes in one megabyte
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Monitored execution context
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// Background coordinator (service worker)
    Background,
    /// Page-injected content script
    ContentScript,
    /// Offscreen worker document
    Offscreen,
    /// Popup / options UI surface
    Popup,
    /// Cross-component findings that are not tied to one context
    System,
}

impl Component {
    /// All execution contexts that can be sampled
    pub const MONITORED: [Component; 4] = [
        Component::Background,
        Component::ContentScript,
        Component::Offscreen,
        Component::Popup,
    ];

    /// Returns true when the component renders a DOM the user sees
    pub fn supports_rendering(&self) -> bool {
        matches!(self, Component::ContentScript | Component::Popup)
    }

    /// Stable identifier used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Background => "background",
            Component::ContentScript => "content-script",
            Component::Offscreen => "offscreen",
            Component::Popup => "popup",
            Component::System => "system",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heap usage in bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MemoryMetrics {
    /// Used JS heap
    pub used_heap: f64,
    /// Total allocated JS heap
    pub total_heap: f64,
    /// Heap size limit
    pub heap_limit: f64,
}

impl MemoryMetrics {
    /// Fraction of the heap limit currently in use
    pub fn usage_ratio(&self) -> f64 {
        if self.heap_limit > 0.0 {
            self.used_heap / self.heap_limit
        } else {
            0.0
        }
    }
}

/// A named operation and how long it blocked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimedOperation {
    /// Operation name
    pub name: String,
    /// Duration in milliseconds
    pub duration_ms: f64,
}

impl TimedOperation {
    pub fn new(name: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            name: name.into(),
            duration_ms,
        }
    }
}

/// Main-thread activity observed since the previous sample
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuMetrics {
    /// Synchronous operations that blocked the thread
    pub blocking_operations: Vec<TimedOperation>,
    /// Long tasks reported by the runtime
    pub long_tasks: Vec<TimedOperation>,
}

impl CpuMetrics {
    /// Total blocking time in this sample
    pub fn blocking_time_ms(&self) -> f64 {
        self.blocking_operations.iter().map(|op| op.duration_ms).sum()
    }
}

/// Network request statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NetworkMetrics {
    /// Average request latency in milliseconds
    pub latency_ms: f64,
    /// Failed requests
    pub failure_count: u64,
    /// Total requests
    pub total_count: u64,
}

/// Runtime message queue statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QueueMetrics {
    /// Messages waiting for delivery
    pub backlog: u64,
    /// Average delivery latency in milliseconds
    pub avg_latency_ms: f64,
}

/// Rendering statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RenderMetrics {
    /// Frames per second
    pub frame_rate: f64,
    /// Number of DOM nodes
    pub dom_size: u64,
}

/// Background processing statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProcessingMetrics {
    /// Duration of the last processing job in milliseconds
    pub duration_ms: f64,
    /// Jobs waiting to be processed
    pub queue_length: u64,
    /// Result cache hit rate (0.0 to 1.0)
    pub cache_hit_rate: f64,
}

/// One observation of a component
///
/// Every dimension is optional: a source only fills in what it could measure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    /// Sampling time
    pub timestamp: DateTime<Utc>,
    /// Component the sample was taken from
    pub component: Component,
    pub memory: Option<MemoryMetrics>,
    pub cpu: Option<CpuMetrics>,
    pub network: Option<NetworkMetrics>,
    pub queue: Option<QueueMetrics>,
    pub render: Option<RenderMetrics>,
    pub processing: Option<ProcessingMetrics>,
}

impl MetricSample {
    /// Creates an empty sample stamped with the current time
    pub fn new(component: Component) -> Self {
        Self::at(component, Utc::now())
    }

    /// Creates an empty sample with an explicit timestamp
    pub fn at(component: Component, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            component,
            memory: None,
            cpu: None,
            network: None,
            queue: None,
            render: None,
            processing: None,
        }
    }

    /// Sets heap usage (bytes)
    pub fn with_memory(mut self, used_heap: f64, total_heap: f64, heap_limit: f64) -> Self {
        self.memory = Some(MemoryMetrics {
            used_heap,
            total_heap,
            heap_limit,
        });
        self
    }

    /// Sets main-thread activity
    pub fn with_cpu(mut self, cpu: CpuMetrics) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Adds a single blocking operation
    pub fn with_blocking_operation(mut self, name: impl Into<String>, duration_ms: f64) -> Self {
        self.cpu
            .get_or_insert_with(CpuMetrics::default)
            .blocking_operations
            .push(TimedOperation::new(name, duration_ms));
        self
    }

    /// Sets network statistics
    pub fn with_network(mut self, latency_ms: f64, failure_count: u64, total_count: u64) -> Self {
        self.network = Some(NetworkMetrics {
            latency_ms,
            failure_count,
            total_count,
        });
        self
    }

    /// Sets message queue statistics
    pub fn with_queue(mut self, backlog: u64, avg_latency_ms: f64) -> Self {
        self.queue = Some(QueueMetrics {
            backlog,
            avg_latency_ms,
        });
        self
    }

    /// Sets rendering statistics
    pub fn with_render(mut self, frame_rate: f64, dom_size: u64) -> Self {
        self.render = Some(RenderMetrics {
            frame_rate,
            dom_size,
        });
        self
    }

    /// Sets background processing statistics
    pub fn with_processing(
        mut self,
        duration_ms: f64,
        queue_length: u64,
        cache_hit_rate: f64,
    ) -> Self {
        self.processing = Some(ProcessingMetrics {
            duration_ms,
            queue_length,
            cache_hit_rate: cache_hit_rate.clamp(0.0, 1.0),
        });
        self
    }
}

/// Scalar value a trend can be computed over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendField {
    /// Used heap in bytes
    UsedHeap,
}

impl TrendField {
    /// Extracts the field from a sample, if the sample carries it
    pub fn extract(&self, sample: &MetricSample) -> Option<f64> {
        match self {
            TrendField::UsedHeap => sample.memory.map(|m| m.used_heap),
        }
    }
}
