//! Bounded per-component metric history

use std::collections::{BTreeMap, VecDeque};

use tracing::warn;

use super::metrics::{Component, MetricSample};
use crate::error::{Error, Result};

/// Default number of samples kept per component
pub const DEFAULT_SERIES_CAPACITY: usize = 100;

/// Fixed-capacity, chronologically ordered samples of one component
#[derive(Debug, Clone)]
pub struct ComponentSeries {
    component: Component,
    capacity: usize,
    samples: VecDeque<MetricSample>,
}

impl ComponentSeries {
    /// Creates an empty series
    pub fn new(component: Component, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            component,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a sample, evicting the oldest one when full
    ///
    /// A sample older than the newest stored one is rejected and the series is
    /// left untouched. Equal timestamps are accepted.
    pub fn push(&mut self, sample: MetricSample) -> Result<()> {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(Error::OutOfOrderSample {
                    component: self.component,
                    timestamp: sample.timestamp,
                    last_timestamp: last.timestamp,
                });
            }
        }

        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Returns the last `n` samples in chronological order
    pub fn window(&self, n: usize) -> Vec<MetricSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn component(&self) -> Component {
        self.component
    }
}

/// Time-series storage for all monitored components
///
/// Owned by the detection coordinator; there is no internal locking.
#[derive(Debug, Clone)]
pub struct MetricStore {
    capacity: usize,
    series: BTreeMap<Component, ComponentSeries>,
}

impl MetricStore {
    /// Creates an empty store with the given per-component capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    /// Appends a sample to the component's series
    ///
    /// Out-of-order samples are logged and reported back to the caller; the
    /// store is not modified.
    pub fn append(&mut self, component: Component, sample: MetricSample) -> Result<()> {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(component)
            .or_insert_with(|| ComponentSeries::new(component, capacity));

        series.push(sample).inspect_err(|e| {
            warn!(component = %component, "Rejected sample: {}", e);
        })
    }

    /// Returns up to the last `n` samples of a component
    pub fn window(&self, component: Component, n: usize) -> Vec<MetricSample> {
        self.series
            .get(&component)
            .map(|s| s.window(n))
            .unwrap_or_default()
    }

    /// Returns the series of a component, if any sample was stored
    pub fn series(&self, component: Component) -> Option<&ComponentSeries> {
        self.series.get(&component)
    }

    /// Most recent sample of a component
    pub fn latest(&self, component: Component) -> Option<&MetricSample> {
        self.series.get(&component).and_then(ComponentSeries::latest)
    }

    /// Number of samples stored for a component
    pub fn len(&self, component: Component) -> usize {
        self.series.get(&component).map_or(0, ComponentSeries::len)
    }

    /// Components with at least one stored sample
    pub fn components(&self) -> Vec<Component> {
        self.series.keys().copied().collect()
    }

    /// Drops every series
    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAPACITY)
    }
}
