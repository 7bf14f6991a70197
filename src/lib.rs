//! # perfscope
//!
//! Performance bottleneck detection for browser extensions.
//!
//! The engine polls resource metrics from each execution context (background
//! service worker, content script, offscreen document, popup), tracks their
//! trends, classifies bottlenecks per resource dimension and turns them into a
//! scored report with prioritized recommendations.

pub mod config;
pub mod error;
pub mod logging;
pub mod performance;

pub use config::DetectionConfig;
pub use error::{Error, Result};
pub use performance::{DetectionCoordinator, DetectionResult};
