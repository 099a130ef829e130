//! Orbit Core Stats: Pure-logic sliding-window statistics
//!
//! # Overview
//!
//! Building blocks for observing calls to an external service over time:
//!
//! - **Sliding Window Store**: Timestamped samples with window-based eviction
//! - **Percentile Tracker**: Interpolated percentiles over the retained window
//! - **Moving Average**: Exponential average decayed by elapsed time
//!
//! Like the other `orbit-core-*` crates this one has no knowledge of
//! networking, storage, or async runtimes. Every time-dependent method has an
//! `*_at(.., now)` variant so callers can drive it from their own clock.
//!
//! # Example
//!
//! ```
//! use orbit_core_stats::{MovingAverage, PercentileTracker};
//! use std::time::Duration;
//!
//! let latency = PercentileTracker::new(Duration::from_secs(300));
//! let average = MovingAverage::new(Duration::from_secs(60));
//!
//! for ms in [12.0, 15.0, 11.0, 240.0] {
//!     latency.update(ms);
//!     average.update(ms);
//! }
//!
//! assert!(latency.percentile(99.0).is_some());
//! assert!(average.average() > 0.0);
//! ```

pub mod moving_average;
pub mod percentile;
pub mod sliding_window;

pub use moving_average::MovingAverage;
pub use percentile::{percentile_of, PercentileTracker};
pub use sliding_window::{Sample, SlidingWindowStore};
