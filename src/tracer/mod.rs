//! Process lifecycle / native violation event source
//!
//! A tracer watches the process table for names in its monitor set and
//! reports `NewProcess` when one starts. Metrics it can measure natively are
//! compared against the monitored thresholds inside the tracer and reported
//! as ready-made `Violation` events.
//!
//! Creation is the implementation's constructor and release is `Drop`; events
//! are owned values, so there is no explicit event release.

pub mod fake;
pub mod polling;

use std::time::Duration;

use crate::{ProcessName, Threshold, ViolationInfo, error::TracerError};

pub use fake::FakeTracer;
pub use polling::SysinfoTracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerEvent {
    NewProcess { pid: u32, name: ProcessName },
    Violation(ViolationInfo),
}

pub trait Tracer: Send + Sync {
    /// Add `name` to the monitor set (or update its threshold).
    fn set_monitor(&self, name: &ProcessName, threshold: Threshold) -> Result<(), TracerError>;

    /// Empty the monitor set.
    fn clear_monitor(&self) -> Result<(), TracerError>;

    /// Wait at most `timeout` for the next event.
    fn next_event(&self, timeout: Duration) -> Result<Option<TracerEvent>, TracerError>;
}
