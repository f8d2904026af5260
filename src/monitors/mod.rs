//! Violation detection engine
//!
//! ```text
//! tracer events ──► ProcessRegistry ◄── periodic sweep
//!        │                 │                   │
//!        │ native          │ CPU / memory      │ ThresholdTable lookup
//!        ▼ violations      ▼ samples           ▼
//!                     ViolationQueue ──► transport
//! ```
//!
//! - [`sampler`]: CPU-rate arithmetic
//! - [`registry`]: PID → per-process sampling state
//! - [`thresholds`]: current process-name → threshold mapping
//! - [`resources`]: per-process metric source (sysinfo backed)
//! - [`detector`]: the two violation producers and configuration application

pub mod detector;
pub mod registry;
pub mod resources;
pub mod sampler;
pub mod thresholds;

pub use detector::Monitor;
pub use registry::{ProcessMetricState, ProcessRegistry};
pub use resources::{ProcessMetrics, Sample, SysinfoMetrics};
pub use thresholds::ThresholdTable;
