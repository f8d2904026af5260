pub mod agent;
pub mod cancel;
pub mod config;
pub mod error;
pub mod monitors;
pub mod protocol;
pub mod queue;
pub mod storage;
pub mod tracer;
pub mod transport;
pub mod util;

use std::{borrow::Cow, fmt};

/// Size of a fixed process-name buffer, terminator included.
pub const NAME_CAPACITY: usize = 16;

/// Longest name that survives without truncation.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Metric {
    Cpu = 0,
    Memory = 1,
    Disk = 2,
    Network = 3,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Cpu, Metric::Memory, Metric::Disk, Metric::Network];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_u8(raw: u8) -> Option<Metric> {
        match raw {
            0 => Some(Metric::Cpu),
            1 => Some(Metric::Memory),
            2 => Some(Metric::Disk),
            3 => Some(Metric::Network),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::Network => "network",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-metric limits for one process name.
///
/// A sample violates its limit when `value >= limit`, so a limit of 0 fires
/// on every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Threshold {
    limits: [u32; 4],
}

impl Threshold {
    pub const fn new(cpu: u32, memory: u32, disk: u32, network: u32) -> Threshold {
        Threshold {
            limits: [cpu, memory, disk, network],
        }
    }

    pub const fn from_limits(limits: [u32; 4]) -> Threshold {
        Threshold { limits }
    }

    pub fn limits(&self) -> [u32; 4] {
        self.limits
    }

    pub fn get(&self, metric: Metric) -> u32 {
        self.limits[metric.index()]
    }

    /// Compare a sampled value against the limit for `metric`.
    pub fn check(&self, metric: Metric, value: u32) -> Option<Violation> {
        let threshold = self.get(metric);
        (value >= threshold).then_some(Violation {
            metric,
            value,
            threshold,
        })
    }
}

/// Process name stored in a fixed, NUL-padded buffer.
///
/// Names longer than [`MAX_NAME_LEN`] bytes are truncated (on a character
/// boundary), so a long name and its truncated form compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessName([u8; NAME_CAPACITY]);

impl ProcessName {
    pub fn new(name: &str) -> ProcessName {
        let mut end = name.len().min(MAX_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut buffer = [0u8; NAME_CAPACITY];
        buffer[..end].copy_from_slice(&name.as_bytes()[..end]);
        ProcessName(buffer)
    }

    /// Build a name from a raw wire buffer. The last byte is always forced to
    /// the terminator.
    pub fn from_bytes(mut raw: [u8; NAME_CAPACITY]) -> ProcessName {
        raw[MAX_NAME_LEN] = 0;
        ProcessName(raw)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_CAPACITY] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0[..self.len()])
    }
}

impl From<&str> for ProcessName {
    fn from(name: &str) -> Self {
        ProcessName::new(name)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// The observed sample and the limit it crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub metric: Metric,
    pub value: u32,
    pub threshold: u32,
}

/// Unit of transmission from agent to collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationInfo {
    pub pid: u32,
    pub name: ProcessName,
    pub violation: Violation,
}

impl ViolationInfo {
    pub fn new(pid: u32, name: ProcessName, violation: Violation) -> ViolationInfo {
        ViolationInfo {
            pid,
            name,
            violation,
        }
    }
}

impl fmt::Display for ViolationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Violation {
            metric,
            value,
            threshold,
        } = self.violation;
        write!(
            f,
            "PID {} ({}) violated {metric}: {value} >= {threshold}",
            self.pid, self.name
        )
    }
}
