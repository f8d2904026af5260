use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::trace;

use crate::util::lock;

/// Raw counters for one process at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    /// CPU time consumed by the process
    pub cpu_used: u64,
    /// Total CPU time available to the system, in the same unit
    pub cpu_total: u64,
    pub memory_bytes: u64,
}

/// Source of per-process metrics.
pub trait ProcessMetrics: Send + Sync {
    /// `None` when the process cannot currently supply a snapshot, which
    /// includes a process that has exited.
    fn sample(&self, pid: u32) -> Option<Sample>;

    /// Only consulted after [`ProcessMetrics::sample`] came back empty.
    fn is_exited(&self, pid: u32) -> bool;
}

/// Metrics read through `sysinfo`.
///
/// CPU counters are in milliseconds: the process's accumulated CPU time
/// against wall-clock time since construction multiplied by the CPU count, so
/// a rate of 10000 is every core fully busy.
#[derive(Debug)]
pub struct SysinfoMetrics {
    system: Mutex<System>,
    started: Instant,
    cpus: u64,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get() as u64);
        Self {
            system: Mutex::new(System::new()),
            started: Instant::now(),
            cpus,
        }
    }

    fn refresh(system: &mut System, pid: Pid) {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMetrics for SysinfoMetrics {
    fn sample(&self, pid: u32) -> Option<Sample> {
        let pid = Pid::from_u32(pid);
        let mut system = lock(&self.system);
        Self::refresh(&mut system, pid);

        let process = system.process(pid).filter(|process| !is_gone(process))?;
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let sample = Sample {
            cpu_used: process.accumulated_cpu_time(),
            cpu_total: elapsed_ms.saturating_mul(self.cpus),
            memory_bytes: process.memory(),
        };
        trace!("sampled {pid}: {sample:?}");
        Some(sample)
    }

    fn is_exited(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = lock(&self.system);
        Self::refresh(&mut system, pid);

        system.process(pid).is_none_or(is_gone)
    }
}

fn is_gone(process: &Process) -> bool {
    matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}
