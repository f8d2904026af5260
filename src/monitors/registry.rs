//! Thread-guarded PID → sampling state map
//!
//! A single coarse mutex guards the whole map. The periodic sweep holds it for
//! the duration of one pass over every process; tracer inserts wait for the
//! sweep to finish. This is an accepted throughput bottleneck, kept for
//! simplicity until profiling shows the need for sharding.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{resources::Sample, sampler::CpuCounters};
use crate::{ProcessName, util::lock};

/// Sampling state of one observed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMetricState {
    pid: u32,
    name: ProcessName,
    cpu: CpuCounters,
    memory_bytes: u64,
}

impl ProcessMetricState {
    /// State whose baseline is the first sample taken for the process.
    pub fn new(pid: u32, name: ProcessName, initial: &Sample) -> Self {
        Self {
            pid,
            name,
            cpu: CpuCounters::new(initial.cpu_used, initial.cpu_total),
            memory_bytes: initial.memory_bytes,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &ProcessName {
        &self.name
    }

    pub fn cpu(&self) -> CpuCounters {
        self.cpu
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    /// Record a new sample, returning the CPU rate since the previous one.
    pub fn refresh(&mut self, sample: &Sample) -> u64 {
        self.memory_bytes = sample.memory_bytes;
        self.cpu.advance(sample.cpu_used, sample.cpu_total)
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: Mutex<HashMap<u32, ProcessMetricState>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the state for `pid`.
    pub fn upsert(&self, pid: u32, state: ProcessMetricState) -> Option<ProcessMetricState> {
        lock(&self.processes).insert(pid, state)
    }

    pub fn remove(&self, pid: u32) -> Option<ProcessMetricState> {
        lock(&self.processes).remove(&pid)
    }

    /// Visit every entry under the registry lock. Entries for which `f`
    /// returns `false` are removed.
    pub fn for_each_mut<F>(&self, mut f: F)
    where
        F: FnMut(&mut ProcessMetricState) -> bool,
    {
        lock(&self.processes).retain(|_, state| f(state));
    }

    pub fn get(&self, pid: u32) -> Option<ProcessMetricState> {
        lock(&self.processes).get(&pid).cloned()
    }

    pub fn contains(&self, pid: u32) -> bool {
        lock(&self.processes).contains_key(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = lock(&self.processes).keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn len(&self) -> usize {
        lock(&self.processes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
