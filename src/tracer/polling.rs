//! Tracer that polls the process table through `sysinfo`
//!
//! Stands in for a kernel event source. Each poll announces monitored
//! processes it has not seen before and compares per-poll disk traffic
//! against the DISK threshold. Network traffic is not attributable to a
//! process from userspace, so NETWORK violations are never produced here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, trace};

use super::{Tracer, TracerEvent};
use crate::{
    Metric, ProcessName, Threshold, ViolationInfo, error::TracerError, util::lock,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct SysinfoTracer {
    state: Mutex<PollState>,
    poll_interval: Duration,
}

#[derive(Debug)]
struct PollState {
    system: System,
    monitors: HashMap<ProcessName, Threshold>,
    announced: HashSet<u32>,
    pending: VecDeque<TracerEvent>,
    last_poll: Option<Instant>,
}

impl SysinfoTracer {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(PollState {
                system: System::new(),
                monitors: HashMap::new(),
                announced: HashSet::new(),
                pending: VecDeque::new(),
                last_poll: None,
            }),
            poll_interval,
        }
    }
}

impl Default for SysinfoTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl PollState {
    fn until_next_poll(&self, interval: Duration) -> Duration {
        self.last_poll
            .map_or(Duration::ZERO, |last| interval.saturating_sub(last.elapsed()))
    }

    fn poll(&mut self) {
        self.last_poll = Some(Instant::now());
        if self.monitors.is_empty() {
            return;
        }

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_disk_usage(),
        );

        let processes = self.system.processes();
        self.announced
            .retain(|pid| processes.contains_key(&sysinfo::Pid::from_u32(*pid)));

        for (pid, process) in processes {
            let name = ProcessName::new(&process.name().to_string_lossy());
            let Some(threshold) = self.monitors.get(&name) else {
                continue;
            };
            let pid = pid.as_u32();

            if self.announced.insert(pid) {
                debug!("new monitored process {name} ({pid})");
                self.pending.push_back(TracerEvent::NewProcess { pid, name });
                // no previous poll to diff disk usage against
                continue;
            }

            let usage = process.disk_usage();
            let kib = (usage.read_bytes.saturating_add(usage.written_bytes)) / 1024;
            let kib = u32::try_from(kib).unwrap_or(u32::MAX);
            if let Some(violation) = threshold.check(Metric::Disk, kib) {
                trace!("{name} ({pid}) disk {kib} KiB >= {}", violation.threshold);
                self.pending
                    .push_back(TracerEvent::Violation(ViolationInfo::new(pid, name, violation)));
            }
        }
    }
}

impl Tracer for SysinfoTracer {
    fn set_monitor(&self, name: &ProcessName, threshold: Threshold) -> Result<(), TracerError> {
        if name.is_empty() {
            return Err(TracerError::MonitorRejected {
                name: String::new(),
                reason: "empty process name".to_string(),
            });
        }
        lock(&self.state).monitors.insert(*name, threshold);
        Ok(())
    }

    fn clear_monitor(&self) -> Result<(), TracerError> {
        let mut state = lock(&self.state);
        state.monitors.clear();
        // running processes get announced again if they match the next set
        state.announced.clear();
        state.pending.clear();
        Ok(())
    }

    fn next_event(&self, timeout: Duration) -> Result<Option<TracerEvent>, TracerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = {
                let mut state = lock(&self.state);
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some(event));
                }
                if state.until_next_poll(self.poll_interval).is_zero() {
                    state.poll();
                    if let Some(event) = state.pending.pop_front() {
                        return Ok(Some(event));
                    }
                }
                state.until_next_poll(self.poll_interval)
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(wait.min(deadline - now));
        }
    }
}
