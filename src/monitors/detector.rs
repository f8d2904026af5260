//! Violation detection and configuration application
//!
//! [`Monitor`] owns the agent's shared detection state and implements both
//! violation producers:
//!
//! 1. **Periodic sweep** ([`Monitor::sweep`]): re-samples every registered
//!    process, derives CPU rate and memory usage and compares them with the
//!    process's threshold. Each metric is checked on its own, so a single sweep
//!    may emit several violations for one process.
//! 2. **Tracer events** ([`Monitor::handle_event`]): registers newly started
//!    monitored processes and forwards violations the tracer already detected,
//!    without comparing them again.
//!
//! ## Lock Order
//!
//! The sweep holds the registry lock while briefly taking the queue lock. The
//! threshold table is never held while acquiring another lock.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};

use super::{
    registry::{ProcessMetricState, ProcessRegistry},
    resources::ProcessMetrics,
    thresholds::ThresholdTable,
};
use crate::{
    Metric, ViolationInfo,
    cancel::CancellationToken,
    config::ConfigEntry,
    error::AgentError,
    queue::ViolationQueue,
    storage::ConfigStore,
    tracer::{Tracer, TracerEvent},
    transport::ConfigSink,
};

pub struct Monitor {
    registry: ProcessRegistry,
    thresholds: ThresholdTable,
    queue: ViolationQueue,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn ProcessMetrics>,
    store: Arc<dyn ConfigStore>,
}

impl Monitor {
    pub fn new(
        queue: ViolationQueue,
        tracer: Arc<dyn Tracer>,
        metrics: Arc<dyn ProcessMetrics>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            registry: ProcessRegistry::new(),
            thresholds: ThresholdTable::new(),
            queue,
            tracer,
            metrics,
            store,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    pub fn queue(&self) -> &ViolationQueue {
        &self.queue
    }

    /// Replace the threshold table, then the tracer's monitor set, then the
    /// persisted copy, in that order.
    ///
    /// A store failure is logged only: the configuration is already live.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub fn apply_config(&self, entries: &[ConfigEntry]) -> Result<(), AgentError> {
        self.activate(entries)?;

        if let Err(e) = self.store.save(entries) {
            warn!("failed to persist configuration: {e}");
        }
        Ok(())
    }

    /// Apply the configuration saved by a previous run, without saving it again.
    pub fn restore_config(&self) -> Result<usize, AgentError> {
        let entries = self.store.load().map_err(AgentError::NoConfiguration)?;
        self.activate(&entries)?;
        Ok(entries.len())
    }

    fn activate(&self, entries: &[ConfigEntry]) -> Result<(), AgentError> {
        self.thresholds.replace(entries);

        self.tracer.clear_monitor()?;
        for entry in entries {
            self.tracer.set_monitor(&entry.name, entry.threshold)?;
        }

        info!("monitoring {} process names", self.thresholds.len());
        Ok(())
    }

    /// One pass over every registered process. Returns the number of
    /// violations queued.
    pub fn sweep(&self) -> usize {
        let thresholds = self.thresholds.snapshot();
        let mut emitted = 0;

        self.registry.for_each_mut(|state| {
            let pid = state.pid();
            let name = *state.name();

            let Some(threshold) = thresholds.get(&name).copied() else {
                debug!("{name} ({pid}) is no longer monitored");
                return false;
            };

            let Some(sample) = self.metrics.sample(pid) else {
                if self.metrics.is_exited(pid) {
                    debug!("{name} ({pid}) exited");
                    return false;
                }
                trace!("{name} ({pid}) could not be sampled, skipping");
                return true;
            };

            let cpu = saturate(state.refresh(&sample));
            let memory = saturate(sample.memory_bytes);
            trace!("PID {pid} ({name}): CPU {cpu}, Memory {memory} bytes");

            for (metric, value) in [(Metric::Cpu, cpu), (Metric::Memory, memory)] {
                if let Some(violation) = threshold.check(metric, value) {
                    self.queue.push(ViolationInfo::new(pid, name, violation));
                    emitted += 1;
                }
            }
            true
        });

        emitted
    }

    pub fn handle_event(&self, event: TracerEvent) {
        match event {
            TracerEvent::NewProcess { pid, name } => {
                if !self.thresholds.is_monitored(&name) {
                    trace!("ignoring unmonitored process {name} ({pid})");
                    return;
                }

                match self.metrics.sample(pid) {
                    Some(sample) => {
                        self.registry
                            .upsert(pid, ProcessMetricState::new(pid, name, &sample));
                        info!("started monitoring {name} ({pid})");
                    }
                    None => warn!("failed to sample new process {name} ({pid})"),
                }
            }
            TracerEvent::Violation(info) => {
                debug!("tracer reported: {info}");
                self.queue.push(info);
            }
        }
    }

    /// Producer A: sweep every `interval` until cancelled.
    #[instrument(skip_all)]
    pub fn run_sampler(&self, interval: Duration, cancel: &CancellationToken) {
        debug!("sampler started");
        while !cancel.sleep(interval) {
            let emitted = self.sweep();
            if emitted > 0 {
                debug!("sweep queued {emitted} violations");
            }
        }
        debug!("sampler stopped");
    }

    /// Producer B: drain tracer events until cancelled.
    #[instrument(skip_all)]
    pub fn run_tracer(&self, timeout: Duration, cancel: &CancellationToken) {
        debug!("tracer loop started");
        while !cancel.is_cancelled() {
            match self.tracer.next_event(timeout) {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) => {}
                Err(e) => {
                    error!("tracer error: {e}");
                    if cancel.sleep(timeout) {
                        break;
                    }
                }
            }
        }
        debug!("tracer loop stopped");
    }
}

impl ConfigSink for Monitor {
    fn apply(&self, entries: Vec<ConfigEntry>) -> Result<(), AgentError> {
        self.apply_config(&entries)
    }

    fn restore(&self) -> Result<usize, AgentError> {
        self.restore_config()
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
