//! In-process tracer that synthesizes events on demand

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::{Tracer, TracerEvent};
use crate::{ProcessName, Threshold, error::TracerError, util::lock};

/// Operations observed by a [`FakeTracer`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracerCall {
    Clear,
    Set(ProcessName, Threshold),
}

#[derive(Debug, Default)]
pub struct FakeTracer {
    monitors: Mutex<HashMap<ProcessName, Threshold>>,
    calls: Mutex<Vec<TracerCall>>,
    events: Mutex<VecDeque<TracerEvent>>,
    pending: Condvar,
    reject_monitors: AtomicBool,
}

impl FakeTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next `next_event` call.
    pub fn emit(&self, event: TracerEvent) {
        lock(&self.events).push_back(event);
        self.pending.notify_one();
    }

    /// Make every following `set_monitor` fail.
    pub fn reject_monitors(&self, reject: bool) {
        self.reject_monitors.store(reject, Ordering::SeqCst);
    }

    pub fn monitors(&self) -> HashMap<ProcessName, Threshold> {
        lock(&self.monitors).clone()
    }

    pub fn calls(&self) -> Vec<TracerCall> {
        lock(&self.calls).clone()
    }
}

impl Tracer for FakeTracer {
    fn set_monitor(&self, name: &ProcessName, threshold: Threshold) -> Result<(), TracerError> {
        if self.reject_monitors.load(Ordering::SeqCst) {
            return Err(TracerError::MonitorRejected {
                name: name.to_string(),
                reason: "rejected by fake tracer".to_string(),
            });
        }
        lock(&self.calls).push(TracerCall::Set(*name, threshold));
        lock(&self.monitors).insert(*name, threshold);
        Ok(())
    }

    fn clear_monitor(&self) -> Result<(), TracerError> {
        lock(&self.calls).push(TracerCall::Clear);
        lock(&self.monitors).clear();
        Ok(())
    }

    fn next_event(&self, timeout: Duration) -> Result<Option<TracerEvent>, TracerError> {
        let events = lock(&self.events);
        let (mut events, _) = self
            .pending
            .wait_timeout_while(events, timeout, |events| events.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        Ok(events.pop_front())
    }
}
