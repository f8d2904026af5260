//! Agent runtime: wires the monitor, the transport client and their threads
//!
//! [`Agent::start`] connects to the collector (or falls back to the cached
//! configuration), then spawns one named thread per duty:
//!
//! | thread            | loop                                  |
//! |-------------------|---------------------------------------|
//! | `procmon-sampler` | [`Monitor::run_sampler`]              |
//! | `procmon-tracer`  | [`Monitor::run_tracer`]               |
//! | `procmon-config`  | [`TransportClient::run_receiver`]     |
//! | `procmon-sender`  | [`TransportClient::run_sender`]       |
//!
//! All of them share one [`CancellationToken`]. Dropping the agent (or calling
//! [`Agent::shutdown`]) cancels it and joins every thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::{
    cancel::CancellationToken,
    error::AgentError,
    monitors::{Monitor, ProcessMetrics},
    queue::ViolationQueue,
    storage::ConfigStore,
    tracer::Tracer,
    transport::{ConfigSink, Connector, TransportClient},
};

#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    /// Period of the CPU/memory sweep
    pub sample_interval: Duration,
    /// Longest single wait on the tracer, bounds shutdown latency
    pub event_timeout: Duration,
    /// Pause between failed reconnect attempts
    pub retry_delay: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            event_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct Agent<C: Connector> {
    monitor: Arc<Monitor>,
    client: Arc<TransportClient<C>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<C: Connector> std::fmt::Debug for Agent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Agent<C> {
    pub fn start(
        connector: C,
        tracer: Arc<dyn Tracer>,
        metrics: Arc<dyn ProcessMetrics>,
        store: Arc<dyn ConfigStore>,
        options: AgentOptions,
    ) -> Result<Self, AgentError> {
        let cancel = CancellationToken::new();
        let queue = ViolationQueue::new(&cancel);
        let monitor = Arc::new(Monitor::new(queue.clone(), tracer, metrics, store));
        let sink: Arc<dyn ConfigSink> = monitor.clone();
        let client = TransportClient::new(connector, sink, queue, cancel.clone(), options.retry_delay);

        let mut agent = Agent {
            monitor,
            client,
            cancel,
            workers: Vec::with_capacity(4),
        };

        agent.client.start()?;

        let monitor = agent.monitor.clone();
        let cancel = agent.cancel.clone();
        agent.spawn("procmon-sampler", move || {
            monitor.run_sampler(options.sample_interval, &cancel)
        })?;

        let monitor = agent.monitor.clone();
        let cancel = agent.cancel.clone();
        agent.spawn("procmon-tracer", move || {
            monitor.run_tracer(options.event_timeout, &cancel)
        })?;

        let client = agent.client.clone();
        agent.spawn("procmon-config", move || client.run_receiver())?;

        let client = agent.client.clone();
        agent.spawn("procmon-sender", move || client.run_sender())?;

        info!("agent started ({})", agent.client.state());
        Ok(agent)
    }

    fn spawn<F>(&mut self, name: &str, f: F) -> Result<(), AgentError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(AgentError::Spawn)?;
        self.workers.push(handle);
        Ok(())
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn client(&self) -> &Arc<TransportClient<C>> {
        &self.client
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel every loop and wait for the threads to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                error!("{name} panicked");
            } else {
                debug!("{name} joined");
            }
        }
    }
}

impl<C: Connector> Drop for Agent<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
