//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use process_monitor::{
    Metric, ProcessName, Threshold, Violation, ViolationInfo,
    cancel::CancellationToken,
    config::ConfigEntry,
    monitors::{Monitor, ProcessMetrics, Sample},
    protocol,
    queue::ViolationQueue,
    storage::MemoryConfigStore,
    tracer::FakeTracer,
    transport::{ConfigSink, Connector, Duplex, TransportClient},
};

/// Retry delay used by every test client
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// In-memory connection. Clones share the same buffers, like duplicated sockets.
#[derive(Clone, Default)]
pub struct FakeStream {
    shared: Arc<StreamShared>,
}

#[derive(Default)]
struct StreamShared {
    inbound: Mutex<Inbound>,
    readable: Condvar,
    outbound: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct Inbound {
    data: VecDeque<u8>,
    closed: bool,
}

impl FakeStream {
    /// Stream whose collector side already sent the unframed configuration.
    pub fn with_initial_config(entries: &[ConfigEntry]) -> FakeStream {
        let stream = FakeStream::default();
        let mut handshake = Vec::new();
        protocol::write_initial_config(&mut handshake, entries).unwrap();
        stream.push_inbound(&handshake);
        stream
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.shared.inbound.lock().unwrap().data.extend(bytes);
        self.shared.readable.notify_all();
    }

    pub fn push_config_frame(&self, entries: &[ConfigEntry]) {
        let mut frame = Vec::new();
        protocol::write_config_frame(&mut frame, entries).unwrap();
        self.push_inbound(&frame);
    }

    pub fn fail_writes(&self) {
        self.shared.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Simulate the collector going away: pending reads see EOF.
    pub fn hang_up(&self) {
        self.shared.inbound.lock().unwrap().closed = true;
        self.shared.readable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inbound.lock().unwrap().closed
    }

    pub fn written_violations(&self) -> Vec<ViolationInfo> {
        let written = self.shared.outbound.lock().unwrap().clone();
        let mut reader = Cursor::new(written);
        let mut violations = Vec::new();
        while (reader.position() as usize) < reader.get_ref().len() {
            violations.push(protocol::read_violation(&mut reader).unwrap());
        }
        violations
    }
}

impl Read for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.shared.inbound.lock().unwrap();
        while inbound.data.is_empty() && !inbound.closed {
            inbound = self.shared.readable.wait(inbound).unwrap();
        }

        let n = buf.len().min(inbound.data.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.fail_writes.load(Ordering::SeqCst) || self.is_closed() {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.shared.outbound.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Duplex for FakeStream {
    fn duplicate(&self) -> io::Result<Self> {
        Ok(self.clone())
    }

    fn close(&self) -> io::Result<()> {
        self.hang_up();
        Ok(())
    }

    fn set_handshake_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out offered streams in order; refuses once none are left.
#[derive(Clone, Default)]
pub struct FakeConnector {
    streams: Arc<Mutex<VecDeque<FakeStream>>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn offer(&self, stream: FakeStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Stream = FakeStream;

    fn connect(&self) -> io::Result<FakeStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

#[derive(Default)]
pub struct ScriptedMetrics {
    samples: Mutex<HashMap<u32, Sample>>,
    exited: Mutex<HashSet<u32>>,
}

impl ScriptedMetrics {
    pub fn set(&self, pid: u32, cpu_used: u64, cpu_total: u64, memory_bytes: u64) {
        self.samples.lock().unwrap().insert(
            pid,
            Sample {
                cpu_used,
                cpu_total,
                memory_bytes,
            },
        );
    }

    pub fn exit(&self, pid: u32) {
        self.exited.lock().unwrap().insert(pid);
    }
}

impl ProcessMetrics for ScriptedMetrics {
    fn sample(&self, pid: u32) -> Option<Sample> {
        if self.exited.lock().unwrap().contains(&pid) {
            return None;
        }
        self.samples.lock().unwrap().get(&pid).copied()
    }

    fn is_exited(&self, pid: u32) -> bool {
        self.exited.lock().unwrap().contains(&pid)
    }
}

/// A monitor and a transport client wired together, without worker threads.
pub struct Harness {
    pub cancel: CancellationToken,
    pub queue: ViolationQueue,
    pub monitor: Arc<Monitor>,
    pub tracer: Arc<FakeTracer>,
    pub metrics: Arc<ScriptedMetrics>,
    pub store: Arc<MemoryConfigStore>,
    pub connector: FakeConnector,
    pub client: Arc<TransportClient<FakeConnector>>,
}

impl Harness {
    pub fn new(store: MemoryConfigStore) -> Harness {
        let cancel = CancellationToken::new();
        let queue = ViolationQueue::new(&cancel);
        let tracer = Arc::new(FakeTracer::new());
        let metrics = Arc::new(ScriptedMetrics::default());
        let store = Arc::new(store);
        let monitor = Arc::new(Monitor::new(
            queue.clone(),
            tracer.clone(),
            metrics.clone(),
            store.clone(),
        ));
        let connector = FakeConnector::default();
        let sink: Arc<dyn ConfigSink> = monitor.clone();
        let client = TransportClient::new(
            connector.clone(),
            sink,
            queue.clone(),
            cancel.clone(),
            RETRY_DELAY,
        );

        Harness {
            cancel,
            queue,
            monitor,
            tracer,
            metrics,
            store,
            connector,
            client,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn entry(name: &str, cpu: u32) -> ConfigEntry {
    ConfigEntry::new(name, Threshold::new(cpu, 0, 0, 0))
}

pub fn violation(pid: u32, value: u32) -> ViolationInfo {
    ViolationInfo::new(
        pid,
        ProcessName::new("proc.exe"),
        Violation {
            metric: Metric::Cpu,
            value,
            threshold: 50,
        },
    )
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
