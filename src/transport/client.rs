//! Agent-side connection state machine
//!
//! ```text
//!                 start / reconnect done
//!   Disconnected ───────────────────────► Connecting ──► Connected
//!        ▲                                    │              │ read or write
//!        │ no collector, cached config        │              │ failure
//!        └────────────────────────────────────┘              ▼
//!                                                       Reconnecting
//! ```
//!
//! Two worker loops share one client:
//!
//! - the **sender** drains the [`ViolationQueue`] onto the socket
//! - the **receiver** reads configuration updates and hands them to a
//!   [`ConfigSink`]
//!
//! Whichever loop observes an I/O failure first calls
//! [`TransportClient::recover`]. A compare-and-swap on the `reconnecting` flag
//! elects exactly one reconnector; every other caller parks on the session
//! condition variable until the flag clears and then carries on with the new
//! connection. Failures are tagged with the connection generation they were
//! observed on, so a late report about an already replaced connection does
//! not trigger a second reconnect.
//!
//! Delivery is at-most-once: a violation whose write fails is logged and
//! dropped. Everything still queued is sent on the next connection.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    cancel::CancellationToken, config::ConfigEntry, error::AgentError, protocol,
    queue::ViolationQueue, util::lock,
};

/// Upper bound on establishing the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on each read while waiting for the initial configuration.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte stream that can be split between the sender and the receiver.
///
/// Method names must not collide with inherent `TcpStream` methods.
pub trait Duplex: Read + Write + Send + Sync + Sized + 'static {
    /// A second handle to the same connection.
    fn duplicate(&self) -> io::Result<Self>;

    /// Shut the connection down in both directions, unblocking any reader.
    fn close(&self) -> io::Result<()>;

    /// Bound blocking reads; `None` removes the bound.
    fn set_handshake_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Duplex for TcpStream {
    fn duplicate(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_handshake_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

pub trait Connector: Send + Sync + 'static {
    type Stream: Duplex;

    fn connect(&self) -> io::Result<Self::Stream>;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Receiver of configurations coming from the collector.
pub trait ConfigSink: Send + Sync {
    /// Replace the active configuration.
    fn apply(&self, entries: Vec<ConfigEntry>) -> Result<(), AgentError>;

    /// Activate the locally cached configuration. Returns the entry count.
    fn restore(&self) -> Result<usize, AgentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(state)
    }
}

struct Session<S> {
    state: ConnectionState,
    /// Bumped every time a new connection is installed.
    generation: u64,
    stream: Option<S>,
}

pub struct TransportClient<C: Connector> {
    connector: C,
    sink: Arc<dyn ConfigSink>,
    queue: ViolationQueue,
    cancel: CancellationToken,
    retry_delay: Duration,
    session: Mutex<Session<C::Stream>>,
    changed: Condvar,
    reconnecting: AtomicBool,
    reconnects: AtomicUsize,
    /// Sender-owned handle, tagged with the generation it was cloned from.
    writer: Mutex<Option<(u64, C::Stream)>>,
    /// Connection still waiting for its initial configuration, closed on
    /// shutdown.
    handshake: Mutex<Option<C::Stream>>,
}

impl<C: Connector> TransportClient<C> {
    pub fn new(
        connector: C,
        sink: Arc<dyn ConfigSink>,
        queue: ViolationQueue,
        cancel: CancellationToken,
        retry_delay: Duration,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            connector,
            sink,
            queue,
            cancel: cancel.clone(),
            retry_delay,
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                generation: 0,
                stream: None,
            }),
            changed: Condvar::new(),
            reconnecting: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
            writer: Mutex::new(None),
            handshake: Mutex::new(None),
        });

        let weak = Arc::downgrade(&client);
        cancel.on_cancel(move || {
            if let Some(client) = weak.upgrade() {
                client.disconnect();
            }
        });

        client
    }

    pub fn state(&self) -> ConnectionState {
        self.session().state
    }

    pub fn is_connected(&self) -> bool {
        self.session().stream.is_some()
    }

    /// Generation of the current (or last) connection. 0 before the first one.
    pub fn generation(&self) -> u64 {
        self.session().generation
    }

    /// Number of reconnect sequences performed so far.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Initial connect.
    ///
    /// On success the collector's configuration has been applied. If the
    /// collector cannot be reached the cached configuration is restored and
    /// the client stays disconnected; the receiver loop keeps retrying. Errors
    /// applying a configuration, or a missing cache, are fatal.
    #[instrument(skip_all)]
    pub fn start(&self) -> Result<(), AgentError> {
        self.set_state(ConnectionState::Connecting);

        match self.establish() {
            Ok((stream, entries)) => {
                if let Err(e) = self.sink.apply(entries) {
                    let _ = stream.close();
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
                self.install(stream);
                Ok(())
            }
            Err(e) => {
                warn!("collector unreachable: {e}");
                self.set_state(ConnectionState::Disconnected);
                let restored = self.sink.restore()?;
                info!("running offline with {restored} cached entries");
                Ok(())
            }
        }
    }

    /// Connect and read the unframed initial configuration.
    ///
    /// A collector that stays silent for [`HANDSHAKE_TIMEOUT`] fails the
    /// attempt; cancelling closes the pending connection.
    fn establish(&self) -> Result<(C::Stream, Vec<ConfigEntry>), AgentError> {
        let mut stream = self.connector.connect()?;
        stream.set_handshake_timeout(Some(HANDSHAKE_TIMEOUT))?;

        *lock(&self.handshake) = Some(stream.duplicate()?);
        // the waker may have run before the slot was filled
        let received = if self.cancel.is_cancelled() {
            Err(AgentError::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                "shutdown requested",
            )))
        } else {
            protocol::read_initial_config(&mut stream).map_err(AgentError::from)
        };
        lock(&self.handshake).take();

        let entries = received?;
        stream.set_handshake_timeout(None)?;

        debug!("received initial configuration with {} entries", entries.len());
        Ok((stream, entries))
    }

    fn install(&self, stream: C::Stream) {
        let mut session = self.session();
        if self.cancel.is_cancelled() {
            let _ = stream.close();
            return;
        }
        session.generation += 1;
        session.stream = Some(stream);
        session.state = ConnectionState::Connected;
        info!("connected to collector (generation {})", session.generation);
        drop(session);
        self.changed.notify_all();
    }

    fn disconnect(&self) {
        if let Some(pending) = lock(&self.handshake).take() {
            let _ = pending.close();
        }

        let mut session = self.session();
        if let Some(stream) = session.stream.take() {
            let _ = stream.close();
        }
        session.state = ConnectionState::Disconnected;
        drop(session);
        self.changed.notify_all();
    }

    fn set_state(&self, state: ConnectionState) {
        self.session().state = state;
    }

    fn session(&self) -> MutexGuard<'_, Session<C::Stream>> {
        lock(&self.session)
    }

    /// Handle an I/O failure observed on connection `failed_generation`.
    ///
    /// Returns `true` once a connection newer than the failed one is in place,
    /// `false` if shutdown was requested first.
    #[instrument(skip_all, fields(generation = failed_generation))]
    pub fn recover(&self, failed_generation: u64) -> bool {
        if self.is_replaced(failed_generation) {
            return true;
        }

        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.wait_for_reconnect();
        }

        // lost a race with a reconnect that completed in between
        if self.is_replaced(failed_generation) {
            self.finish_reconnect();
            return true;
        }

        self.reconnects.fetch_add(1, Ordering::SeqCst);
        let connected = self.reconnect();
        self.finish_reconnect();
        connected
    }

    fn is_replaced(&self, failed_generation: u64) -> bool {
        let session = self.session();
        session.generation != failed_generation && session.stream.is_some()
    }

    fn wait_for_reconnect(&self) -> bool {
        let mut session = self.session();
        while self.reconnecting.load(Ordering::SeqCst) && !self.cancel.is_cancelled() {
            session = self
                .changed
                .wait(session)
                .unwrap_or_else(PoisonError::into_inner);
        }
        session.stream.is_some()
    }

    fn finish_reconnect(&self) {
        let session = self.session();
        self.reconnecting.store(false, Ordering::SeqCst);
        drop(session);
        self.changed.notify_all();
    }

    fn reconnect(&self) -> bool {
        {
            let mut session = self.session();
            if let Some(stream) = session.stream.take() {
                let _ = stream.close();
            }
            session.state = if session.generation == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };
        }
        warn!("connection to collector lost, reconnecting");

        while !self.cancel.is_cancelled() {
            match self.establish() {
                Ok((stream, entries)) => {
                    if let Err(e) = self.sink.apply(entries) {
                        error!("failed to apply configuration after reconnect: {e}");
                    }
                    self.install(stream);
                    return self.is_connected();
                }
                Err(e) => {
                    debug!("reconnect failed: {e}");
                    if self.cancel.sleep(self.retry_delay) {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        false
    }

    /// Receiver loop: apply configuration frames until shutdown.
    #[instrument(skip_all)]
    pub fn run_receiver(&self) {
        debug!("receiver started");
        while !self.cancel.is_cancelled() {
            let (generation, reader) = {
                let session = self.session();
                let reader = session.stream.as_ref().map(Duplex::duplicate);
                (session.generation, reader)
            };

            match reader {
                Some(Ok(mut reader)) => self.receive(&mut reader),
                Some(Err(e)) => warn!("failed to clone connection: {e}"),
                None => {}
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.recover(generation);
        }
        debug!("receiver stopped");
    }

    fn receive(&self, reader: &mut C::Stream) {
        loop {
            match protocol::read_config_frame(reader) {
                Ok(entries) => {
                    info!("received configuration update with {} entries", entries.len());
                    if let Err(e) = self.sink.apply(entries) {
                        error!("failed to apply configuration update: {e}");
                    }
                }
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        warn!("failed to read from collector: {e}");
                    }
                    return;
                }
            }
        }
    }

    /// Sender loop: drain the queue until shutdown.
    #[instrument(skip_all)]
    pub fn run_sender(&self) {
        debug!("sender started");
        while self.send_next() {}
        debug!("sender stopped");
    }

    /// Pop one violation and write it. Blocks until an item is queued and a
    /// connection is available; returns `false` on shutdown.
    pub fn send_next(&self) -> bool {
        let Some(item) = self.queue.pop() else {
            return false;
        };

        let mut writer = lock(&self.writer);
        let Some(generation) = self.refresh_writer(&mut writer) else {
            return false;
        };
        let Some((_, stream)) = writer.as_mut() else {
            return false;
        };

        match protocol::write_violation(stream, &item) {
            Ok(()) => {
                trace!("sent {item}");
                true
            }
            Err(e) => {
                warn!("dropping violation after write failure ({e}): {item}");
                *writer = None;
                drop(writer);
                self.recover(generation);
                true
            }
        }
    }

    /// Make sure `writer` holds a handle to the current connection, waiting
    /// for one if necessary. `None` on shutdown.
    fn refresh_writer(&self, writer: &mut Option<(u64, C::Stream)>) -> Option<u64> {
        loop {
            let mut session = self.session();
            while session.stream.is_none() {
                if self.cancel.is_cancelled() {
                    return None;
                }
                session = self
                    .changed
                    .wait(session)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if self.cancel.is_cancelled() {
                return None;
            }

            let generation = session.generation;
            if let Some((cached, _)) = writer
                && *cached == generation
            {
                return Some(generation);
            }

            let cloned = session.stream.as_ref().map(Duplex::duplicate);
            drop(session);
            match cloned {
                Some(Ok(stream)) => {
                    *writer = Some((generation, stream));
                    return Some(generation);
                }
                Some(Err(e)) => {
                    warn!("failed to clone connection: {e}");
                    self.recover(generation);
                }
                None => {}
            }
        }
    }
}

impl<C: Connector> fmt::Debug for TransportClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session();
        f.debug_struct("TransportClient")
            .field("state", &session.state)
            .field("generation", &session.generation)
            .field("reconnects", &self.reconnects())
            .finish()
    }
}
