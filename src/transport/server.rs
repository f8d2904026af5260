//! Collector side: accept agents, hand out configuration, collect violations
//!
//! Every accepted connection gets the current configuration as one unframed
//! JSON blob, then runs two tasks: a reader turning violation frames into
//! [`ViolationReport`]s, and a pusher forwarding later configuration changes
//! as length-prefixed frames. When the reader fails the connection is torn
//! down; nothing else is affected.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    spawn,
    sync::{mpsc, watch},
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    ViolationInfo,
    config::ConfigEntry,
    error::ProtocolError,
    protocol::{self, read_violation_async, write_frame_async},
};

/// Shared, atomically replaced collector configuration.
pub type SharedConfig = Arc<Vec<ConfigEntry>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationReport {
    pub peer: SocketAddr,
    pub received_at: DateTime<Utc>,
    pub violation: ViolationInfo,
}

impl fmt::Display for ViolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.received_at.format("%Y-%m-%d %H:%M:%S"),
            self.peer,
            self.violation
        )
    }
}

pub struct TransportServer {
    listener: TcpListener,
    config: watch::Receiver<SharedConfig>,
}

impl TransportServer {
    pub async fn bind(
        addr: SocketAddr,
        config: watch::Receiver<SharedConfig>,
    ) -> std::io::Result<TransportServer> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(TransportServer { listener, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    #[instrument(skip_all)]
    pub async fn run(self, reports: mpsc::UnboundedSender<ViolationReport>) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("failed to accept connection: {e}");
                    continue;
                }
            };

            info!("agent connected from {peer}");
            spawn(handle_connection(
                stream,
                peer,
                self.config.clone(),
                reports.clone(),
            ));
        }
    }
}

#[instrument(skip(stream, config, reports))]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    mut config: watch::Receiver<SharedConfig>,
    reports: mpsc::UnboundedSender<ViolationReport>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not disable nagle: {e}");
    }
    let (mut reader, mut writer) = stream.into_split();

    let initial = config.borrow_and_update().clone();
    if let Err(e) = send_initial(&mut writer, &initial).await {
        warn!("failed to send configuration to {peer}: {e}");
        return;
    }
    debug!("sent {} configuration entries to {peer}", initial.len());

    let pusher = spawn(push_updates(writer, config, peer));

    if let Err(e) = read_violations(&mut reader, peer, &reports).await {
        info!("agent {peer} disconnected: {e}");
    }
    pusher.abort();
}

async fn send_initial(writer: &mut OwnedWriteHalf, entries: &[ConfigEntry]) -> Result<(), ProtocolError> {
    writer.write_all(&protocol::encode_config(entries)?).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_violations(
    reader: &mut OwnedReadHalf,
    peer: SocketAddr,
    reports: &mpsc::UnboundedSender<ViolationReport>,
) -> Result<(), ProtocolError> {
    loop {
        let violation = read_violation_async(reader).await?;
        trace!("{peer}: {violation}");

        let report = ViolationReport {
            peer,
            received_at: Utc::now(),
            violation,
        };
        if reports.send(report).is_err() {
            // receiver gone; keep draining the connection
            trace!("violation report from {peer} discarded");
        }
    }
}

async fn push_updates(
    mut writer: OwnedWriteHalf,
    mut config: watch::Receiver<SharedConfig>,
    peer: SocketAddr,
) {
    while config.changed().await.is_ok() {
        let entries = config.borrow_and_update().clone();
        let payload = match protocol::encode_config(&entries) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode configuration: {e}");
                continue;
            }
        };

        if let Err(e) = write_frame_async(&mut writer, &payload).await {
            debug!("stopped pushing configuration to {peer}: {e}");
            return;
        }
        info!("pushed {} configuration entries to {peer}", entries.len());
    }
}
