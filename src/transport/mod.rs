//! Agent ↔ collector connection handling
//!
//! - [`client`]: the agent's blocking, thread-based connection state machine
//! - [`server`]: the collector's tokio accept loop
//! - [`watcher`]: collector-side reloading of the configuration file

pub mod client;
pub mod server;
pub mod watcher;

pub use client::{ConfigSink, ConnectionState, Connector, Duplex, TcpConnector, TransportClient};
pub use server::{TransportServer, ViolationReport};
pub use watcher::ConfigWatcher;
