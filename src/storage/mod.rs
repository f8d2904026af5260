//! Durable storage for the last applied configuration
//!
//! The agent persists every configuration it applies so that it can keep
//! monitoring when the collector is unreachable at startup.
//!
//! ## Backends
//!
//! - **File** (default): JSON file under the user's configuration directory
//! - **In-Memory**: no persistence, for testing

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;

pub use backend::ConfigStore;
pub use error::{StoreError, StoreResult};
pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;
