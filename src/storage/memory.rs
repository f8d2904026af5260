//! In-memory configuration store (no persistence)
//!
//! Useful for tests and for running an agent that should never touch disk.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::backend::ConfigStore;
use super::error::{StoreError, StoreResult};
use crate::{config::ConfigEntry, util::lock};

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<Option<Vec<ConfigEntry>>>,
    saves: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a configuration, as if saved by a previous run.
    pub fn with_entries(entries: Vec<ConfigEntry>) -> Self {
        Self {
            entries: Mutex::new(Some(entries)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<Vec<ConfigEntry>> {
        lock(&self.entries).clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> StoreResult<Vec<ConfigEntry>> {
        lock(&self.entries)
            .clone()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from("<memory>")))
    }

    fn save(&self, entries: &[ConfigEntry]) -> StoreResult<()> {
        debug!("saving {} entries in memory", entries.len());
        *lock(&self.entries) = Some(entries.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
