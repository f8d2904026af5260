//! Current process-name → threshold mapping
//!
//! The table is a single slot replaced wholesale on every configuration
//! update. Readers get the whole map at once, so no lookup can observe a
//! half-applied configuration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{ProcessName, Threshold, config::ConfigEntry, util::lock};

pub type ThresholdMap = HashMap<ProcessName, Threshold>;

#[derive(Debug, Default)]
pub struct ThresholdTable {
    current: Mutex<Arc<ThresholdMap>>,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table. Later entries with the same name win.
    pub fn replace(&self, entries: &[ConfigEntry]) {
        let map: ThresholdMap = entries
            .iter()
            .map(|entry| (entry.name, entry.threshold))
            .collect();
        *lock(&self.current) = Arc::new(map);
    }

    /// `None` means the process is not monitored.
    pub fn lookup(&self, name: &ProcessName) -> Option<Threshold> {
        lock(&self.current).get(name).copied()
    }

    pub fn is_monitored(&self, name: &ProcessName) -> bool {
        lock(&self.current).contains_key(name)
    }

    /// Consistent view of the table at this instant.
    pub fn snapshot(&self) -> Arc<ThresholdMap> {
        lock(&self.current).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.current).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
