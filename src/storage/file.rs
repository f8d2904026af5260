//! JSON file configuration store
//!
//! The file holds the same entry array the collector sends on the wire. Writes
//! go to a sibling temporary file first and are renamed into place, so a crash
//! mid-save leaves the previous configuration intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::backend::ConfigStore;
use super::error::{StoreError, StoreResult};
use crate::config::{ConfigEntry, ConfigRecord};

const FILE_NAME: &str = "process-monitor.json";

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the platform configuration directory, falling back to a
    /// relative `.config` directory when none can be determined.
    pub fn default_location() -> Self {
        let dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::new(dir.join(FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> StoreResult<Vec<ConfigEntry>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        let records: Vec<ConfigRecord> = serde_json::from_slice(&content)?;
        trace!("loaded {} entries from {}", records.len(), self.path.display());
        Ok(records.into_iter().map(ConfigEntry::from).collect())
    }

    fn save(&self, entries: &[ConfigEntry]) -> StoreResult<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let records: Vec<ConfigRecord> = entries.iter().map(ConfigRecord::from).collect();
        let content = serde_json::to_vec_pretty(&records)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        debug!("saved {} entries to {}", entries.len(), self.path.display());
        Ok(())
    }
}
