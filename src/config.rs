use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{ProcessName, Threshold};

/// Thresholds for one process name, as applied by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigEntry {
    pub name: ProcessName,
    pub threshold: Threshold,
}

impl ConfigEntry {
    pub fn new(name: &str, threshold: Threshold) -> ConfigEntry {
        ConfigEntry {
            name: ProcessName::new(name),
            threshold,
        }
    }
}

/// JSON shape of a configuration entry, shared by the wire protocol, the
/// collector's `monitor.json` and the agent's cached configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub process: String,
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub memory: u32,
    #[serde(default)]
    pub disk: u32,
    #[serde(default)]
    pub network: u32,
}

impl From<ConfigRecord> for ConfigEntry {
    fn from(record: ConfigRecord) -> Self {
        let ConfigRecord {
            process,
            cpu,
            memory,
            disk,
            network,
        } = record;
        ConfigEntry::new(&process, Threshold::new(cpu, memory, disk, network))
    }
}

impl From<&ConfigEntry> for ConfigRecord {
    fn from(entry: &ConfigEntry) -> Self {
        let [cpu, memory, disk, network] = entry.threshold.limits();
        ConfigRecord {
            process: entry.name.to_string(),
            cpu,
            memory,
            disk,
            network,
        }
    }
}

/// Read the collector's configuration file.
pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<ConfigEntry>> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("unable to open configuration file {}", path.display()))?;
    let records: Vec<ConfigRecord> = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file {}: {e}", path.display()))?;
    trace!("loaded config: {records:?}");
    Ok(records.into_iter().map(ConfigEntry::from).collect())
}
