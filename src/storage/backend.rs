//! Configuration store trait definition

use super::error::StoreResult;
use crate::config::ConfigEntry;

/// Load/save of the last applied configuration.
///
/// Implementations must be `Send + Sync`; the store is written from the
/// configuration reader thread and read once during startup.
pub trait ConfigStore: Send + Sync {
    /// Load the most recently saved configuration.
    ///
    /// Returns [`StoreError::NotFound`](super::StoreError::NotFound) when
    /// nothing has been saved yet.
    fn load(&self) -> StoreResult<Vec<ConfigEntry>>;

    /// Replace the saved configuration with `entries`.
    fn save(&self, entries: &[ConfigEntry]) -> StoreResult<()>;
}
