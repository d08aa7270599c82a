use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TableError};

/// Tuning knobs applied when a table is opened.
///
/// Options can be built in code or loaded from a TOML document:
///
/// ```toml
/// compact_threshold_percent = 40
/// lazy_flush_threshold = 500
/// sync_writes = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableOptions {
    /// Compact automatically once `compact_percent` reaches this value.
    pub compact_threshold_percent: Option<u8>,
    /// Deleted bytes below which automatic compaction is skipped.
    pub compact_min_bytes: u64,
    /// Pending rows after which a lazy table flushes on its own.
    pub lazy_flush_threshold: usize,
    /// Whether header and batch writes are followed by an fsync.
    pub sync_writes: bool,
    /// Period of the background compaction worker, if any.
    pub compaction_interval_secs: Option<u64>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            compact_threshold_percent: None,
            compact_min_bytes: 4096,
            lazy_flush_threshold: 1000,
            sync_writes: true,
            compaction_interval_secs: None,
        }
    }
}

impl TableOptions {
    /// Parses options from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Sets the automatic compaction threshold.
    pub fn compact_threshold_percent(mut self, percent: u8) -> Self {
        self.compact_threshold_percent = Some(percent);
        self
    }

    /// Sets the minimum reclaimable bytes for automatic compaction.
    pub fn compact_min_bytes(mut self, bytes: u64) -> Self {
        self.compact_min_bytes = bytes;
        self
    }

    /// Sets the pending-row threshold for lazy tables.
    pub fn lazy_flush_threshold(mut self, rows: usize) -> Self {
        self.lazy_flush_threshold = rows;
        self
    }

    /// Enables or disables fsync after writes.
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Sets the background compaction period.
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(percent) = self.compact_threshold_percent {
            if percent == 0 || percent > 100 {
                return Err(TableError::Config(format!(
                    "compact_threshold_percent must be within 1..=100, got {percent}"
                )));
            }
        }
        if self.lazy_flush_threshold == 0 {
            return Err(TableError::Config(
                "lazy_flush_threshold must be greater than zero".into(),
            ));
        }
        if self.compaction_interval_secs == Some(0) {
            return Err(TableError::Config(
                "compaction_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
