//! Resolves table files and takes exclusive ownership of them.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, TableError};
use crate::primitives::lock::TableLock;
use crate::row::TableSpec;
use crate::storage::TableFile;

/// File extension of table files.
pub const TABLE_EXTENSION: &str = "dat";

/// Locates table files under a base directory.
#[derive(Debug, Clone)]
pub struct TableInitializer {
    base_dir: PathBuf,
}

/// An opened, exclusively owned table file.
pub struct TableHandle {
    /// Resolved table file path.
    pub path: PathBuf,
    /// The table file itself.
    pub file: TableFile,
    /// Ownership guard; dropping it releases the table.
    pub lock: TableLock,
    /// True when the file did not exist before this open.
    pub created: bool,
}

impl TableInitializer {
    /// Uses `base_dir`, which must be an existing directory, for table files.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        if base_dir.as_os_str().is_empty() {
            return Err(TableError::ArgumentRequired("base_dir"));
        }
        let metadata = fs::metadata(base_dir).map_err(|_| TableError::PathInvalid {
            path: base_dir.to_path_buf(),
            reason: "directory does not exist",
        })?;
        if !metadata.is_dir() {
            return Err(TableError::PathInvalid {
                path: base_dir.to_path_buf(),
                reason: "not a directory",
            });
        }
        let base_dir = fs::canonicalize(base_dir)?;
        Ok(Self { base_dir })
    }

    /// Absolute path of the file backing `spec`.
    pub fn table_path(&self, spec: &TableSpec) -> Result<PathBuf> {
        let name = spec.name;
        if name.is_empty() {
            return Err(TableError::ArgumentRequired("table name"));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(TableError::PathInvalid {
                path: self.base_dir.join(name),
                reason: "table name must be a plain file name",
            });
        }
        Ok(self
            .base_dir
            .join(format!("{name}.{TABLE_EXTENSION}")))
    }

    /// Takes ownership of the table file for `spec`, creating it if missing.
    ///
    /// Fails with [`TableError::TableLocked`] while another owner holds it.
    pub fn open(&self, spec: &TableSpec, sync: bool) -> Result<TableHandle> {
        let path = self.table_path(spec)?;
        let lock = TableLock::acquire(&path)?;
        let (file, created) =
            TableFile::open(&path, spec.encoding.as_u8(), spec.compress, sync)?;
        info!(
            table = spec.name,
            path = %path.display(),
            created,
            "table.file.opened"
        );
        Ok(TableHandle {
            path,
            file,
            lock,
            created,
        })
    }
}
