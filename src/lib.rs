//! Embedded record store keeping one file per table.
//!
//! A row type implements [`TableRow`]; [`TableOperations`] opens its table
//! file through a [`TableInitializer`], loads and indexes every live row, and
//! serves inserts, updates, deletes and selects with before/after triggers,
//! persistent sequences, unique index enforcement and online compaction.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rowfile::{
//!     ForeignKeyRegistry, NoDefaults, RowState, TableInitializer, TableOperations, TableOptions,
//!     TableRow, TableSpec,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct Country {
//!     #[serde(skip)]
//!     state: RowState,
//!     name: String,
//! }
//!
//! impl TableRow for Country {
//!     const TABLE: TableSpec = TableSpec::new("Countries");
//!
//!     fn state(&self) -> &RowState {
//!         &self.state
//!     }
//!
//!     fn state_mut(&mut self) -> &mut RowState {
//!         &mut self.state
//!     }
//! }
//!
//! # fn main() -> rowfile::Result<()> {
//! let init = TableInitializer::new("./data")?;
//! let countries: TableOperations<Country> = TableOperations::open(
//!     &init,
//!     Arc::new(ForeignKeyRegistry::new()),
//!     &NoDefaults,
//!     TableOptions::default(),
//! )?;
//! let mut row = Country { name: "Iceland".into(), ..Default::default() };
//! countries.insert(&mut row)?;
//! assert_eq!(countries.select_by_id(row.id())?.map(|c| c.name), Some("Iceland".into()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Payload encoding of rows.
pub mod codec;
/// Background compaction.
pub mod compaction;
/// Seed data providers.
pub mod defaults;
/// Error types.
pub mod error;
/// Foreign key registry.
pub mod foreign_key;
/// In-memory indexes.
pub mod index;
/// Table file resolution and ownership.
pub mod initializer;
/// Table options.
pub mod options;
/// File I/O and locking primitives.
pub mod primitives;
/// Row definitions.
pub mod row;
/// Sequence counters.
pub mod sequence;
/// On-disk format.
pub mod storage;
/// Table operations.
pub mod table;
/// Mutation triggers.
pub mod trigger;

pub use compaction::{Compactable, CompactionReport, CompactionWorker};
pub use defaults::{NoDefaults, TableDefaults};
pub use error::{Result, TableError};
pub use foreign_key::{ForeignKey, ForeignKeyDef, ForeignKeyRegistry};
pub use index::IndexManager;
pub use initializer::{TableHandle, TableInitializer};
pub use options::TableOptions;
pub use row::{
    IndexDef, IndexKey, KeyPart, RowEncoding, RowState, TableRow, TableSpec, WritePolicy,
    UNASSIGNED_ID,
};
pub use table::TableOperations;
pub use trigger::{TableTrigger, TriggerPhase, TriggerPhases, TriggerPipeline};
