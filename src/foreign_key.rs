//! Process-wide registry of table-to-table references.
//!
//! The registry only records relationships; it neither owns tables nor
//! cascades anything. Cascades are implemented by table triggers that
//! consult it. When a cascade touches several tables, the table holding the
//! foreign key is locked before the table it references: a parent's
//! `BeforeDelete` trigger deletes child rows (locking the child table) and
//! returns before the parent's own write phase takes the parent lock.

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, TableError};

/// Foreign key declared by a row type: `field` holds an identity of `parent_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyDef {
    /// Referencing field of the declaring row type.
    pub field: &'static str,
    /// Referenced table.
    pub parent_table: &'static str,
}

impl ForeignKeyDef {
    /// Declares that `field` references identities of `parent_table`.
    pub const fn new(field: &'static str, parent_table: &'static str) -> Self {
        Self {
            field,
            parent_table,
        }
    }
}

/// A registered relationship between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Table holding the foreign key.
    pub child_table: String,
    /// Field holding the referenced identity.
    pub child_field: String,
    /// Referenced table.
    pub parent_table: String,
}

/// Registry of foreign key relationships shared by all tables of a process.
#[derive(Debug, Default)]
pub struct ForeignKeyRegistry {
    relations: RwLock<Vec<ForeignKey>>,
}

impl ForeignKeyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `child_table.child_field` references `parent_table`.
    ///
    /// Registering the same relationship twice is a no-op.
    pub fn register(&self, child_table: &str, child_field: &str, parent_table: &str) -> Result<()> {
        if child_table.is_empty() {
            return Err(TableError::ArgumentRequired("child_table"));
        }
        if child_field.is_empty() {
            return Err(TableError::ArgumentRequired("child_field"));
        }
        if parent_table.is_empty() {
            return Err(TableError::ArgumentRequired("parent_table"));
        }
        let relation = ForeignKey {
            child_table: child_table.to_string(),
            child_field: child_field.to_string(),
            parent_table: parent_table.to_string(),
        };
        let mut relations = self.relations.write();
        if !relations.contains(&relation) {
            debug!(
                child = child_table,
                field = child_field,
                parent = parent_table,
                "foreign_key.registered"
            );
            relations.push(relation);
        }
        Ok(())
    }

    /// Relationships in which `table` is either the child or the parent.
    pub fn relationships_for(&self, table: &str) -> Vec<ForeignKey> {
        self.relations
            .read()
            .iter()
            .filter(|fk| fk.child_table == table || fk.parent_table == table)
            .cloned()
            .collect()
    }

    /// Relationships whose referenced table is `parent_table`.
    pub fn children_of(&self, parent_table: &str) -> Vec<ForeignKey> {
        self.relations
            .read()
            .iter()
            .filter(|fk| fk.parent_table == parent_table)
            .cloned()
            .collect()
    }

    /// Relationships declared by `child_table`.
    pub fn parents_of(&self, child_table: &str) -> Vec<ForeignKey> {
        self.relations
            .read()
            .iter()
            .filter(|fk| fk.child_table == child_table)
            .cloned()
            .collect()
    }

    /// Number of registered relationships.
    pub fn len(&self) -> usize {
        self.relations.read().len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.relations.read().is_empty()
    }
}
