//! Row definitions: identity and change tracking, per-type table metadata,
//! and index declarations.
//!
//! A concrete row is a plain serde struct that embeds a [`RowState`] (marked
//! `#[serde(skip)]`) and implements [`TableRow`]. Field setters go through
//! [`RowState::update`] so the dirty marker is an explicit, observable step.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TableError};
use crate::foreign_key::ForeignKeyDef;

/// Identity carried by a row that has not been assigned one yet.
pub const UNASSIGNED_ID: i64 = -1;

/// Identity and change-tracking state embedded in every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowState {
    id: i64,
    persisted: bool,
    dirty: bool,
}

impl Default for RowState {
    fn default() -> Self {
        Self {
            id: UNASSIGNED_ID,
            persisted: false,
            dirty: false,
        }
    }
}

impl RowState {
    /// Returns the row identity, negative while unassigned.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns true once the row carries a non-negative identity.
    pub fn has_identity(&self) -> bool {
        self.id >= 0
    }

    /// Sets the identity of a row that has never been persisted.
    pub fn set_id(&mut self, id: i64) -> Result<()> {
        if self.persisted {
            return Err(TableError::ImmutableIdentity(self.id));
        }
        self.id = id;
        Ok(())
    }

    /// Marks the row as changed.
    pub fn mark_changed(&mut self) {
        self.dirty = true;
    }

    /// Returns true if a field changed since the row was last written.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true once the row was loaded from or written to a table.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Stores `value` in `field`, marking the row changed when the value differs.
    ///
    /// Returns whether the stored value changed.
    pub fn update<T: PartialEq>(&mut self, field: &mut T, value: T) -> bool {
        if *field == value {
            return false;
        }
        *field = value;
        self.dirty = true;
        true
    }

    pub(crate) fn mark_persisted(&mut self, id: i64) {
        self.id = id;
        self.persisted = true;
        self.dirty = false;
    }
}

/// When writes reach the table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Every mutation batch is written before the call returns.
    Forced,
    /// Rows are buffered and written on flush, dispose, or when the pending
    /// count crosses the configured threshold.
    Lazy,
}

/// Payload encoding of serialized rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEncoding {
    /// Compact JSON object.
    Json,
    /// A single comma-delimited record, fields in declaration order.
    Delimited,
}

impl RowEncoding {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            RowEncoding::Json => 1,
            RowEncoding::Delimited => 2,
        }
    }
}

/// Static table metadata declared by each row type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name; also the file stem on disk.
    pub name: &'static str,
    /// Eager or buffered persistence.
    pub write_policy: WritePolicy,
    /// Payload encoding.
    pub encoding: RowEncoding,
    /// Whether payloads are snappy-compressed.
    pub compress: bool,
}

impl TableSpec {
    /// Forced-write JSON table without compression.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            write_policy: WritePolicy::Forced,
            encoding: RowEncoding::Json,
            compress: false,
        }
    }

    /// Switches the table to buffered writes.
    pub const fn lazy(mut self) -> Self {
        self.write_policy = WritePolicy::Lazy;
        self
    }

    /// Switches the payload encoding to delimited text.
    pub const fn delimited(mut self) -> Self {
        self.encoding = RowEncoding::Delimited;
        self
    }

    /// Enables snappy compression of payloads.
    pub const fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

/// Persisted record type.
pub trait TableRow: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table metadata for this row type.
    const TABLE: TableSpec;

    /// Embedded identity and change-tracking state.
    fn state(&self) -> &RowState;

    /// Mutable access to the embedded state.
    fn state_mut(&mut self) -> &mut RowState;

    /// Indexes maintained for this row type.
    fn indexes() -> Vec<IndexDef<Self>> {
        Vec::new()
    }

    /// Fields of this row type that reference other tables.
    fn foreign_keys() -> Vec<ForeignKeyDef> {
        Vec::new()
    }

    /// Row identity, negative while unassigned.
    fn id(&self) -> i64 {
        self.state().id()
    }

    /// Sets the identity; fails once the row has been persisted.
    fn set_id(&mut self, id: i64) -> Result<()> {
        self.state_mut().set_id(id)
    }

    /// Returns true if the row changed since it was last written.
    fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }
}

/// One component of an index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Null => f.write_str("null"),
            KeyPart::Bool(v) => write!(f, "{v}"),
            KeyPart::Int(v) => write!(f, "{v}"),
            KeyPart::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Text(value.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Text(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        KeyPart::Text(value.clone())
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyPart::Null, Into::into)
    }
}

/// Ordered tuple of field values identifying an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey(Vec<KeyPart>);

impl IndexKey {
    /// Builds a key from its ordered parts.
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// Builds a single-field key.
    pub fn of(value: impl Into<KeyPart>) -> Self {
        Self(vec![value.into()])
    }

    /// Key components in declaration order.
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl<A: Into<KeyPart>, B: Into<KeyPart>> From<(A, B)> for IndexKey {
    fn from((a, b): (A, B)) -> Self {
        Self(vec![a.into(), b.into()])
    }
}

impl<A: Into<KeyPart>, B: Into<KeyPart>, C: Into<KeyPart>> From<(A, B, C)> for IndexKey {
    fn from((a, b, c): (A, B, C)) -> Self {
        Self(vec![a.into(), b.into(), c.into()])
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str(")")
    }
}

/// Declaration of a single or composite index over a row type.
pub struct IndexDef<R> {
    name: &'static str,
    unique: bool,
    key: fn(&R) -> IndexKey,
}

impl<R> IndexDef<R> {
    /// Index whose keys map to exactly one row.
    pub fn unique(name: &'static str, key: fn(&R) -> IndexKey) -> Self {
        Self {
            name,
            unique: true,
            key,
        }
    }

    /// Index whose keys may map to many rows.
    pub fn non_unique(name: &'static str, key: fn(&R) -> IndexKey) -> Self {
        Self {
            name,
            unique: false,
            key,
        }
    }

    /// Index name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether keys are unique.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Extracts the key of `row`.
    pub fn key_of(&self, row: &R) -> IndexKey {
        (self.key)(row)
    }
}

impl<R> Clone for IndexDef<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            unique: self.unique,
            key: self.key,
        }
    }
}

impl<R> fmt::Debug for IndexDef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish()
    }
}
