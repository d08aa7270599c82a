//! In-memory secondary indexes.
//!
//! Every index maps a key (one field or an ordered tuple of fields) to the
//! identities of the rows carrying it. Unique indexes hold at most one
//! identity per key. Indexes are rebuilt in full when a table opens and are
//! maintained incrementally afterwards; uniqueness is checked before any
//! mutation reaches the file.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::error::{Result, TableError};
use crate::row::{IndexDef, IndexKey, TableRow};

struct IndexSlot<R> {
    def: IndexDef<R>,
    entries: FxHashMap<IndexKey, BTreeSet<i64>>,
}

impl<R> IndexSlot<R> {
    fn add(&mut self, key: IndexKey, id: i64) {
        self.entries.entry(key).or_default().insert(id);
    }

    fn remove(&mut self, key: &IndexKey, id: i64) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    fn owner_other_than(&self, key: &IndexKey, id: i64) -> Option<i64> {
        self.entries
            .get(key)
            .and_then(|ids| ids.iter().copied().find(|owner| *owner != id))
    }
}

/// Index structures for one table.
pub struct IndexManager<R> {
    table: &'static str,
    slots: Vec<IndexSlot<R>>,
}

impl<R: TableRow> IndexManager<R> {
    /// Creates empty indexes for every index declared by `R`.
    pub fn new() -> Self {
        Self {
            table: R::TABLE.name,
            slots: R::indexes()
                .into_iter()
                .map(|def| IndexSlot {
                    def,
                    entries: FxHashMap::default(),
                })
                .collect(),
        }
    }

    /// Number of declared indexes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when the row type declares no index.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Discards all entries and indexes `rows` from scratch.
    pub fn rebuild<'a>(&mut self, rows: impl IntoIterator<Item = &'a R>) -> Result<()> {
        for slot in &mut self.slots {
            slot.entries.clear();
        }
        for row in rows {
            let id = row.id();
            for slot in &mut self.slots {
                let key = slot.def.key_of(row);
                if slot.def.is_unique() && slot.owner_other_than(&key, id).is_some() {
                    return Err(violation(self.table, slot.def.name(), &key));
                }
                slot.add(key, id);
            }
        }
        Ok(())
    }

    /// Verifies that inserting `rows` keeps every unique index unique.
    pub fn check_insert(&self, rows: &[R]) -> Result<()> {
        for slot in self.slots.iter().filter(|slot| slot.def.is_unique()) {
            let mut batch: FxHashMap<IndexKey, usize> = FxHashMap::default();
            for (pos, row) in rows.iter().enumerate() {
                let key = slot.def.key_of(row);
                if slot.entries.contains_key(&key) || batch.insert(key.clone(), pos).is_some() {
                    return Err(violation(self.table, slot.def.name(), &key));
                }
            }
        }
        Ok(())
    }

    /// Verifies that replacing rows by `rows` (matched by identity) keeps
    /// every unique index unique. Keys released by rows of the same batch
    /// may be taken over by other rows of that batch.
    pub fn check_update(&self, rows: &[R]) -> Result<()> {
        let batch_ids: BTreeSet<i64> = rows.iter().map(|row| row.id()).collect();
        for slot in self.slots.iter().filter(|slot| slot.def.is_unique()) {
            let mut batch: FxHashMap<IndexKey, i64> = FxHashMap::default();
            for row in rows {
                let id = row.id();
                let key = slot.def.key_of(row);
                if let Some(other) = batch.insert(key.clone(), id) {
                    if other != id {
                        return Err(violation(self.table, slot.def.name(), &key));
                    }
                }
                if let Some(ids) = slot.entries.get(&key) {
                    if ids
                        .iter()
                        .any(|owner| *owner != id && !batch_ids.contains(owner))
                    {
                        return Err(violation(self.table, slot.def.name(), &key));
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns true when any indexed key differs between `old` and `new`.
    pub fn keys_changed(&self, old: &R, new: &R) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.def.key_of(old) != slot.def.key_of(new))
    }

    /// Adds `row` to every index.
    pub fn on_insert(&mut self, row: &R) {
        let id = row.id();
        for slot in &mut self.slots {
            let key = slot.def.key_of(row);
            slot.add(key, id);
        }
    }

    /// Moves the entries of a row from its `old` keys to its `new` keys.
    pub fn on_update(&mut self, old: &R, new: &R) {
        let id = new.id();
        for slot in &mut self.slots {
            let old_key = slot.def.key_of(old);
            let new_key = slot.def.key_of(new);
            if old_key != new_key {
                slot.remove(&old_key, old.id());
                slot.add(new_key, id);
            }
        }
    }

    /// Removes `row` from every index.
    pub fn on_delete(&mut self, row: &R) {
        let id = row.id();
        for slot in &mut self.slots {
            let key = slot.def.key_of(row);
            slot.remove(&key, id);
        }
    }

    /// Identities stored under `key` in the index named `index`, ascending.
    pub fn lookup(&self, index: &str, key: &IndexKey) -> Result<Vec<i64>> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.def.name() == index)
            .ok_or_else(|| TableError::UnknownIndex {
                table: self.table.to_string(),
                index: index.to_string(),
            })?;
        Ok(slot
            .entries
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }
}

impl<R: TableRow> Default for IndexManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn violation(table: &str, index: &str, key: &IndexKey) -> TableError {
    TableError::UniqueIndexViolation {
        table: table.to_string(),
        index: index.to_string(),
        key: key.to_string(),
    }
}
