//! Typed CRUD access to one table file.
//!
//! [`TableOperations`] keeps every live row of its table in memory, in
//! insertion order, and writes mutations as whole batches. Identities only
//! grow, so insertion order is identity order; updates keep a row's place
//! and compaction writes blocks back in that order. Each
//! mutation runs in phases:
//!
//! 1. validate and prepare under the state lock (identities, uniqueness),
//! 2. run `Before*` triggers with no lock held,
//! 3. re-validate and commit under the state write lock,
//! 4. run `After*` triggers with no lock held.
//!
//! Triggers may therefore mutate other tables, or this one, without
//! deadlocking. A cascade started from a `Before*` trigger locks the
//! referencing table before this table's commit phase takes its own lock.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::codec;
use crate::compaction::{Compactable, CompactionReport, CompactionWorker};
use crate::defaults::TableDefaults;
use crate::error::{Result, TableError};
use crate::foreign_key::ForeignKeyRegistry;
use crate::index::IndexManager;
use crate::initializer::{TableHandle, TableInitializer};
use crate::options::TableOptions;
use crate::row::{IndexKey, TableRow, TableSpec, WritePolicy};
use crate::sequence::SequenceStore;
use crate::storage::block::encode_block;
use crate::storage::{compact_percent, BlockLoc, TableFile};
use crate::trigger::{TableTrigger, TriggerPhase, TriggerPipeline};

/// Cached copy of one live row.
struct Entry<R> {
    row: R,
    len: u64,
    /// On-disk block holding the current version, if written.
    loc: Option<BlockLoc>,
    /// Encoded block waiting for a lazy flush.
    pending: Option<Vec<u8>>,
}

struct TableState<R: TableRow> {
    handle: Option<TableHandle>,
    rows: FxHashMap<i64, Entry<R>>,
    order: BTreeSet<i64>,
    indexes: IndexManager<R>,
    pending: FxHashSet<i64>,
    /// On-disk blocks superseded or deleted since the last lazy flush.
    retired: Vec<BlockLoc>,
    live_bytes: u64,
}

/// Rows prepared for a commit: cloned batch plus encoded blocks.
struct Prepared<R> {
    rows: Vec<R>,
    blocks: Vec<Vec<u8>>,
}

/// Typed operations over one table.
pub struct TableOperations<R: TableRow> {
    spec: TableSpec,
    options: TableOptions,
    registry: Arc<ForeignKeyRegistry>,
    triggers: RwLock<TriggerPipeline<R>>,
    state: RwLock<TableState<R>>,
}

impl<R: TableRow> TableState<R> {
    fn file(&self) -> Result<&TableFile> {
        self.handle
            .as_ref()
            .map(|handle| &handle.file)
            .ok_or_else(|| TableError::Disposed(R::TABLE.name.to_string()))
    }

    fn file_mut(&mut self) -> Result<&mut TableFile> {
        self.handle
            .as_mut()
            .map(|handle| &mut handle.file)
            .ok_or_else(|| TableError::Disposed(R::TABLE.name.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        self.file().map(|_| ())
    }

    fn deleted_bytes(&self) -> Result<u64> {
        let retired: u64 = self.retired.iter().map(|loc| loc.len).sum();
        Ok(self.file()?.header().deleted_bytes + retired)
    }

    fn is_live(&self, id: i64) -> bool {
        self.rows.contains_key(&id)
    }

    /// Gives unassigned rows fresh identities and validates explicit ones.
    fn assign_identities(&mut self, batch: &mut [R]) -> Result<()> {
        let primary = self.file()?.header().primary_sequence;
        let mut explicit = BTreeSet::new();
        let mut unassigned = 0usize;
        for row in batch.iter() {
            if row.state().has_identity() {
                let id = row.id();
                if id <= primary || !explicit.insert(id) {
                    return Err(TableError::UniqueIndexViolation {
                        table: R::TABLE.name.to_string(),
                        index: "id".into(),
                        key: id.to_string(),
                    });
                }
            } else {
                unassigned += 1;
            }
        }
        let mut sequence = SequenceStore::new(self.file_mut()?);
        if let Some(max) = explicit.last() {
            sequence.advance_primary(*max)?;
        }
        let mut next = sequence.allocate_primary(unassigned)?;
        for row in batch.iter_mut().filter(|row| !row.state().has_identity()) {
            row.set_id(next)?;
            next += 1;
        }
        Ok(())
    }

    /// Writes new rows and adds them to the cache and indexes.
    fn commit_inserts(&mut self, prepared: Prepared<R>, lazy: bool) -> Result<()> {
        let Prepared { rows, blocks } = prepared;
        let locs: Vec<Option<BlockLoc>> = if lazy {
            vec![None; rows.len()]
        } else {
            self.file_mut()?
                .commit_batch(&blocks, &[])?
                .into_iter()
                .map(Some)
                .collect()
        };
        for ((mut row, block), loc) in rows.into_iter().zip(blocks).zip(locs) {
            let id = row.id();
            row.state_mut().mark_persisted(id);
            self.indexes.on_insert(&row);
            let len = block.len() as u64;
            self.live_bytes += len;
            self.order.insert(id);
            let pending = if lazy {
                self.pending.insert(id);
                Some(block)
            } else {
                None
            };
            self.rows.insert(
                id,
                Entry {
                    row,
                    len,
                    loc,
                    pending,
                },
            );
        }
        Ok(())
    }

    /// Replaces stored rows with new versions, keeping their place.
    fn commit_updates(&mut self, prepared: Prepared<R>, lazy: bool) -> Result<()> {
        let Prepared { rows, blocks } = prepared;
        let mut superseded = Vec::new();
        for row in &rows {
            if let Some(loc) = self.rows.get(&row.id()).and_then(|entry| entry.loc) {
                superseded.push(loc);
            }
        }
        let locs: Vec<Option<BlockLoc>> = if lazy {
            self.retired.extend(superseded);
            vec![None; rows.len()]
        } else {
            self.file_mut()?
                .commit_batch(&blocks, &superseded)?
                .into_iter()
                .map(Some)
                .collect()
        };
        for ((mut row, block), loc) in rows.into_iter().zip(blocks).zip(locs) {
            let id = row.id();
            row.state_mut().mark_persisted(id);
            let Some(entry) = self.rows.get_mut(&id) else {
                continue;
            };
            self.indexes.on_update(&entry.row, &row);
            self.live_bytes = self.live_bytes - entry.len + block.len() as u64;
            entry.len = block.len() as u64;
            entry.row = row;
            entry.loc = loc;
            if lazy {
                self.pending.insert(id);
                entry.pending = Some(block);
            } else {
                entry.pending = None;
            }
        }
        Ok(())
    }

    /// Removes rows by identity.
    fn commit_deletes(&mut self, ids: &[i64], lazy: bool) -> Result<()> {
        let on_disk: Vec<BlockLoc> = ids
            .iter()
            .filter_map(|id| self.rows.get(id).and_then(|entry| entry.loc))
            .collect();
        if lazy {
            self.retired.extend(on_disk);
        } else {
            self.file_mut()?.commit_batch(&[], &on_disk)?;
        }
        for id in ids {
            if let Some(entry) = self.rows.remove(id) {
                self.indexes.on_delete(&entry.row);
                self.order.remove(id);
                self.pending.remove(id);
                self.live_bytes -= entry.len;
            }
        }
        Ok(())
    }

    /// Writes pending rows and tombstones retired blocks.
    fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() && self.retired.is_empty() {
            return Ok(0);
        }
        let mut queued: Vec<(i64, Vec<u8>)> = self
            .pending
            .iter()
            .filter_map(|id| Some((*id, self.rows.get(id)?.pending.clone()?)))
            .collect();
        queued.sort_by_key(|(id, _)| *id);
        let (ids, blocks): (Vec<i64>, Vec<Vec<u8>>) = queued.into_iter().unzip();
        let retired = self.retired.clone();
        let locs = self.file_mut()?.commit_batch(&blocks, &retired)?;
        for (id, loc) in ids.iter().zip(locs) {
            if let Some(entry) = self.rows.get_mut(id) {
                entry.loc = Some(loc);
                entry.pending = None;
            }
        }
        self.pending.clear();
        self.retired.clear();
        debug!(
            table = R::TABLE.name,
            rows = ids.len(),
            retired = retired.len(),
            "table.flush"
        );
        Ok(ids.len())
    }

    fn compact(&mut self) -> Result<CompactionReport> {
        let started = Instant::now();
        self.flush()?;
        let (ids, locs): (Vec<i64>, Vec<BlockLoc>) = self
            .order
            .iter()
            .filter_map(|id| Some((*id, self.rows.get(id)?.loc?)))
            .unzip();
        let file = self.file_mut()?;
        let bytes_before = file.len();
        let reclaimed_bytes = file.header().deleted_bytes;
        let new_locs = file.rewrite(&locs)?;
        let bytes_after = file.len();
        for (id, loc) in ids.iter().zip(new_locs) {
            if let Some(entry) = self.rows.get_mut(id) {
                entry.loc = Some(loc);
            }
        }
        let report = CompactionReport {
            table: R::TABLE.name.to_string(),
            bytes_before,
            bytes_after,
            reclaimed_bytes,
            rows: ids.len() as u64,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            table = R::TABLE.name,
            bytes_before,
            bytes_after,
            reclaimed = reclaimed_bytes,
            rows = report.rows,
            "table.compact.done"
        );
        Ok(report)
    }
}

fn prepare<R: TableRow>(spec: &TableSpec, rows: Vec<R>) -> Result<Prepared<R>> {
    let blocks = rows
        .iter()
        .map(|row| encode_block(row.id(), &codec::encode_row(spec, row)?))
        .collect::<Result<Vec<_>>>()?;
    Ok(Prepared { rows, blocks })
}

/// True for a file that was created but never seeded or written to.
fn is_pristine(file: &TableFile) -> bool {
    let header = file.header();
    file.is_empty()
        && header.schema_version == 0
        && header.primary_sequence == -1
        && header.secondary_sequence == -1
}

fn after_trigger(phase: TriggerPhase, err: TableError) -> TableError {
    TableError::AfterTrigger {
        phase,
        source: Box::new(err),
    }
}

impl<R: TableRow> TableOperations<R> {
    /// Opens (or creates and seeds) the table for `R` under `initializer`.
    ///
    /// Every stored row is loaded and indexed. A table that has never been
    /// written takes its counters from `defaults`. Each schema version newer
    /// than the stored one contributes its seed rows, and the version is
    /// recorded as soon as its rows are committed, so an interrupted open
    /// resumes at the next version. Seed rows bypass triggers.
    pub fn open(
        initializer: &TableInitializer,
        registry: Arc<ForeignKeyRegistry>,
        defaults: &dyn TableDefaults<R>,
        options: TableOptions,
    ) -> Result<Self> {
        options.validate()?;
        let spec = R::TABLE;
        let mut handle = initializer.open(&spec, options.sync_writes)?;
        let created = handle.created;
        let blocks = handle.file.scan()?;

        let mut state = TableState {
            handle: None,
            rows: FxHashMap::default(),
            order: BTreeSet::new(),
            indexes: IndexManager::new(),
            pending: FxHashSet::default(),
            retired: Vec::new(),
            live_bytes: 0,
        };
        for block in blocks {
            let mut row: R = codec::decode_row(&spec, &block.payload)?;
            row.state_mut().mark_persisted(block.id);
            state.order.insert(block.id);
            state.live_bytes += block.loc.len;
            state.rows.insert(
                block.id,
                Entry {
                    row,
                    len: block.loc.len,
                    loc: Some(block.loc),
                    pending: None,
                },
            );
        }
        let mut ordered = Vec::with_capacity(state.rows.len());
        for id in &state.order {
            if let Some(entry) = state.rows.get(id) {
                ordered.push(&entry.row);
            }
        }
        state.indexes.rebuild(ordered)?;
        state.handle = Some(handle);

        for fk in R::foreign_keys() {
            registry.register(spec.name, fk.field, fk.parent_table)?;
        }

        if created || is_pristine(state.file()?) {
            SequenceStore::new(state.file_mut()?)
                .reset(defaults.primary_sequence(), defaults.secondary_sequence())?;
        }
        let from_version = state.file()?.header().schema_version;
        let target = defaults.version();
        if target > from_version {
            for version in from_version + 1..=target {
                let mut rows = defaults.initial_data(version);
                if !rows.is_empty() {
                    state.indexes.check_insert(&rows)?;
                    state.assign_identities(&mut rows)?;
                    let seeded = rows.len();
                    state.commit_inserts(prepare(&spec, rows)?, false)?;
                    info!(table = spec.name, version, rows = seeded, "table.seeded");
                }
                state.file_mut()?.set_schema_version(version)?;
            }
        }

        info!(
            table = spec.name,
            rows = state.rows.len(),
            created,
            "table.opened"
        );
        Ok(Self {
            spec,
            options,
            registry,
            triggers: RwLock::new(TriggerPipeline::new()),
            state: RwLock::new(state),
        })
    }

    /// Table name.
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Options the table was opened with.
    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// Foreign key registry shared with other tables.
    pub fn registry(&self) -> &Arc<ForeignKeyRegistry> {
        &self.registry
    }

    /// Adds a trigger to the pipeline of this table.
    pub fn register_trigger(&self, trigger: Arc<dyn TableTrigger<R>>) -> Result<()> {
        self.state.read().ensure_open()?;
        self.triggers.write().register(trigger);
        Ok(())
    }

    fn run_triggers(&self, phase: TriggerPhase, rows: &[R]) -> Result<()> {
        self.run_triggers_with_previous(phase, rows, &[])
    }

    fn run_triggers_with_previous(
        &self,
        phase: TriggerPhase,
        rows: &[R],
        previous: &[R],
    ) -> Result<()> {
        let pipeline = self.triggers.read().clone();
        pipeline.run_with_previous(self.spec.name, phase, rows, previous)
    }

    fn is_lazy(&self) -> bool {
        self.spec.write_policy == WritePolicy::Lazy
    }

    /// Inserts one row; see [`TableOperations::insert_many`].
    pub fn insert(&self, row: &mut R) -> Result<()> {
        self.insert_many(std::slice::from_mut(row))
    }

    /// Inserts a batch of rows.
    ///
    /// Rows with a negative identity receive the next primary sequence
    /// values in order. An explicit identity must be higher than the current
    /// primary sequence, which then advances to it. On success every row is
    /// marked persisted and its identity becomes immutable.
    pub fn insert_many(&self, rows: &mut [R]) -> Result<()> {
        let mut batch = rows.to_vec();
        {
            let mut state = self.state.write();
            state.ensure_open()?;
            if batch.is_empty() {
                return Ok(());
            }
            state.indexes.check_insert(&batch)?;
            state.assign_identities(&mut batch)?;
        }

        self.run_triggers(TriggerPhase::BeforeInsert, &batch)?;
        let prepared = prepare(&self.spec, batch)?;
        let committed = prepared.rows.clone();

        {
            let mut state = self.state.write();
            state.ensure_open()?;
            state.indexes.check_insert(&prepared.rows)?;
            if let Some(row) = prepared.rows.iter().find(|row| state.is_live(row.id())) {
                return Err(TableError::UniqueIndexViolation {
                    table: self.spec.name.to_string(),
                    index: "id".into(),
                    key: row.id().to_string(),
                });
            }
            state.commit_inserts(prepared, self.is_lazy())?;
            self.flush_if_over_threshold(&mut state);
        }
        for (row, stored) in rows.iter_mut().zip(&committed) {
            row.state_mut().mark_persisted(stored.id());
        }
        debug!(table = self.spec.name, rows = committed.len(), "table.insert");

        self.run_triggers(TriggerPhase::AfterInsert, &committed)
            .map_err(|err| after_trigger(TriggerPhase::AfterInsert, err))
    }

    /// Updates one row; see [`TableOperations::update_many`].
    pub fn update(&self, row: &mut R) -> Result<()> {
        self.update_many(std::slice::from_mut(row))
    }

    /// Replaces stored rows by the given versions, matched by identity.
    ///
    /// Every identity must be live. Rows that are neither dirty nor moved
    /// to a different index key are skipped without a write.
    pub fn update_many(&self, rows: &mut [R]) -> Result<()> {
        let (batch, previous) = {
            let state = self.state.read();
            state.ensure_open()?;
            let (batch, previous) = self.changed_rows(&state, rows)?;
            state.indexes.check_update(&batch)?;
            (batch, previous)
        };
        if batch.is_empty() {
            return Ok(());
        }

        self.run_triggers_with_previous(TriggerPhase::BeforeUpdate, &batch, &previous)?;
        let prepared = prepare(&self.spec, batch)?;
        let committed = prepared.rows.clone();

        {
            let mut state = self.state.write();
            state.ensure_open()?;
            for row in &prepared.rows {
                self.require_live(&state, row.id())?;
            }
            state.indexes.check_update(&prepared.rows)?;
            state.commit_updates(prepared, self.is_lazy())?;
            self.flush_if_over_threshold(&mut state);
            self.compact_if_over_threshold(&mut state);
        }
        for row in rows.iter_mut() {
            let id = row.id();
            row.state_mut().mark_persisted(id);
        }
        debug!(table = self.spec.name, rows = committed.len(), "table.update");

        self.run_triggers(TriggerPhase::AfterUpdate, &committed)
            .map_err(|err| after_trigger(TriggerPhase::AfterUpdate, err))
    }

    /// Rows that need a write, paired with their stored versions.
    fn changed_rows(&self, state: &TableState<R>, rows: &[R]) -> Result<(Vec<R>, Vec<R>)> {
        let mut seen = BTreeSet::new();
        let mut batch = Vec::new();
        let mut previous = Vec::new();
        for row in rows {
            let id = row.id();
            let stored = state.rows.get(&id).ok_or_else(|| TableError::RowNotFound {
                table: self.spec.name.to_string(),
                id,
            })?;
            if !seen.insert(id) {
                return Err(TableError::UniqueIndexViolation {
                    table: self.spec.name.to_string(),
                    index: "id".into(),
                    key: id.to_string(),
                });
            }
            if !row.state().is_persisted()
                || row.is_dirty()
                || state.indexes.keys_changed(&stored.row, row)
            {
                batch.push(row.clone());
                previous.push(stored.row.clone());
            }
        }
        Ok((batch, previous))
    }

    fn require_live(&self, state: &TableState<R>, id: i64) -> Result<()> {
        if state.is_live(id) {
            Ok(())
        } else {
            Err(TableError::RowNotFound {
                table: self.spec.name.to_string(),
                id,
            })
        }
    }

    /// Inserts a row without a live identity, updates it otherwise.
    pub fn insert_or_update(&self, row: &mut R) -> Result<()> {
        let live = {
            let state = self.state.read();
            state.ensure_open()?;
            row.state().has_identity() && state.is_live(row.id())
        };
        if live {
            self.update(row)
        } else {
            self.insert(row)
        }
    }

    /// Deletes one row; see [`TableOperations::delete_many`].
    pub fn delete(&self, row: &R) -> Result<()> {
        self.delete_by_ids(&[row.id()])
    }

    /// Deletes rows by their identities.
    pub fn delete_many(&self, rows: &[R]) -> Result<()> {
        let ids: Vec<i64> = rows.iter().map(|row| row.id()).collect();
        self.delete_by_ids(&ids)
    }

    /// Deletes the rows with the given identities.
    ///
    /// `BeforeDelete` and `AfterDelete` triggers receive the stored rows.
    /// Deleted identities are never issued again.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<()> {
        let ids: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let stored = {
            let state = self.state.read();
            state.ensure_open()?;
            let mut stored = Vec::with_capacity(ids.len());
            for id in &ids {
                match state.rows.get(id) {
                    Some(entry) => stored.push(entry.row.clone()),
                    None => {
                        return Err(TableError::RowNotFound {
                            table: self.spec.name.to_string(),
                            id: *id,
                        })
                    }
                }
            }
            stored
        };
        if stored.is_empty() {
            return Ok(());
        }

        self.run_triggers(TriggerPhase::BeforeDelete, &stored)?;

        {
            let mut state = self.state.write();
            state.ensure_open()?;
            for id in &ids {
                self.require_live(&state, *id)?;
            }
            state.commit_deletes(&ids, self.is_lazy())?;
            self.compact_if_over_threshold(&mut state);
        }
        debug!(table = self.spec.name, rows = ids.len(), "table.delete");

        self.run_triggers(TriggerPhase::AfterDelete, &stored)
            .map_err(|err| after_trigger(TriggerPhase::AfterDelete, err))
    }

    /// All live rows in insertion order.
    pub fn select(&self) -> Result<Vec<R>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.rows.get(id).map(|entry| entry.row.clone()))
            .collect())
    }

    /// The row with identity `id`, if live.
    pub fn select_by_id(&self, id: i64) -> Result<Option<R>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.rows.get(&id).map(|entry| entry.row.clone()))
    }

    /// Live rows matching `predicate`, in insertion order.
    pub fn select_where(&self, predicate: impl Fn(&R) -> bool) -> Result<Vec<R>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.rows.get(id))
            .filter(|entry| predicate(&entry.row))
            .map(|entry| entry.row.clone())
            .collect())
    }

    /// Rows stored under `key` in the index named `index`, by identity.
    pub fn select_by_index(&self, index: &str, key: &IndexKey) -> Result<Vec<R>> {
        let state = self.state.read();
        state.ensure_open()?;
        let ids = state.indexes.lookup(index, key)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.rows.get(id).map(|entry| entry.row.clone()))
            .collect())
    }

    /// Number of live rows.
    pub fn record_count(&self) -> Result<u64> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.rows.len() as u64)
    }

    /// Bytes occupied by live blocks, block headers included.
    pub fn data_length(&self) -> Result<u64> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.live_bytes)
    }

    /// Bytes occupied by deleted blocks.
    pub fn deleted_bytes(&self) -> Result<u64> {
        self.state.read().deleted_bytes()
    }

    /// Share of block bytes reclaimable by compaction, in percent.
    pub fn compact_percent(&self) -> Result<u8> {
        let state = self.state.read();
        Ok(compact_percent(state.deleted_bytes()?, state.live_bytes))
    }

    /// Last issued primary sequence value.
    pub fn primary_sequence(&self) -> Result<i64> {
        Ok(self.state.read().file()?.header().primary_sequence)
    }

    /// Last issued secondary sequence value.
    pub fn secondary_sequence(&self) -> Result<i64> {
        Ok(self.state.read().file()?.header().secondary_sequence)
    }

    /// Schema version of the seed data applied to this table.
    pub fn schema_version(&self) -> Result<u16> {
        Ok(self.state.read().file()?.header().schema_version)
    }

    /// Issues the next primary sequence value.
    pub fn next_sequence(&self) -> Result<i64> {
        let mut state = self.state.write();
        SequenceStore::new(state.file_mut()?).next_primary()
    }

    /// Issues the next secondary sequence value for `group`.
    pub fn next_secondary_sequence(&self, group: i64) -> Result<i64> {
        let mut state = self.state.write();
        SequenceStore::new(state.file_mut()?).next_secondary(group)
    }

    /// Overwrites both sequence counters.
    pub fn reset_sequence(&self, primary: i64, secondary: i64) -> Result<()> {
        let mut state = self.state.write();
        SequenceStore::new(state.file_mut()?).reset(primary, secondary)
    }

    /// Writes buffered rows of a lazy table; returns how many were written.
    pub fn flush(&self) -> Result<usize> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.flush()
    }

    /// Flushes a lazy table whose buffer reached the threshold. The batch is
    /// already committed in memory, so a failed flush stays pending.
    fn flush_if_over_threshold(&self, state: &mut TableState<R>) {
        if state.pending.len() < self.options.lazy_flush_threshold {
            return;
        }
        if let Err(err) = state.flush() {
            warn!(
                table = self.spec.name,
                pending = state.pending.len(),
                error = %err,
                "table.flush.threshold_failed"
            );
        }
    }

    fn wants_compaction(&self, state: &TableState<R>, threshold: Option<u8>) -> Result<bool> {
        let deleted = state.deleted_bytes()?;
        if deleted == 0 || deleted < self.options.compact_min_bytes {
            return Ok(false);
        }
        Ok(threshold.map_or(true, |percent| {
            compact_percent(deleted, state.live_bytes) >= percent
        }))
    }

    fn compact_if_over_threshold(&self, state: &mut TableState<R>) {
        let Some(threshold) = self.options.compact_threshold_percent else {
            return;
        };
        match self.wants_compaction(state, Some(threshold)) {
            Ok(true) => {
                if let Err(err) = state.compact() {
                    warn!(table = self.spec.name, error = %err, "table.compact.auto_failed");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(table = self.spec.name, error = %err, "table.compact.auto_failed"),
        }
    }

    /// Rewrites the table file without deleted blocks.
    ///
    /// Pending lazy rows are flushed first. The new file replaces the old
    /// one atomically; on failure the old file stays intact.
    pub fn compact(&self) -> Result<CompactionReport> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.compact()
    }

    /// Starts a background worker compacting this table every
    /// `compaction_interval_secs`, or returns `None` when no interval is set.
    ///
    /// The worker holds the table weakly; it stops when the table is
    /// dropped or disposed, or when the returned handle is dropped.
    pub fn spawn_compaction_worker(self: &Arc<Self>) -> Result<Option<CompactionWorker>> {
        let Some(secs) = self.options.compaction_interval_secs else {
            return Ok(None);
        };
        self.state.read().ensure_open()?;
        let target: Arc<dyn Compactable> = self.clone();
        let worker = CompactionWorker::spawn(Arc::downgrade(&target), Duration::from_secs(secs))?;
        Ok(Some(worker))
    }

    /// Returns true once the table has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state.read().handle.is_none()
    }

    /// Flushes buffered rows and releases the table file.
    ///
    /// Every later call, including another `dispose`, fails with
    /// [`TableError::Disposed`].
    pub fn dispose(&self) -> Result<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        let flushed = state.flush();
        state.handle = None;
        state.rows.clear();
        state.order.clear();
        state.pending.clear();
        state.retired.clear();
        state.indexes = IndexManager::new();
        state.live_bytes = 0;
        info!(table = self.spec.name, "table.disposed");
        flushed.map(|_| ())
    }
}

impl<R: TableRow> Compactable for TableOperations<R> {
    fn table_name(&self) -> &str {
        self.spec.name
    }

    fn compact_if_needed(&self) -> Result<Option<CompactionReport>> {
        let mut state = self.state.write();
        state.ensure_open()?;
        if !self.wants_compaction(&state, self.options.compact_threshold_percent)? {
            return Ok(None);
        }
        state.compact().map(Some)
    }
}

impl<R: TableRow> Drop for TableOperations<R> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.handle.is_none() {
            return;
        }
        if let Err(err) = state.flush() {
            warn!(table = self.spec.name, error = %err, "table.drop.flush_failed");
        }
        debug!(table = self.spec.name, "table.dropped");
    }
}
