//! Before/after mutation hooks.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;

/// Point in a mutation batch at which a trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerPhase {
    /// Before new rows are written.
    BeforeInsert,
    /// After new rows are committed.
    AfterInsert,
    /// Before changed rows are written.
    BeforeUpdate,
    /// After changed rows are committed.
    AfterUpdate,
    /// Before rows are removed.
    BeforeDelete,
    /// After removed rows are committed.
    AfterDelete,
}

impl TriggerPhase {
    const fn bit(self) -> u8 {
        match self {
            TriggerPhase::BeforeInsert => 1 << 0,
            TriggerPhase::AfterInsert => 1 << 1,
            TriggerPhase::BeforeUpdate => 1 << 2,
            TriggerPhase::AfterUpdate => 1 << 3,
            TriggerPhase::BeforeDelete => 1 << 4,
            TriggerPhase::AfterDelete => 1 << 5,
        }
    }
}

/// Set of phases a trigger participates in.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerPhases(u8);

impl TriggerPhases {
    /// Every phase.
    pub const ALL: Self = Self(0b11_1111);

    /// Set holding only `phase`.
    pub const fn of(phase: TriggerPhase) -> Self {
        Self(phase.bit())
    }

    /// Adds `phase` to the set.
    pub const fn with(self, phase: TriggerPhase) -> Self {
        Self(self.0 | phase.bit())
    }

    /// Returns true if `phase` is in the set.
    pub const fn contains(self, phase: TriggerPhase) -> bool {
        self.0 & phase.bit() != 0
    }
}

impl From<TriggerPhase> for TriggerPhases {
    fn from(phase: TriggerPhase) -> Self {
        Self::of(phase)
    }
}

impl BitOr<TriggerPhase> for TriggerPhase {
    type Output = TriggerPhases;

    fn bitor(self, rhs: TriggerPhase) -> TriggerPhases {
        TriggerPhases::of(self).with(rhs)
    }
}

impl BitOr<TriggerPhase> for TriggerPhases {
    type Output = TriggerPhases;

    fn bitor(self, rhs: TriggerPhase) -> TriggerPhases {
        self.with(rhs)
    }
}

impl fmt::Debug for TriggerPhases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PHASES: [TriggerPhase; 6] = [
            TriggerPhase::BeforeInsert,
            TriggerPhase::AfterInsert,
            TriggerPhase::BeforeUpdate,
            TriggerPhase::AfterUpdate,
            TriggerPhase::BeforeDelete,
            TriggerPhase::AfterDelete,
        ];
        f.debug_set()
            .entries(PHASES.iter().filter(|phase| self.contains(**phase)))
            .finish()
    }
}

/// Hook invoked around insert, update and delete batches of one row type.
///
/// A `Before*` failure aborts the batch before anything is written. An
/// `After*` failure is reported to the caller wrapped in
/// [`crate::TableError::AfterTrigger`]; the batch stays committed.
pub trait TableTrigger<R>: Send + Sync {
    /// Relative execution order; lower positions run first.
    fn position(&self) -> i32 {
        0
    }

    /// Phases this trigger participates in.
    fn phases(&self) -> TriggerPhases;

    /// Runs before `rows` are inserted. Identities are already assigned.
    fn before_insert(&self, _rows: &[R]) -> Result<()> {
        Ok(())
    }

    /// Runs after `rows` were inserted.
    fn after_insert(&self, _rows: &[R]) -> Result<()> {
        Ok(())
    }

    /// Runs before `rows` replace their stored versions; `previous[i]` is
    /// the stored version of `rows[i]`.
    fn before_update(&self, _rows: &[R], _previous: &[R]) -> Result<()> {
        Ok(())
    }

    /// Runs after `rows` were updated.
    fn after_update(&self, _rows: &[R]) -> Result<()> {
        Ok(())
    }

    /// Runs before `rows` are deleted.
    fn before_delete(&self, _rows: &[R]) -> Result<()> {
        Ok(())
    }

    /// Runs after `rows` were deleted.
    fn after_delete(&self, _rows: &[R]) -> Result<()> {
        Ok(())
    }
}

/// Triggers registered for one row type, ordered by position.
pub struct TriggerPipeline<R> {
    triggers: Vec<Arc<dyn TableTrigger<R>>>,
}

impl<R> Default for TriggerPipeline<R> {
    fn default() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }
}

impl<R> Clone for TriggerPipeline<R> {
    fn clone(&self) -> Self {
        Self {
            triggers: self.triggers.clone(),
        }
    }
}

impl<R> TriggerPipeline<R> {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a trigger; triggers with equal positions keep registration order.
    pub fn register(&mut self, trigger: Arc<dyn TableTrigger<R>>) {
        let position = trigger.position();
        let at = self
            .triggers
            .iter()
            .position(|existing| existing.position() > position)
            .unwrap_or(self.triggers.len());
        self.triggers.insert(at, trigger);
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Returns true when no trigger is registered.
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Runs every trigger registered for `phase`, stopping at the first failure.
    pub fn run(&self, table: &str, phase: TriggerPhase, rows: &[R]) -> Result<()> {
        self.run_with_previous(table, phase, rows, &[])
    }

    /// Like [`TriggerPipeline::run`], handing `BeforeUpdate` triggers the
    /// stored versions of the updated rows.
    pub fn run_with_previous(
        &self,
        table: &str,
        phase: TriggerPhase,
        rows: &[R],
        previous: &[R],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for trigger in self
            .triggers
            .iter()
            .filter(|trigger| trigger.phases().contains(phase))
        {
            debug!(
                table,
                phase = ?phase,
                position = trigger.position(),
                rows = rows.len(),
                "trigger.run"
            );
            match phase {
                TriggerPhase::BeforeInsert => trigger.before_insert(rows)?,
                TriggerPhase::AfterInsert => trigger.after_insert(rows)?,
                TriggerPhase::BeforeUpdate => trigger.before_update(rows, previous)?,
                TriggerPhase::AfterUpdate => trigger.after_update(rows)?,
                TriggerPhase::BeforeDelete => trigger.before_delete(rows)?,
                TriggerPhase::AfterDelete => trigger.after_delete(rows)?,
            }
        }
        Ok(())
    }
}
