//! Primary and secondary sequence counters kept in the table header.
//!
//! Both counters hold the last value handed out. Every allocation is written
//! to the header before it is returned, so a crash between allocation and use
//! can lose a value but never hand it out twice.

use tracing::debug;

use crate::error::Result;
use crate::storage::TableFile;

/// Sequence operations over a table file's header.
pub struct SequenceStore<'a> {
    file: &'a mut TableFile,
}

impl<'a> SequenceStore<'a> {
    /// Borrows the counters of `file`.
    pub fn new(file: &'a mut TableFile) -> Self {
        Self { file }
    }

    /// Last issued primary value.
    pub fn primary(&self) -> i64 {
        self.file.header().primary_sequence
    }

    /// Last issued secondary value.
    pub fn secondary(&self) -> i64 {
        self.file.header().secondary_sequence
    }

    /// Issues and persists the next primary value.
    pub fn next_primary(&mut self) -> Result<i64> {
        let value = self.primary() + 1;
        self.file.set_sequences(value, self.secondary())?;
        debug!(table = %self.file.path().display(), value, "sequence.primary.next");
        Ok(value)
    }

    /// Issues and persists the next secondary value.
    ///
    /// Groups share one counter, so values are unique across every group.
    pub fn next_secondary(&mut self, group: i64) -> Result<i64> {
        let value = self.secondary() + 1;
        self.file.set_sequences(self.primary(), value)?;
        debug!(table = %self.file.path().display(), group, value, "sequence.secondary.next");
        Ok(value)
    }

    /// Reserves `count` consecutive primary values, returning the first.
    pub fn allocate_primary(&mut self, count: usize) -> Result<i64> {
        let first = self.primary() + 1;
        if count > 0 {
            self.file
                .set_sequences(first + count as i64 - 1, self.secondary())?;
        }
        Ok(first)
    }

    /// Moves the primary counter forward to `value`; never moves it back.
    pub fn advance_primary(&mut self, value: i64) -> Result<()> {
        if value > self.primary() {
            self.file.set_sequences(value, self.secondary())?;
        }
        Ok(())
    }

    /// Overwrites both counters.
    pub fn reset(&mut self, primary: i64, secondary: i64) -> Result<()> {
        self.file.set_sequences(primary, secondary)?;
        debug!(
            table = %self.file.path().display(),
            primary,
            secondary,
            "sequence.reset"
        );
        Ok(())
    }
}
