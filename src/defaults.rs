//! Seed data and initial sequence values supplied by the application.

/// Provides the starting state of a table.
///
/// Consulted when a table file is created, and when an existing file carries
/// a lower schema version than [`TableDefaults::version`]. Seed rows are
/// inserted without running triggers.
pub trait TableDefaults<R>: Send + Sync {
    /// Primary counter of a new table; the first identity issued is one higher.
    fn primary_sequence(&self) -> i64 {
        -1
    }

    /// Secondary counter of a new table.
    fn secondary_sequence(&self) -> i64 {
        -1
    }

    /// Current schema version of the seed data.
    fn version(&self) -> u16 {
        0
    }

    /// Rows introduced by schema version `version`.
    fn initial_data(&self, _version: u16) -> Vec<R> {
        Vec::new()
    }
}

/// Empty table, counters starting at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDefaults;

impl<R> TableDefaults<R> for NoDefaults {}
