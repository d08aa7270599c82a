//! Low-level file primitives shared by the storage layer.

/// Positioned file I/O.
pub mod io;
/// Exclusive table ownership.
pub mod lock;
