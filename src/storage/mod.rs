//! On-disk layout of a table file.
//!
//! A table file is a fixed 64-byte header followed by append-only row
//! blocks. Deleting a row flips the tag byte of its block; updating a row
//! appends a new block and tombstones the old one. Compaction rewrites the
//! file with live blocks only.

/// Row block framing.
pub mod block;
/// Table file handle: scanning, batched commits and rewrites.
pub mod file;
/// Fixed table header.
pub mod header;

pub use block::{BlockHeader, BlockTag, BLOCK_HEADER_LEN};
pub use file::{BlockLoc, ScannedBlock, TableFile};
pub use header::{compact_percent, TableHeader, HEADER_LEN};
