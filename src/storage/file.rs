use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, TableError};
use crate::primitives::io::{read_vec, FileIo, StdFileIo};
use crate::storage::block::{verify_payload, BlockHeader, BlockTag, BLOCK_HEADER_LEN, TAG_OFFSET};
use crate::storage::header::{TableHeader, HEADER_LEN};

/// Position and full size of a block inside the table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLoc {
    /// Offset of the block header.
    pub offset: u64,
    /// Block header plus payload.
    pub len: u64,
}

/// Live block found while scanning a table file.
#[derive(Debug)]
pub struct ScannedBlock {
    /// Row identity.
    pub id: i64,
    /// Where the block lives.
    pub loc: BlockLoc,
    /// Encoded row payload.
    pub payload: Vec<u8>,
}

/// Byte-level view of one table file: header plus append-only blocks.
pub struct TableFile {
    path: PathBuf,
    io: StdFileIo,
    header: TableHeader,
    end: u64,
    sync: bool,
}

impl TableFile {
    /// Opens `path`, writing a fresh header when the file is empty.
    ///
    /// Returns the file and whether it was created by this call.
    pub fn open(path: &Path, encoding: u8, compressed: bool, sync: bool) -> Result<(Self, bool)> {
        let io = StdFileIo::open(path)?;
        let len = io.len()?;
        if len == 0 {
            let header = TableHeader::new(encoding, compressed);
            io.write_at(0, &header.to_bytes())?;
            io.sync_all()?;
            info!(path = %path.display(), "table.file.created");
            let file = Self {
                path: path.to_path_buf(),
                io,
                header,
                end: HEADER_LEN as u64,
                sync,
            };
            return Ok((file, true));
        }
        if len < HEADER_LEN as u64 {
            return Err(TableError::Corruption(format!(
                "{} is shorter than a table header ({len} bytes)",
                path.display()
            )));
        }
        let header = TableHeader::read(&read_vec(&io, 0, HEADER_LEN)?)?;
        if header.encoding != encoding || header.compressed != compressed {
            return Err(TableError::Corruption(format!(
                "{} was written with encoding {} (compressed: {}), row type declares {} (compressed: {})",
                path.display(),
                header.encoding,
                header.compressed,
                encoding,
                compressed
            )));
        }
        let file = Self {
            path: path.to_path_buf(),
            io,
            header,
            end: len,
            sync,
        };
        Ok((file, false))
    }

    /// Path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current persisted header.
    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    /// Logical end of the file: header plus every block.
    pub fn len(&self) -> u64 {
        self.end
    }

    /// Returns true when the file holds no block at all.
    pub fn is_empty(&self) -> bool {
        self.end == HEADER_LEN as u64
    }

    /// Reads every block, returning the live ones in physical order.
    ///
    /// A torn trailing block is cut off. A row that appears live twice
    /// (interrupted update) keeps its later version. Header counters are
    /// recomputed and rewritten when they disagree with the blocks.
    pub fn scan(&mut self) -> Result<Vec<ScannedBlock>> {
        let file_len = self.io.len()?;
        let body_len = usize::try_from(file_len - HEADER_LEN as u64)
            .map_err(|_| TableError::Corruption("table file too large to scan".into()))?;
        let body = read_vec(&self.io, HEADER_LEN as u64, body_len)?;

        let mut live: Vec<Option<ScannedBlock>> = Vec::new();
        let mut by_id: FxHashMap<i64, usize> = FxHashMap::default();
        let mut deleted_bytes = 0u64;
        let mut pos = 0usize;
        let mut torn = false;

        while pos < body.len() {
            let offset = HEADER_LEN as u64 + pos as u64;
            if body.len() - pos < BLOCK_HEADER_LEN {
                torn = true;
                break;
            }
            let header = BlockHeader::from_bytes(&body[pos..pos + BLOCK_HEADER_LEN])?;
            let block_len = header.block_len() as usize;
            if body.len() - pos < block_len {
                torn = true;
                break;
            }
            let payload = &body[pos + BLOCK_HEADER_LEN..pos + block_len];
            let loc = BlockLoc {
                offset,
                len: block_len as u64,
            };
            match header.tag {
                BlockTag::Deleted => deleted_bytes += loc.len,
                BlockTag::Live => {
                    if let Err(err) = verify_payload(&header, payload) {
                        if pos + block_len == body.len() {
                            torn = true;
                            break;
                        }
                        return Err(err);
                    }
                    if let Some(previous) = by_id.insert(header.id, live.len()) {
                        if let Some(stale) = live[previous].take() {
                            warn!(
                                path = %self.path.display(),
                                id = header.id,
                                offset = stale.loc.offset,
                                "table.scan.duplicate_block"
                            );
                            self.write_tag(stale.loc, BlockTag::Deleted)?;
                            deleted_bytes += stale.loc.len;
                        }
                    }
                    live.push(Some(ScannedBlock {
                        id: header.id,
                        loc,
                        payload: payload.to_vec(),
                    }));
                }
            }
            pos += block_len;
        }

        self.end = HEADER_LEN as u64 + pos as u64;
        if torn {
            warn!(
                path = %self.path.display(),
                kept = self.end,
                dropped = file_len - self.end,
                "table.scan.truncated_tail"
            );
            self.io.truncate(self.end)?;
        }

        let blocks: Vec<ScannedBlock> = live.into_iter().flatten().collect();
        let data_length: u64 = blocks.iter().map(|block| block.loc.len).sum();
        let max_id = blocks.iter().map(|block| block.id).max().unwrap_or(-1);
        let mut repaired = self.header.clone();
        repaired.record_count = blocks.len() as u64;
        repaired.data_length = data_length;
        repaired.deleted_bytes = deleted_bytes;
        repaired.primary_sequence = repaired.primary_sequence.max(max_id);
        if repaired != self.header {
            warn!(
                path = %self.path.display(),
                records = repaired.record_count,
                data_length = repaired.data_length,
                deleted_bytes = repaired.deleted_bytes,
                "table.header.repaired"
            );
            self.write_header(repaired)?;
            self.io.sync_all()?;
        } else if torn {
            self.io.sync_all()?;
        }
        debug!(
            path = %self.path.display(),
            live = blocks.len(),
            deleted_bytes,
            "table.scan.done"
        );
        Ok(blocks)
    }

    /// Appends `blocks` and tombstones `retired` as one header commit.
    ///
    /// Tombstones outside the file are rejected before anything is written.
    /// On failure the file is cut back to its previous end, tombstones are
    /// reverted, and the in-memory header is left untouched.
    pub fn commit_batch(&mut self, blocks: &[Vec<u8>], retired: &[BlockLoc]) -> Result<Vec<BlockLoc>> {
        if let Some(loc) = retired
            .iter()
            .find(|loc| loc.offset < HEADER_LEN as u64 || loc.offset + loc.len > self.end)
        {
            return Err(TableError::Corruption(format!(
                "block at offset {} ({} bytes) lies outside {}",
                loc.offset,
                loc.len,
                self.path.display()
            )));
        }
        let previous_end = self.end;
        let previous_header = self.header.clone();
        match self.apply_batch(blocks, retired) {
            Ok(locs) => Ok(locs),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "table.batch.rollback"
                );
                self.rollback(previous_end, previous_header, retired);
                Err(err)
            }
        }
    }

    fn apply_batch(&mut self, blocks: &[Vec<u8>], retired: &[BlockLoc]) -> Result<Vec<BlockLoc>> {
        let mut locs = Vec::with_capacity(blocks.len());
        let mut offset = self.end;
        for block in blocks {
            locs.push(BlockLoc {
                offset,
                len: block.len() as u64,
            });
            offset += block.len() as u64;
        }
        if !blocks.is_empty() {
            let mut buffer = Vec::with_capacity((offset - self.end) as usize);
            for block in blocks {
                buffer.extend_from_slice(block);
            }
            self.io.write_at(self.end, &buffer)?;
        }
        for loc in retired {
            self.write_tag(*loc, BlockTag::Deleted)?;
        }
        let added: u64 = locs.iter().map(|loc| loc.len).sum();
        let removed: u64 = retired.iter().map(|loc| loc.len).sum();
        let mut header = self.header.clone();
        header.record_count = header.record_count + locs.len() as u64 - retired.len() as u64;
        header.data_length = header.data_length + added - removed;
        header.deleted_bytes += removed;
        self.write_header(header)?;
        self.end = offset;
        if self.sync {
            self.io.sync_all()?;
        }
        debug!(
            path = %self.path.display(),
            appended = locs.len(),
            retired = retired.len(),
            end = self.end,
            "table.batch.committed"
        );
        Ok(locs)
    }

    fn rollback(&mut self, previous_end: u64, previous_header: TableHeader, retired: &[BlockLoc]) {
        for loc in retired {
            if let Err(err) = self.write_tag(*loc, BlockTag::Live) {
                warn!(offset = loc.offset, error = %err, "table.batch.rollback_tag_failed");
            }
        }
        if let Err(err) = self.io.truncate(previous_end) {
            warn!(end = previous_end, error = %err, "table.batch.rollback_truncate_failed");
        }
        if let Err(err) = self.io.write_at(0, &previous_header.to_bytes()) {
            warn!(error = %err, "table.batch.rollback_header_failed");
        }
        self.header = previous_header;
        self.end = previous_end;
    }

    /// Persists new sequence counters.
    pub fn set_sequences(&mut self, primary: i64, secondary: i64) -> Result<()> {
        let mut header = self.header.clone();
        header.primary_sequence = primary;
        header.secondary_sequence = secondary;
        self.write_header(header)?;
        self.sync_if_enabled()
    }

    /// Persists a new schema version.
    pub fn set_schema_version(&mut self, version: u16) -> Result<()> {
        let mut header = self.header.clone();
        header.schema_version = version;
        self.write_header(header)?;
        self.sync_if_enabled()
    }

    /// Writes the live blocks at `locs`, in order, to a fresh file that
    /// atomically replaces this one. Returns the new block locations.
    ///
    /// The replacement is built in a temporary file next to the table and
    /// renamed over it only after it is fully synced; any failure leaves
    /// the current file untouched.
    pub fn rewrite(&mut self, locs: &[BlockLoc]) -> Result<Vec<BlockLoc>> {
        let dir = self.path.parent().ok_or_else(|| TableError::PathInvalid {
            path: self.path.clone(),
            reason: "table file has no parent directory",
        })?;
        let mut header = self.header.clone();
        header.record_count = locs.len() as u64;
        header.data_length = locs.iter().map(|loc| loc.len).sum();
        header.deleted_bytes = 0;

        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(temp);
        writer.write_all(&header.to_bytes())?;
        let mut new_locs = Vec::with_capacity(locs.len());
        let mut offset = HEADER_LEN as u64;
        for loc in locs {
            let block = read_vec(&self.io, loc.offset, loc.len as usize)?;
            writer.write_all(&block)?;
            new_locs.push(BlockLoc {
                offset,
                len: loc.len,
            });
            offset += loc.len;
        }
        let temp = writer
            .into_inner()
            .map_err(|err| TableError::Io(err.into_error()))?;
        temp.as_file().sync_all()?;
        let file = temp
            .persist(&self.path)
            .map_err(|err| TableError::Io(err.error))?;
        sync_dir(dir);

        self.io = StdFileIo::new(file);
        self.header = header;
        self.end = offset;
        Ok(new_locs)
    }

    fn write_tag(&self, loc: BlockLoc, tag: BlockTag) -> Result<()> {
        self.io.write_at(loc.offset + TAG_OFFSET, &[tag.to_byte()])
    }

    fn write_header(&mut self, header: TableHeader) -> Result<()> {
        self.io.write_at(0, &header.to_bytes())?;
        self.header = header;
        Ok(())
    }

    fn sync_if_enabled(&self) -> Result<()> {
        if self.sync {
            self.io.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|handle| handle.sync_all()) {
        warn!(dir = %dir.display(), error = %err, "table.rewrite.dir_sync_failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
