use crate::error::{Result, TableError};

const MAGIC: &[u8; 8] = b"RWFTBL\0\x01";
/// Size of the fixed table header at the start of every table file.
pub const HEADER_LEN: usize = 64;
const FORMAT_VERSION: u16 = 1;
const CRC_OFFSET: usize = 60;

/// Fixed-size table header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    /// Schema version of the seeded data.
    pub schema_version: u16,
    /// Last issued primary sequence value.
    pub primary_sequence: i64,
    /// Last issued secondary sequence value.
    pub secondary_sequence: i64,
    /// Number of live blocks.
    pub record_count: u64,
    /// Bytes occupied by live blocks, block headers included.
    pub data_length: u64,
    /// Bytes occupied by deleted blocks.
    pub deleted_bytes: u64,
    /// Payload encoding tag.
    pub encoding: u8,
    /// Whether payloads are compressed.
    pub compressed: bool,
}

impl TableHeader {
    /// Header of an empty table.
    pub fn new(encoding: u8, compressed: bool) -> Self {
        Self {
            schema_version: 0,
            primary_sequence: -1,
            secondary_sequence: -1,
            record_count: 0,
            data_length: 0,
            deleted_bytes: 0,
            encoding,
            compressed,
        }
    }

    /// Decodes and validates a header.
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(TableError::Corruption("table header truncated".into()));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(TableError::Corruption("invalid table header magic".into()));
        }
        let stored_crc = u32::from_le_bytes(read_array(data, CRC_OFFSET));
        let actual_crc = crc32fast::hash(&data[..CRC_OFFSET]);
        if stored_crc != actual_crc {
            return Err(TableError::Corruption(format!(
                "table header checksum mismatch (stored {stored_crc:#010x}, computed {actual_crc:#010x})"
            )));
        }
        let format = u16::from_le_bytes(read_array(data, 8));
        if format != FORMAT_VERSION {
            return Err(TableError::Corruption(format!(
                "unsupported table format version {format}"
            )));
        }
        Ok(Self {
            schema_version: u16::from_le_bytes(read_array(data, 10)),
            primary_sequence: i64::from_le_bytes(read_array(data, 12)),
            secondary_sequence: i64::from_le_bytes(read_array(data, 20)),
            record_count: u64::from_le_bytes(read_array(data, 28)),
            data_length: u64::from_le_bytes(read_array(data, 36)),
            deleted_bytes: u64::from_le_bytes(read_array(data, 44)),
            encoding: data[52],
            compressed: data[53] != 0,
        })
    }

    /// Encodes the header, checksum included.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut data = [0u8; HEADER_LEN];
        data[..MAGIC.len()].copy_from_slice(MAGIC);
        data[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        data[10..12].copy_from_slice(&self.schema_version.to_le_bytes());
        data[12..20].copy_from_slice(&self.primary_sequence.to_le_bytes());
        data[20..28].copy_from_slice(&self.secondary_sequence.to_le_bytes());
        data[28..36].copy_from_slice(&self.record_count.to_le_bytes());
        data[36..44].copy_from_slice(&self.data_length.to_le_bytes());
        data[44..52].copy_from_slice(&self.deleted_bytes.to_le_bytes());
        data[52] = self.encoding;
        data[53] = u8::from(self.compressed);
        let crc = crc32fast::hash(&data[..CRC_OFFSET]);
        data[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        data
    }
}

/// `round(deleted / (deleted + live) * 100)`, zero for an empty table.
pub fn compact_percent(deleted_bytes: u64, live_bytes: u64) -> u8 {
    let total = deleted_bytes + live_bytes;
    if total == 0 {
        return 0;
    }
    ((deleted_bytes * 200 + total) / (total * 2)) as u8
}

fn read_array<const N: usize>(data: &[u8], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[off..off + N]);
    out
}
