use crate::error::{Result, TableError};

/// Bytes preceding every block payload.
pub const BLOCK_HEADER_LEN: usize = 20;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlockTag {
    Deleted = 0x00,
    Live = 0x01,
}

impl BlockTag {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Self::Deleted),
            0x01 => Ok(Self::Live),
            other => Err(TableError::Corruption(format!(
                "unknown block tag: 0x{other:02X}"
            ))),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Header of one serialized row block.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockHeader {
    pub tag: BlockTag,
    pub payload_len: u32,
    pub id: i64,
    pub crc32: u32,
}

impl BlockHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_LEN {
            return Err(TableError::Corruption("block header truncated".into()));
        }
        let tag = BlockTag::from_byte(bytes[0])?;
        if bytes[1..4] != [0, 0, 0] {
            return Err(TableError::Corruption(
                "block header reserved bytes not zero".into(),
            ));
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[4..8]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[8..16]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[16..20]);
        Ok(Self {
            tag,
            payload_len: u32::from_le_bytes(len),
            id: i64::from_le_bytes(id),
            crc32: u32::from_le_bytes(crc),
        })
    }

    /// Total block size on disk.
    pub fn block_len(&self) -> u64 {
        BLOCK_HEADER_LEN as u64 + u64::from(self.payload_len)
    }
}

/// Offset of the tag byte within a block; rewritten in place on delete.
pub const TAG_OFFSET: u64 = 0;

/// Encodes a live block for `id` carrying `payload`.
pub fn encode_block(id: i64, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TableError::Serialization("row payload exceeds 4 GiB".into()))?;
    let mut buffer = Vec::with_capacity(BLOCK_HEADER_LEN + payload.len());
    buffer.push(BlockTag::Live.to_byte());
    buffer.extend_from_slice(&[0; 3]);
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(&id.to_le_bytes());
    buffer.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Verifies a payload against the checksum recorded in its header.
pub fn verify_payload(header: &BlockHeader, payload: &[u8]) -> Result<()> {
    let actual = crc32fast::hash(payload);
    if actual != header.crc32 {
        return Err(TableError::Corruption(format!(
            "block {} failed its checksum",
            header.id
        )));
    }
    Ok(())
}
