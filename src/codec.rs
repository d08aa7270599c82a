//! Row payload encoding.
//!
//! Payloads carry only the row's declared fields; the identity lives in the
//! block header. Compression is applied after encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TableError};
use crate::row::{RowEncoding, TableSpec};

/// Encodes `row` according to `spec`.
pub fn encode_row<R: Serialize>(spec: &TableSpec, row: &R) -> Result<Vec<u8>> {
    let raw = match spec.encoding {
        RowEncoding::Json => serde_json::to_vec(row)?,
        RowEncoding::Delimited => encode_delimited(row)?,
    };
    if spec.compress {
        Ok(snap::raw::Encoder::new().compress_vec(&raw)?)
    } else {
        Ok(raw)
    }
}

/// Decodes a payload previously produced by [`encode_row`].
pub fn decode_row<R: DeserializeOwned>(spec: &TableSpec, payload: &[u8]) -> Result<R> {
    let decompressed;
    let raw = if spec.compress {
        decompressed = snap::raw::Decoder::new().decompress_vec(payload)?;
        decompressed.as_slice()
    } else {
        payload
    };
    match spec.encoding {
        RowEncoding::Json => Ok(serde_json::from_slice(raw)?),
        RowEncoding::Delimited => decode_delimited(raw),
    }
}

fn encode_delimited<R: Serialize>(row: &R) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.serialize(row)?;
    let mut buf = writer
        .into_inner()
        .map_err(|err| TableError::Serialization(err.to_string()))?;
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(buf)
}

fn decode_delimited<R: DeserializeOwned>(raw: &[u8]) -> Result<R> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_reader(raw);
    match reader.deserialize::<R>().next() {
        Some(row) => Ok(row?),
        None => Err(TableError::Serialization("empty delimited record".into())),
    }
}
