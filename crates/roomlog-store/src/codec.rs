//! On-disk encoding of a room log: JSON (RFC 3339 timestamps) under gzip.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, RoomError};
use crate::model::RoomLog;

const BUFFER: &str = "<buffer>";

/// Encode a room log into a compressed blob.
pub fn encode(log: &RoomLog) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(log).map_err(std::io::Error::other)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decode a blob produced by [`encode`].
///
/// Any failure (empty input, broken gzip stream, invalid JSON, bad
/// timestamps) is `CorruptData`.
pub fn decode(bytes: &[u8]) -> Result<RoomLog> {
    if bytes.is_empty() {
        return Err(RoomError::corrupt(BUFFER, "empty input"));
    }

    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| RoomError::corrupt(BUFFER, format!("decompression failed: {e}")))?;

    serde_json::from_slice(&json)
        .map_err(|e| RoomError::corrupt(BUFFER, format!("invalid structure: {e}")))
}
