//! Frame codec for the ledger log.
//!
//! Every log entry is stored as one frame:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! The file itself starts with `MAGIC` followed by the codec version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying a milestone-watch log.
pub const MAGIC: [u8; 4] = *b"MWLG";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Ledger entries are small; anything larger is treated as corruption.
const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Encodes `value` into a checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(invalid(format!(
            "entry size {} exceeds maximum {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }
    let len = u32::try_from(payload.len()).map_err(|_| invalid("entry too large".to_string()))?;

    let mut out = Vec::with_capacity(payload.len() + 9);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(out)
}

/// Decodes one frame.
///
/// Returns `Ok(None)` at a clean end of input. A frame cut short by a crash
/// surfaces as `ErrorKind::UnexpectedEof`; checksum, version and size
/// violations surface as `ErrorKind::InvalidData`.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<Option<T>> {
    let mut version = [0u8; 1];
    match reader.read(&mut version)? {
        0 => return Ok(None),
        _ if version[0] != CODEC_VERSION => {
            return Err(invalid(format!(
                "unsupported codec version: {} (expected {CODEC_VERSION})",
                version[0]
            )));
        }
        _ => {}
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(invalid(format!("entry size {len} exceeds maximum {MAX_PAYLOAD_LEN}")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"
        )));
    }

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Read and validate the file header, returning its version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {magic:?}"
        )));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_decodes() {
        let encoded = encode(&"support_10000".to_string()).unwrap();
        let mut cursor = Cursor::new(encoded);
        let decoded: Option<String> = decode(&mut cursor).unwrap();
        assert_eq!(decoded.as_deref(), Some("support_10000"));

        let end: Option<String> = decode(&mut cursor).unwrap();
        assert!(end.is_none());
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode(&"ledger entry".to_string()).unwrap();
        encoded[8] ^= 0xFF;

        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_torn_frame_is_unexpected_eof() {
        let encoded = encode(&"ledger entry".to_string()).unwrap();
        let torn = encoded[..encoded.len() - 3].to_vec();

        let err = decode::<String>(&mut Cursor::new(torn)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_rejects_foreign_magic() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), CODEC_VERSION);

        let err = read_header(&mut Cursor::new(b"XXXX\x01".to_vec())).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }
}
