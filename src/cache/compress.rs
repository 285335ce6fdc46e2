// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transparent payload compression for large cache values.
//!
//! Uses zstd with magic-bytes detection so stored values self-describe:
//! reads never need to consult the compressed flag to decode. Without the
//! `compression` feature the helpers degrade to passthrough.

use thiserror::Error;

/// Zstd magic bytes (little-endian): 0xFD2FB528
#[cfg(feature = "compression")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Level 3 balances speed and ratio for JSON payloads.
#[cfg(feature = "compression")]
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

/// Whether the payload carries the zstd magic header.
#[cfg(feature = "compression")]
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

#[cfg(not(feature = "compression"))]
#[inline]
#[must_use]
pub fn is_compressed(_data: &[u8]) -> bool {
    false
}

#[cfg(feature = "compression")]
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    zstd::encode_all(data, COMPRESSION_LEVEL)
        .map_err(|e| CompressionError::CompressFailed(e.to_string()))
}

#[cfg(not(feature = "compression"))]
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    Ok(data.to_vec())
}

/// Decompress a payload; plain payloads pass through unchanged.
#[cfg(feature = "compression")]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if is_compressed(data) {
        zstd::decode_all(data).map_err(|e| CompressionError::DecompressFailed(e.to_string()))
    } else {
        Ok(data.to_vec())
    }
}

#[cfg(not(feature = "compression"))]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    Ok(data.to_vec())
}

#[cfg(test)]
#[cfg(feature = "compression")]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let original = br#"{"playerId":"p1","level":42,"inventory":["sword","shield"]}"#;
        let compressed = compress(original).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_magic_detection() {
        let compressed = compress(b"some payload").unwrap();
        assert!(is_compressed(&compressed));
        assert!(!is_compressed(b"{\"plain\": true}"));
        assert!(!is_compressed(b""));
        assert!(!is_compressed(b"abc"));
    }

    #[test]
    fn test_decompress_plain_passthrough() {
        let plain = b"{\"not\": \"compressed\"}";
        assert_eq!(decompress(plain).unwrap(), plain.to_vec());
    }

    #[test]
    fn test_repetitive_payload_shrinks() {
        let payload = "x".repeat(4096);
        let compressed = compress(payload.as_bytes()).unwrap();
        assert!(compressed.len() < payload.len());
    }
}
