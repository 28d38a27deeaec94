// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Whole-buffer compression helpers.
//!
//! Compression applies to an entire completed buffer, never per element; the
//! record framing inside stays byte-identical either way.

use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Deflate a completed buffer.
pub fn compress_buffer(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|e| Error::WriteFailed {
            offset: 0,
            reason: format!("deflate failed: {}", e),
        })
}

/// Inflate a buffer produced by [`compress_buffer`].
pub fn decompress_buffer(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::InvalidData {
            reason: format!("inflate failed: {}", e),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = compress_buffer(&payload).expect("compress");
        assert!(packed.len() < payload.len());
        let unpacked = decompress_buffer(&packed).expect("decompress");
        assert_eq!(unpacked, payload);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let err = decompress_buffer(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }
}
