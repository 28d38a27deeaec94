// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read/write cursors with versioned record framing.
//!
//! All primitives are big-endian (network order). Wire contracts:
//!
//! - Object record: `u16` class-name tag (`0` = new name follows as
//!   `u16` length + UTF-8 bytes, registering the next index in a per-buffer
//!   string table; otherwise index + 1 into that table), `i16` version
//!   (`-1` escapes to a wide `i32` version), `u32` byte count of the payload
//!   with the top bit as a "more data follows" continuation flag.
//! - Strings: `u32` length + UTF-8 bytes.
//!
//! The byte count enables forward-skip of unknown records without decoding.
//! An undersized buffer (header declares more than remains) fails with
//! `TruncatedBuffer`, distinctly from a well-formed but unrecognized version,
//! which is recoverable by skipping.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Top bit of the byte-count word: record continues in a following chunk.
pub const CONTINUATION_FLAG: u32 = 0x8000_0000;
/// Version escape: a wide `i32` version follows the `i16` tag.
pub const VERSION_WIDE: i16 = -1;
/// Class-name tag announcing a new table entry.
const NEW_NAME_TAG: u16 = 0;

/// Generate write methods for big-endian primitives.
macro_rules! impl_write_be {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    };
}

/// Generate read methods for big-endian primitives.
macro_rules! impl_read_be {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> Result<$type> {
            if self.offset + $size > self.buf.len() {
                return Err(Error::ReadFailed {
                    offset: self.offset,
                    reason: "unexpected end of buffer".into(),
                });
            }
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(&self.buf[self.offset..self.offset + $size]);
            self.offset += $size;
            Ok(<$type>::from_be_bytes(bytes))
        }
    };
}

// ---------------------------------------------------------------------------
// WriteCursor
// ---------------------------------------------------------------------------

/// Marks an open length-prefixed record; consumed by [`WriteCursor::end_record`].
#[derive(Debug)]
#[must_use = "an open record must be closed with end_record"]
pub struct RecordMark {
    count_pos: usize,
}

/// Growable big-endian writer with record framing and a class-name table.
pub struct WriteCursor {
    buf: Vec<u8>,
    names: HashMap<String, u16>,
}

impl WriteCursor {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            names: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            names: HashMap::new(),
        }
    }

    impl_write_be!(write_u8, u8);
    impl_write_be!(write_i8, i8);
    impl_write_be!(write_u16, u16);
    impl_write_be!(write_i16, i16);
    impl_write_be!(write_u32, u32);
    impl_write_be!(write_i32, i32);
    impl_write_be!(write_u64, u64);
    impl_write_be!(write_i64, i64);

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Length-prefixed UTF-8 string.
    pub fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Write the class-name tag and version header of an object record.
    ///
    /// The first appearance of a class name in this buffer writes the name
    /// once and registers it in the string table; later appearances write a
    /// two-byte back-reference. Versions beyond the `i16` range escape to a
    /// wide `i32` encoding.
    pub fn write_version(&mut self, class: &str, version: i32) -> Result<()> {
        match self.names.get(class).copied() {
            Some(idx) => self.write_u16(idx + 1),
            None => {
                if self.names.len() >= usize::from(u16::MAX - 1) {
                    return Err(Error::WriteFailed {
                        offset: self.buf.len(),
                        reason: "class-name table full".into(),
                    });
                }
                let idx = self.names.len() as u16;
                self.names.insert(class.to_string(), idx);
                self.write_u16(NEW_NAME_TAG);
                self.write_u16(class.len() as u16);
                self.buf.extend_from_slice(class.as_bytes());
            }
        }
        if (0..=i32::from(i16::MAX)).contains(&version) {
            self.write_i16(version as i16);
        } else {
            self.write_i16(VERSION_WIDE);
            self.write_i32(version);
        }
        Ok(())
    }

    /// Open a length-prefixed record; the byte count is patched on close.
    pub fn begin_record(&mut self) -> RecordMark {
        let count_pos = self.buf.len();
        self.write_u32(0);
        RecordMark { count_pos }
    }

    /// Close a record, patching its byte count. Returns the payload size.
    ///
    /// The writer never emits continuation chunks; records beyond the
    /// byte-count range are rejected.
    pub fn end_record(&mut self, mark: RecordMark) -> Result<usize> {
        let payload = self.buf.len() - mark.count_pos - 4;
        if payload > i32::MAX as usize {
            return Err(Error::RecordTooLarge { size: payload });
        }
        self.buf[mark.count_pos..mark.count_pos + 4].copy_from_slice(&(payload as u32).to_be_bytes());
        Ok(payload)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for WriteCursor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ReadCursor
// ---------------------------------------------------------------------------

/// Decoded object record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    pub class: String,
    pub version: i32,
    /// Payload bytes declared by this record's first chunk.
    pub byte_count: usize,
    /// Cursor offset where the payload starts.
    pub payload_start: usize,
    /// More chunks follow the declared payload.
    pub continued: bool,
}

/// Bounds-checked big-endian reader over a borrowed buffer.
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    offset: usize,
    names: Vec<String>,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            names: Vec::new(),
        }
    }

    impl_read_be!(read_u8, u8, 1);
    impl_read_be!(read_i8, i8, 1);
    impl_read_be!(read_u16, u16, 2);
    impl_read_be!(read_i16, i16, 2);
    impl_read_be!(read_u32, u32, 4);
    impl_read_be!(read_i32, i32, 4);
    impl_read_be!(read_u64, u64, 8);
    impl_read_be!(read_i64, i64, 8);

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.buf.len() {
            return Err(Error::ReadFailed {
                offset: self.offset,
                reason: "unexpected end of buffer".into(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidData {
            reason: "invalid UTF-8 in string".into(),
        })
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        if self.offset + len > self.buf.len() {
            return Err(Error::ReadFailed {
                offset: self.offset,
                reason: "unexpected end of buffer".into(),
            });
        }
        self.offset += len;
        Ok(())
    }

    /// Decode an object record header: class-name tag, version, byte count.
    ///
    /// Fails with `TruncatedBuffer` when the declared payload exceeds the
    /// remaining bytes; a header that merely names an unknown version is left
    /// to the caller, which can forward-skip the declared payload.
    pub fn read_object_header(&mut self) -> Result<ObjectHeader> {
        let tag = self.read_u16()?;
        let class = if tag == NEW_NAME_TAG {
            let len = usize::from(self.read_u16()?);
            let bytes = self.read_bytes(len)?;
            let name = std::str::from_utf8(bytes)
                .map_err(|_| Error::InvalidData {
                    reason: "invalid UTF-8 in class name".into(),
                })?
                .to_string();
            self.names.push(name.clone());
            name
        } else {
            self.names
                .get(usize::from(tag - 1))
                .cloned()
                .ok_or_else(|| Error::ReadFailed {
                    offset: self.offset,
                    reason: format!("unknown class tag {}", tag),
                })?
        };

        let short = self.read_i16()?;
        let version = if short == VERSION_WIDE {
            self.read_i32()?
        } else if short < 0 {
            return Err(Error::InvalidData {
                reason: format!("reserved version tag {}", short),
            });
        } else {
            i32::from(short)
        };

        let raw = self.read_u32()?;
        let continued = raw & CONTINUATION_FLAG != 0;
        let byte_count = (raw & !CONTINUATION_FLAG) as usize;
        if byte_count > self.remaining() {
            return Err(Error::TruncatedBuffer {
                offset: self.offset,
                need: byte_count,
                have: self.remaining(),
            });
        }
        Ok(ObjectHeader {
            class,
            version,
            byte_count,
            payload_start: self.offset,
            continued,
        })
    }

    /// Skip a record's entire payload, reassembling continuation chunks.
    pub fn skip_payload(&mut self, header: &ObjectHeader) -> Result<()> {
        self.skip(header.byte_count)?;
        let mut continued = header.continued;
        while continued {
            let raw = self.read_u32()?;
            continued = raw & CONTINUATION_FLAG != 0;
            let count = (raw & !CONTINUATION_FLAG) as usize;
            if count > self.remaining() {
                return Err(Error::TruncatedBuffer {
                    offset: self.offset,
                    need: count,
                    have: self.remaining(),
                });
            }
            self.skip(count)?;
        }
        Ok(())
    }

    /// Close out a decoded record against its declared byte count.
    ///
    /// Trailing undecoded bytes (fields added by a newer writer) are skipped
    /// so the cursor stays aligned for the next record; overconsumption is a
    /// framing defect.
    pub fn finish_record(&mut self, header: &ObjectHeader) -> Result<()> {
        let consumed = self.offset - header.payload_start;
        if consumed < header.byte_count {
            log::debug!(
                "skipping {} trailing bytes of {} v{}",
                header.byte_count - consumed,
                header.class,
                header.version
            );
            self.skip(header.byte_count - consumed)?;
        } else if consumed > header.byte_count {
            return Err(Error::ReadFailed {
                offset: self.offset,
                reason: format!(
                    "decoded {} bytes past declared count of {} v{}",
                    consumed - header.byte_count,
                    header.class,
                    header.version
                ),
            });
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.buf.len()
    }
}
