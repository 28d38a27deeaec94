// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for descriptor construction, buffer framing and evolution.

use std::fmt;

/// Errors produced by the serialization engine.
///
/// Build-time errors (`DescriptorBuild`) indicate a schema-definition defect
/// and are never retried; a failed build is never published to the registry.
/// Record-level errors (`VersionUnknown`, `EvolutionConflict`) are recoverable
/// for the surrounding batch, the rest abort the current buffer.
#[derive(Debug, Clone)]
pub enum Error {
    /// A member's type has no resolvable descriptor and is not transient.
    DescriptorBuild {
        class: String,
        member: String,
        reason: String,
    },
    /// Two evolution rules claim the same target member; the later one is ignored.
    EvolutionConflict {
        class: String,
        target: String,
        reason: String,
    },
    /// A record header declares more bytes than the buffer holds.
    TruncatedBuffer {
        offset: usize,
        need: usize,
        have: usize,
    },
    /// A descriptor's declared checksum does not match the recomputed value.
    ChecksumMismatch {
        class: String,
        version: i32,
        declared: u32,
        computed: u32,
    },
    /// On-file class version has no in-memory descriptor and no covering rule.
    VersionUnknown { class: String, version: i32 },
    /// Raw cursor underflow outside any declared record.
    ReadFailed { offset: usize, reason: String },
    /// Cursor write failure (framing misuse, oversized patch).
    WriteFailed { offset: usize, reason: String },
    /// A single record exceeds the representable byte-count range.
    RecordTooLarge { size: usize },
    /// A slot holds a value of the wrong shape for the compiled action.
    TypeMismatch { expected: String, found: String },
    /// Malformed payload content (bad tags, bad UTF-8, bad JSON shape).
    InvalidData { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DescriptorBuild {
                class,
                member,
                reason,
            } => write!(f, "descriptor build failed for {}::{}: {}", class, member, reason),
            Error::EvolutionConflict {
                class,
                target,
                reason,
            } => write!(f, "evolution rule conflict on {}::{}: {}", class, target, reason),
            Error::TruncatedBuffer { offset, need, have } => write!(
                f,
                "truncated buffer at offset {}: need {} bytes, have {}",
                offset, need, have
            ),
            Error::ChecksumMismatch {
                class,
                version,
                declared,
                computed,
            } => write!(
                f,
                "checksum mismatch for {} v{}: declared {:#010x}, computed {:#010x}",
                class, version, declared, computed
            ),
            Error::VersionUnknown { class, version } => {
                write!(f, "unknown on-file version {} for class {}", version, class)
            }
            Error::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            Error::WriteFailed { offset, reason } => {
                write!(f, "write failed at offset {}: {}", offset, reason)
            }
            Error::RecordTooLarge { size } => {
                write!(f, "record of {} bytes exceeds byte-count range", size)
            }
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Error::InvalidData { reason } => write!(f, "invalid data: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for record-level conditions that must not abort sibling records
    /// in the same batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::VersionUnknown { .. } | Error::EvolutionConflict { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        let err = Error::TruncatedBuffer {
            offset: 4,
            need: 40,
            have: 10,
        };
        assert_eq!(
            err.to_string(),
            "truncated buffer at offset 4: need 40 bytes, have 10"
        );

        let err = Error::VersionUnknown {
            class: "Track".into(),
            version: 9,
        };
        assert_eq!(err.to_string(), "unknown on-file version 9 for class Track");

        let err = Error::ReadFailed {
            offset: 12,
            reason: "unexpected end of buffer".into(),
        };
        assert_eq!(
            err.to_string(),
            "read failed at offset 12: unexpected end of buffer"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::VersionUnknown {
            class: "X".into(),
            version: 3
        }
        .is_recoverable());
        assert!(!Error::TruncatedBuffer {
            offset: 0,
            need: 8,
            have: 0
        }
        .is_recoverable());
        assert!(!Error::RecordTooLarge { size: 1 << 33 }.is_recoverable());
    }
}
