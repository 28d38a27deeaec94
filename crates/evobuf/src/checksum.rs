// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structural checksums over element lists.
//!
//! The checksum detects schema identity independently of the declared version
//! counter: two layouts differing only in unrelated metadata (comments,
//! documentation) hash identically, while renaming a member, changing its
//! type, or removing it changes the hash.
//!
//! The hash formula evolved over time; every era stays matchable so that
//! checksums declared by old buffers can still be recognized.

use crate::element::StreamerElement;
use md5::{Digest, Md5};

/// Which attributes participate in the digest.
///
/// `Current` is written into new descriptors; the older eras exist only to
/// match checksums declared by descriptors from earlier producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Member names + canonical types, base classes included.
    Current,
    /// Member names only (earliest era).
    NamesOnly,
    /// Names + types with base-class elements excluded.
    NoBaseClasses,
}

/// Every era, newest first; the order drives legacy matching.
pub const CHECKSUM_ERAS: [ChecksumMode; 3] = [
    ChecksumMode::Current,
    ChecksumMode::NamesOnly,
    ChecksumMode::NoBaseClasses,
];

/// Compute the structural checksum of an element list.
///
/// Transient elements never participate: they do not persist, so they cannot
/// affect schema identity. The digest is MD5 truncated to its first four
/// bytes, big-endian.
pub fn structural_checksum(elements: &[StreamerElement], mode: ChecksumMode) -> u32 {
    let mut hasher = Md5::new();
    for elem in elements {
        if elem.is_transient() {
            continue;
        }
        let is_base = matches!(
            elem.element_type(),
            crate::element::ElementType::Base { .. }
        );
        if is_base && mode == ChecksumMode::NoBaseClasses {
            continue;
        }
        match mode {
            ChecksumMode::NamesOnly => {
                hasher.update(elem.name().as_bytes());
                hasher.update(b"\n");
            }
            ChecksumMode::Current | ChecksumMode::NoBaseClasses => {
                hasher.update(elem.name().as_bytes());
                hasher.update(b":");
                hasher.update(elem.element_type().canonical().as_bytes());
                hasher.update(b"\n");
            }
        }
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// True when `declared` matches the element list under any checksum era.
pub fn matches_any_era(elements: &[StreamerElement], declared: u32) -> bool {
    CHECKSUM_ERAS
        .iter()
        .any(|mode| structural_checksum(elements, *mode) == declared)
}
