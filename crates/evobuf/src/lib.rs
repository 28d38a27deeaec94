// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # evobuf - Schema-evolving binary object serialization
//!
//! A pure Rust engine that converts class instances to and from a versioned,
//! self-describing binary representation. Old data stays readable with new
//! class definitions and vice versa: descriptors travel with the bytes,
//! version/byte-count framing makes unknown records skippable, and evolution
//! rules map removed or renamed members onto current layouts without any
//! recompilation.
//!
//! ## Quick Start
//!
//! ```rust
//! use evobuf::{ClassLayout, PrimitiveKind, Registry, ReadCursor, WriteCursor};
//! use evobuf::{read_object, write_object, Value};
//!
//! let registry = Registry::default();
//! registry.register_layout(
//!     ClassLayout::builder("Event", 1)
//!         .field("a", PrimitiveKind::I32)
//!         .field("b", PrimitiveKind::F32)
//!         .sequence_field("c", PrimitiveKind::I32)
//!         .build(),
//! );
//!
//! let info = registry.current_info("Event").unwrap();
//! let mut event = info.new_instance(&registry);
//! event.set_slot(0, Value::I32(5));
//! event.set_slot(1, Value::F32(2.5));
//! event.set_slot(2, Value::Collection(vec![1i32.into(), 2i32.into(), 3i32.into()]));
//!
//! let mut w = WriteCursor::new();
//! write_object(&registry, &mut w, &event).unwrap();
//! let bytes = w.into_bytes();
//!
//! let mut r = ReadCursor::new(&bytes);
//! let back = read_object(&registry, &mut r).unwrap();
//! assert_eq!(back.slot(0).and_then(Value::as_i32), Some(5));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Object I/O Layer                            |
//! |     write_object / read_object / read_batch / text variants        |
//! +--------------------------------------------------------------------+
//! |                      Descriptor Layer                              |
//! |  StreamerInfo (build/build_check/build_for/compile) | Registry     |
//! +--------------------------------------------------------------------+
//! |                      Action Layer                                  |
//! |  compiled sequences | collection adapters | evolution rules        |
//! +--------------------------------------------------------------------+
//! |                      Cursor Layer                                  |
//! |  big-endian framing | version headers | name table | compression   |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Registry`] | Process-wide concurrent store of layouts and descriptors |
//! | [`ClassLayout`] | Explicit in-memory layout registration (no reflection) |
//! | [`StreamerInfo`] | Versioned schema descriptor with compiled actions |
//! | [`Instance`] / [`Value`] | Slot-addressed dynamic object model |
//! | [`WriteCursor`] / [`ReadCursor`] | Framed big-endian buffer cursors |
//! | [`EvolutionRule`] | Rename/transform mapping across schema versions |
//!
//! ## Schema evolution at a glance
//!
//! - Removed member: its on-file bytes compile to a skip action.
//! - Added member: zero-initialized, or computed by a registered rule from
//!   the decoded old-layout values.
//! - Type change: primitive conversions compile to a convert action.
//! - Unknown newer version: the whole record is byte-skipped and surfaced as
//!   a per-record diagnostic, never a poisoned batch.

/// Structural checksums over element lists (multi-era).
pub mod checksum;
/// Collection adapter capability and stock adapters.
pub mod collections;
/// Whole-buffer compression helpers.
pub mod compress;
/// Read/write cursors with versioned record framing.
pub mod cursor;
/// Element descriptors: per-member layout metadata.
pub mod element;
/// Error taxonomy.
pub mod error;
/// In-memory class layouts (type-description capability).
pub mod layout;
/// Process-wide descriptor registry.
pub mod registry;
/// Schema evolution rules.
pub mod rules;
/// Class descriptors, compiled actions, object I/O.
pub mod streamer;
/// Dynamic value and instance model.
pub mod value;

pub use checksum::{structural_checksum, ChecksumMode, CHECKSUM_ERAS};
pub use collections::{adapt, CollectionAdapter, PtrSequenceAdapter, SequenceAdapter};
pub use compress::{compress_buffer, decompress_buffer};
pub use cursor::{ObjectHeader, ReadCursor, RecordMark, WriteCursor};
pub use element::{CollectionKind, ElementType, PrimitiveKind, StreamerElement};
pub use error::{Error, Result};
pub use layout::{ClassLayout, ClassLayoutBuilder, MemberLayout};
pub use registry::{ConflictPolicy, Registry};
pub use rules::{EvolutionRule, RuleKind, RuleSet, TransformFn, TransformInput};
pub use streamer::{
    read_batch, read_object, write_object, ActionOp, ActionSequence, BatchOutcome,
    CompiledAction, CompiledSequences, IoMode, StreamerInfo,
};
pub use value::{Instance, Value};

/// evobuf version string.
pub const VERSION: &str = "0.4.1";
