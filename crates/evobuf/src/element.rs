// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element descriptors: per-member binary layout metadata.
//!
//! A [`StreamerElement`] is a read-only view over one data member once its
//! owning class descriptor has been built. The only post-build mutation is
//! [`StreamerElement::update`], which refreshes the cached nested-descriptor
//! linkage after the nested class itself has been rebuilt.

use crate::cursor::{ReadCursor, WriteCursor};
use crate::error::{Error, Result};
use crate::value::Value;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// PrimitiveKind
// ---------------------------------------------------------------------------

/// Fixed-size primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl PrimitiveKind {
    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Canonical name used in checksums and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::I8 => 1,
            Self::U8 => 2,
            Self::I16 => 3,
            Self::U16 => 4,
            Self::I32 => 5,
            Self::U32 => 6,
            Self::I64 => 7,
            Self::U64 => 8,
            Self::F32 => 9,
            Self::F64 => 10,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Bool,
            1 => Self::I8,
            2 => Self::U8,
            3 => Self::I16,
            4 => Self::U16,
            5 => Self::I32,
            6 => Self::U32,
            7 => Self::I64,
            8 => Self::U64,
            9 => Self::F32,
            10 => Self::F64,
            other => {
                return Err(Error::InvalidData {
                    reason: format!("unknown primitive code {}", other),
                })
            }
        })
    }

    /// Zero value of this kind.
    pub fn zero(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::I8 => Value::I8(0),
            Self::U8 => Value::U8(0),
            Self::I16 => Value::I16(0),
            Self::U16 => Value::U16(0),
            Self::I32 => Value::I32(0),
            Self::U32 => Value::U32(0),
            Self::I64 => Value::I64(0),
            Self::U64 => Value::U64(0),
            Self::F32 => Value::F32(0.0),
            Self::F64 => Value::F64(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// CollectionKind
// ---------------------------------------------------------------------------

/// Variable-size collection families routed through the adapter capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Plain sequence of values or nested objects.
    Sequence,
    /// Associative container streamed as a sequence of key/value pair objects.
    Associative,
    /// Sequence of nullable object pointers.
    PtrSequence,
}

impl CollectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sequence => "seq",
            Self::Associative => "assoc",
            Self::PtrSequence => "ptrseq",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::Sequence => 0,
            Self::Associative => 1,
            Self::PtrSequence => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Sequence,
            1 => Self::Associative,
            2 => Self::PtrSequence,
            other => {
                return Err(Error::InvalidData {
                    reason: format!("unknown collection code {}", other),
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// ElementType
// ---------------------------------------------------------------------------

/// Semantic type tag of one element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    Primitive(PrimitiveKind),
    /// Fixed-length array of primitives.
    PrimitiveArray { kind: PrimitiveKind, len: usize },
    String,
    /// Nested object held by value; `class` is a registry key, never a pointer.
    Object { class: Arc<str> },
    /// Nullable pointer to an object; null streams as a one-byte sentinel.
    Pointer { class: Arc<str> },
    /// Variable-size collection of `item` values.
    Collection {
        kind: CollectionKind,
        item: Box<ElementType>,
    },
    /// Base class whose members flatten into the owning instance's slots.
    Base { class: Arc<str> },
}

// Descriptor wire tags (descriptor self-streaming).
const TAG_PRIMITIVE: u8 = 0;
const TAG_ARRAY: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_OBJECT: u8 = 3;
const TAG_POINTER: u8 = 4;
const TAG_COLLECTION: u8 = 5;
const TAG_BASE: u8 = 6;

impl ElementType {
    /// Registry key of the nested class, if this element has one.
    pub fn nested_class(&self) -> Option<&Arc<str>> {
        match self {
            Self::Object { class } | Self::Pointer { class } | Self::Base { class } => Some(class),
            Self::Collection { item, .. } => item.nested_class(),
            _ => None,
        }
    }

    /// Byte size of the fixed-size encoding, `None` for variable-size types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Primitive(kind) => Some(kind.size()),
            Self::PrimitiveArray { kind, len } => Some(kind.size() * len),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    /// Canonical type string fed into structural checksums.
    pub fn canonical(&self) -> String {
        match self {
            Self::Primitive(kind) => kind.name().to_string(),
            Self::PrimitiveArray { kind, len } => format!("{}[{}]", kind.name(), len),
            Self::String => "string".to_string(),
            Self::Object { class } => format!("obj:{}", class),
            Self::Pointer { class } => format!("ptr:{}", class),
            Self::Collection { kind, item } => format!("{}<{}>", kind.name(), item.canonical()),
            Self::Base { class } => format!("base:{}", class),
        }
    }

    /// Default value for a slot of this type.
    ///
    /// Nested objects default to `Null`; they are materialized through the
    /// registry when a shaped instance is required.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Primitive(kind) => kind.zero(),
            Self::PrimitiveArray { kind, len } => Value::Array(vec![kind.zero(); *len]),
            Self::String => Value::String(String::new()),
            Self::Object { .. } | Self::Base { .. } => Value::Null,
            Self::Pointer { .. } => Value::Ptr(None),
            Self::Collection { .. } => Value::Collection(Vec::new()),
        }
    }

    pub(crate) fn write_to(&self, w: &mut WriteCursor) {
        match self {
            Self::Primitive(kind) => {
                w.write_u8(TAG_PRIMITIVE);
                w.write_u8(kind.code());
            }
            Self::PrimitiveArray { kind, len } => {
                w.write_u8(TAG_ARRAY);
                w.write_u8(kind.code());
                w.write_u32(*len as u32);
            }
            Self::String => w.write_u8(TAG_STRING),
            Self::Object { class } => {
                w.write_u8(TAG_OBJECT);
                w.write_str(class);
            }
            Self::Pointer { class } => {
                w.write_u8(TAG_POINTER);
                w.write_str(class);
            }
            Self::Collection { kind, item } => {
                w.write_u8(TAG_COLLECTION);
                w.write_u8(kind.code());
                item.write_to(w);
            }
            Self::Base { class } => {
                w.write_u8(TAG_BASE);
                w.write_str(class);
            }
        }
    }

    pub(crate) fn read_from(r: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(match r.read_u8()? {
            TAG_PRIMITIVE => Self::Primitive(PrimitiveKind::from_code(r.read_u8()?)?),
            TAG_ARRAY => Self::PrimitiveArray {
                kind: PrimitiveKind::from_code(r.read_u8()?)?,
                len: r.read_u32()? as usize,
            },
            TAG_STRING => Self::String,
            TAG_OBJECT => Self::Object {
                class: Arc::from(r.read_str()?),
            },
            TAG_POINTER => Self::Pointer {
                class: Arc::from(r.read_str()?),
            },
            TAG_COLLECTION => Self::Collection {
                kind: CollectionKind::from_code(r.read_u8()?)?,
                item: Box::new(Self::read_from(r)?),
            },
            TAG_BASE => Self::Base {
                class: Arc::from(r.read_str()?),
            },
            other => {
                return Err(Error::InvalidData {
                    reason: format!("unknown element tag {}", other),
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// StreamerElement
// ---------------------------------------------------------------------------

/// Metadata of one serializable data member at one schema version.
///
/// Offsets are slot indexes into the owning class's in-memory layout and are
/// stable only within one version of that class; they are recomputed whenever
/// the layout changes.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerElement {
    name: String,
    etype: ElementType,
    /// Target slot; `None` when the element has no in-memory counterpart
    /// (its bytes are skipped or cached during evolved reads).
    offset: Option<usize>,
    transient: bool,
    /// In-memory primitive kind when it differs from the on-file kind
    /// (installed by evolution; drives the conversion action).
    new_kind: Option<PrimitiveKind>,
    /// Decoded on-file value is cached for rule callbacks instead of stored.
    cache: bool,
    /// Cached version of the nested class descriptor, refreshed by `update`.
    nested_version: Option<i32>,
}

impl StreamerElement {
    pub fn new(name: impl Into<String>, etype: ElementType) -> Self {
        Self {
            name: name.into(),
            etype,
            offset: None,
            transient: false,
            new_kind: None,
            cache: false,
            nested_version: None,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub(crate) fn with_new_kind(mut self, kind: PrimitiveKind) -> Self {
        self.new_kind = Some(kind);
        self
    }

    pub(crate) fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    pub(crate) fn cleared_offset(mut self) -> Self {
        self.offset = None;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> &ElementType {
        &self.etype
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn new_kind(&self) -> Option<PrimitiveKind> {
        self.new_kind
    }

    pub(crate) fn is_cached(&self) -> bool {
        self.cache
    }

    pub fn nested_version(&self) -> Option<i32> {
        self.nested_version
    }

    /// Refresh the cached nested-descriptor linkage after `class` was rebuilt
    /// at `version`. Never touches offset or type semantics.
    pub fn update(&mut self, class: &str, version: i32) {
        if self
            .etype
            .nested_class()
            .map(|c| c.as_ref() == class)
            .unwrap_or(false)
        {
            self.nested_version = Some(version);
        }
    }

    pub(crate) fn write_to(&self, w: &mut WriteCursor) {
        w.write_str(&self.name);
        self.etype.write_to(w);
        w.write_u8(u8::from(self.transient));
    }

    pub(crate) fn read_from(r: &mut ReadCursor<'_>) -> Result<Self> {
        let name = r.read_str()?;
        let etype = ElementType::read_from(r)?;
        let transient = r.read_u8()? != 0;
        let mut elem = StreamerElement::new(name, etype);
        if transient {
            elem = elem.transient();
        }
        Ok(elem)
    }
}
