// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compiled actions and their executors.
//!
//! An action is one primitive read/write step bound to a target slot. Action
//! kinds form a closed sum matched by pattern dispatch, so adding a kind is a
//! compile-time exhaustiveness error everywhere it matters. Nested kinds
//! reference the nested class by registry key; sequences are therefore trees
//! flattened only per class level.

use crate::collections;
use crate::cursor::{ReadCursor, WriteCursor};
use crate::element::{CollectionKind, ElementType, PrimitiveKind};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::rules::{EvolutionRule, RuleKind, TransformInput};
use crate::value::{Instance, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::{read_nested_object, write_nested_object};

/// Collection payload layout markers.
const COLLECTION_OBJECT_WISE: u8 = 0;
const COLLECTION_MEMBER_WISE: u8 = 1;

// ---------------------------------------------------------------------------
// Action model
// ---------------------------------------------------------------------------

/// One compiled primitive step.
#[derive(Debug, Clone)]
pub enum ActionOp {
    /// Copy one primitive between the cursor and a slot.
    CopyPrimitive { kind: PrimitiveKind, offset: usize },
    /// Fused run of same-kind primitives in consecutive slots. Batching only;
    /// byte-identical to executing the run element by element.
    CopyPrimitiveRun {
        kind: PrimitiveKind,
        offset: usize,
        count: usize,
    },
    /// Fixed-length primitive array in one slot.
    CopyPrimitiveArray {
        kind: PrimitiveKind,
        offset: usize,
        len: usize,
    },
    /// Read an on-file primitive of `from`, store it converted to `to`.
    ConvertPrimitive {
        from: PrimitiveKind,
        to: PrimitiveKind,
        offset: usize,
    },
    CopyString { offset: usize },
    /// Nested object held by value.
    StreamObject { class: Arc<str>, offset: usize },
    /// Base class flattened into the owning instance at `offset`.
    StreamBase { class: Arc<str>, offset: usize },
    /// Nullable object pointer; null is a one-byte sentinel.
    StreamPointer { class: Arc<str>, offset: usize },
    /// Variable-size collection routed through the adapter capability.
    StreamCollection {
        kind: CollectionKind,
        item: ElementType,
        offset: usize,
        member_wise: bool,
    },
    /// Element present on file, absent in memory: consume its bytes.
    SkipElement { etype: ElementType },
    /// Element present on file, consumed by a rule callback instead of stored.
    CacheValue { name: String, etype: ElementType },
    /// Element absent on file: default-initialize its slot.
    ArtificialZero { offset: usize, etype: ElementType },
    /// Element absent on file: computed by an evolution rule callback.
    ArtificialRule { rule: Arc<EvolutionRule> },
}

/// An action bound to the element it was compiled from (`None` for
/// rule-synthesized steps).
#[derive(Debug, Clone)]
pub struct CompiledAction {
    pub op: ActionOp,
    pub elem: Option<usize>,
}

/// Ordered action list for one descriptor in one mode.
#[derive(Debug, Clone, Default)]
pub struct ActionSequence {
    pub actions: Vec<CompiledAction>,
}

impl ActionSequence {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Iteration order over (instances x actions).
///
/// Object-wise lays out each instance's elements contiguously; member-wise
/// lays out each element across all instances (collection storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    ObjectWise,
    MemberWise,
}

// ---------------------------------------------------------------------------
// Primitive helpers
// ---------------------------------------------------------------------------

pub(crate) fn read_primitive(cursor: &mut ReadCursor<'_>, kind: PrimitiveKind) -> Result<Value> {
    Ok(match kind {
        PrimitiveKind::Bool => Value::Bool(cursor.read_u8()? != 0),
        PrimitiveKind::I8 => Value::I8(cursor.read_i8()?),
        PrimitiveKind::U8 => Value::U8(cursor.read_u8()?),
        PrimitiveKind::I16 => Value::I16(cursor.read_i16()?),
        PrimitiveKind::U16 => Value::U16(cursor.read_u16()?),
        PrimitiveKind::I32 => Value::I32(cursor.read_i32()?),
        PrimitiveKind::U32 => Value::U32(cursor.read_u32()?),
        PrimitiveKind::I64 => Value::I64(cursor.read_i64()?),
        PrimitiveKind::U64 => Value::U64(cursor.read_u64()?),
        PrimitiveKind::F32 => Value::F32(cursor.read_f32()?),
        PrimitiveKind::F64 => Value::F64(cursor.read_f64()?),
    })
}

pub(crate) fn write_primitive(
    cursor: &mut WriteCursor,
    kind: PrimitiveKind,
    value: &Value,
) -> Result<()> {
    match (kind, value) {
        (PrimitiveKind::Bool, Value::Bool(v)) => cursor.write_u8(u8::from(*v)),
        (PrimitiveKind::I8, Value::I8(v)) => cursor.write_i8(*v),
        (PrimitiveKind::U8, Value::U8(v)) => cursor.write_u8(*v),
        (PrimitiveKind::I16, Value::I16(v)) => cursor.write_i16(*v),
        (PrimitiveKind::U16, Value::U16(v)) => cursor.write_u16(*v),
        (PrimitiveKind::I32, Value::I32(v)) => cursor.write_i32(*v),
        (PrimitiveKind::U32, Value::U32(v)) => cursor.write_u32(*v),
        (PrimitiveKind::I64, Value::I64(v)) => cursor.write_i64(*v),
        (PrimitiveKind::U64, Value::U64(v)) => cursor.write_u64(*v),
        (PrimitiveKind::F32, Value::F32(v)) => cursor.write_f32(*v),
        (PrimitiveKind::F64, Value::F64(v)) => cursor.write_f64(*v),
        // Unset slots stream as zero.
        (kind, Value::Null) => write_primitive(cursor, kind, &kind.zero())?,
        (kind, other) => {
            return Err(Error::TypeMismatch {
                expected: kind.name().to_string(),
                found: format!("{:?}", other),
            })
        }
    }
    Ok(())
}

/// Numeric conversion between primitive kinds (schema evolution type change).
pub(crate) fn convert_primitive(value: &Value, to: PrimitiveKind) -> Value {
    match to {
        PrimitiveKind::Bool => Value::Bool(value.to_i64_lossy().unwrap_or(0) != 0),
        PrimitiveKind::I8 => Value::I8(value.to_i64_lossy().unwrap_or(0) as i8),
        PrimitiveKind::U8 => Value::U8(value.to_i64_lossy().unwrap_or(0) as u8),
        PrimitiveKind::I16 => Value::I16(value.to_i64_lossy().unwrap_or(0) as i16),
        PrimitiveKind::U16 => Value::U16(value.to_i64_lossy().unwrap_or(0) as u16),
        PrimitiveKind::I32 => Value::I32(value.to_i64_lossy().unwrap_or(0) as i32),
        PrimitiveKind::U32 => Value::U32(value.to_i64_lossy().unwrap_or(0) as u32),
        PrimitiveKind::I64 => Value::I64(value.to_i64_lossy().unwrap_or(0)),
        PrimitiveKind::U64 => Value::U64(value.to_i64_lossy().unwrap_or(0) as u64),
        PrimitiveKind::F32 => Value::F32(value.to_f64_lossy().unwrap_or(0.0) as f32),
        PrimitiveKind::F64 => Value::F64(value.to_f64_lossy().unwrap_or(0.0)),
    }
}

fn slot_mut<'v>(inst: &'v mut Instance, index: usize) -> Result<&'v mut Value> {
    let count = inst.slot_count();
    inst.slot_mut(index).ok_or_else(|| Error::InvalidData {
        reason: format!("slot {} out of range ({} slots)", index, count),
    })
}

fn slot_ref<'v>(inst: &'v Instance, index: usize) -> Result<&'v Value> {
    inst.slot(index).ok_or_else(|| Error::InvalidData {
        reason: format!("slot {} out of range ({} slots)", index, inst.slot_count()),
    })
}

// ---------------------------------------------------------------------------
// Generic value decode/encode (item types, cached values)
// ---------------------------------------------------------------------------

/// Decode one value of `etype` from the cursor.
pub(crate) fn read_value(
    registry: &Registry,
    cursor: &mut ReadCursor<'_>,
    etype: &ElementType,
) -> Result<Value> {
    match etype {
        ElementType::Primitive(kind) => read_primitive(cursor, *kind),
        ElementType::PrimitiveArray { kind, len } => {
            let mut items = Vec::with_capacity(*len);
            for _ in 0..*len {
                items.push(read_primitive(cursor, *kind)?);
            }
            Ok(Value::Array(items))
        }
        ElementType::String => Ok(Value::String(cursor.read_str()?)),
        ElementType::Object { .. } => Ok(Value::Object(read_nested_object(registry, cursor)?)),
        ElementType::Pointer { .. } => {
            if cursor.read_u8()? == 0 {
                Ok(Value::Ptr(None))
            } else {
                Ok(Value::Ptr(Some(Box::new(read_nested_object(
                    registry, cursor,
                )?))))
            }
        }
        ElementType::Collection { kind, item } => {
            let mut slot = Value::Collection(Vec::new());
            read_collection_into(registry, cursor, *kind, item, &mut slot)?;
            Ok(slot)
        }
        ElementType::Base { .. } => Err(Error::InvalidData {
            reason: "base class is not a value type".into(),
        }),
    }
}

/// Encode one value of `etype` to the cursor.
pub(crate) fn write_value(
    registry: &Registry,
    cursor: &mut WriteCursor,
    etype: &ElementType,
    value: &Value,
) -> Result<()> {
    match etype {
        ElementType::Primitive(kind) => write_primitive(cursor, *kind, value),
        ElementType::PrimitiveArray { kind, len } => {
            let items = value.as_array().ok_or_else(|| Error::TypeMismatch {
                expected: etype.canonical(),
                found: format!("{:?}", value),
            })?;
            if items.len() != *len {
                return Err(Error::TypeMismatch {
                    expected: etype.canonical(),
                    found: format!("array of {}", items.len()),
                });
            }
            for item in items {
                write_primitive(cursor, *kind, item)?;
            }
            Ok(())
        }
        ElementType::String => match value {
            Value::String(s) => {
                cursor.write_str(s);
                Ok(())
            }
            Value::Null => {
                cursor.write_str("");
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                expected: "string".into(),
                found: format!("{:?}", other),
            }),
        },
        ElementType::Object { class } => match value {
            Value::Object(obj) => write_nested_object(registry, cursor, obj),
            // Unset object members stream as a default-constructed instance.
            Value::Null => {
                let info = registry.current_info(class)?;
                let obj = info.new_instance(registry);
                write_nested_object(registry, cursor, &obj)
            }
            other => Err(Error::TypeMismatch {
                expected: etype.canonical(),
                found: format!("{:?}", other),
            }),
        },
        ElementType::Pointer { .. } => match value {
            Value::Ptr(None) | Value::Null => {
                cursor.write_u8(0);
                Ok(())
            }
            Value::Ptr(Some(obj)) => {
                cursor.write_u8(1);
                write_nested_object(registry, cursor, obj)
            }
            other => Err(Error::TypeMismatch {
                expected: etype.canonical(),
                found: format!("{:?}", other),
            }),
        },
        ElementType::Collection { kind, item } => {
            static EMPTY: Vec<Value> = Vec::new();
            let items = match value {
                Value::Collection(v) => v,
                Value::Null => &EMPTY,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: etype.canonical(),
                        found: format!("{:?}", other),
                    })
                }
            };
            let member_wise = matches!(**item, ElementType::Object { .. });
            write_collection(registry, cursor, *kind, item, member_wise, items)
        }
        ElementType::Base { .. } => Err(Error::InvalidData {
            reason: "base class is not a value type".into(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

fn read_collection_into(
    registry: &Registry,
    cursor: &mut ReadCursor<'_>,
    kind: CollectionKind,
    item: &ElementType,
    slot: &mut Value,
) -> Result<()> {
    let count = cursor.read_u32()? as usize;
    let wire_mode = cursor.read_u8()?;

    if !matches!(slot, Value::Collection(_)) {
        *slot = Value::Collection(Vec::new());
    }

    match wire_mode {
        COLLECTION_OBJECT_WISE => {
            let Value::Collection(items) = slot else {
                unreachable!("slot normalized above")
            };
            let mut adapter = collections::adapt(kind, item, items);
            adapter.clear();
            for _ in 0..count {
                // Decode in place through the adapter so the same compiled
                // action serves any container the adapter fronts.
                let target = adapter.push_default();
                *target = read_value(registry, cursor, item)?;
            }
            Ok(())
        }
        COLLECTION_MEMBER_WISE => {
            // One version frame for the item class, then each member across
            // all items.
            let hdr = cursor.read_object_header()?;
            let info = registry.reading_info(&hdr.class, hdr.version)?;
            info.compile()?;
            let seqs = info.sequences().expect("compiled above");
            let mut staged: Vec<Instance> =
                (0..count).map(|_| info.new_instance(registry)).collect();
            run_read(
                &info,
                registry,
                cursor,
                &mut staged,
                &seqs.read_member,
                0,
                usize::MAX,
                0,
                IoMode::MemberWise,
            )?;
            cursor.finish_record(&hdr)?;

            let Value::Collection(items) = slot else {
                unreachable!("slot normalized above")
            };
            let mut adapter = collections::adapt(kind, item, items);
            adapter.clear();
            for obj in staged {
                *adapter.push_default() = Value::Object(obj);
            }
            Ok(())
        }
        other => Err(Error::InvalidData {
            reason: format!("unknown collection mode {}", other),
        }),
    }
}

fn write_collection(
    registry: &Registry,
    cursor: &mut WriteCursor,
    _kind: CollectionKind,
    item: &ElementType,
    member_wise: bool,
    items: &[Value],
) -> Result<()> {
    cursor.write_u32(items.len() as u32);

    if member_wise {
        let class = match item {
            ElementType::Object { class } => class,
            other => {
                return Err(Error::InvalidData {
                    reason: format!("member-wise storage needs object items, got {:?}", other),
                })
            }
        };
        cursor.write_u8(COLLECTION_MEMBER_WISE);
        let info = registry.current_info(class)?;
        info.compile()?;
        let seqs = info.sequences().expect("compiled above");
        cursor.write_version(class, info.version())?;
        let mark = cursor.begin_record();
        for action in &seqs.write_member.actions {
            for value in items {
                let obj = value.as_object().ok_or_else(|| Error::TypeMismatch {
                    expected: format!("obj:{}", class),
                    found: format!("{:?}", value),
                })?;
                apply_write(&action.op, &info, registry, cursor, obj, 0)?;
            }
        }
        cursor.end_record(mark)?;
    } else {
        cursor.write_u8(COLLECTION_OBJECT_WISE);
        for value in items {
            write_value(registry, cursor, item, value)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Skip
// ---------------------------------------------------------------------------

/// Consume the bytes of one on-file element with no in-memory counterpart.
/// The skip length derives from the on-file element's own type.
pub(crate) fn skip_element(cursor: &mut ReadCursor<'_>, etype: &ElementType) -> Result<()> {
    match etype {
        ElementType::Primitive(kind) => cursor.skip(kind.size()),
        ElementType::PrimitiveArray { kind, len } => cursor.skip(kind.size() * len),
        ElementType::String => {
            let len = cursor.read_u32()? as usize;
            cursor.skip(len)
        }
        ElementType::Object { .. } | ElementType::Base { .. } => {
            let hdr = cursor.read_object_header()?;
            cursor.skip_payload(&hdr)
        }
        ElementType::Pointer { .. } => {
            if cursor.read_u8()? != 0 {
                let hdr = cursor.read_object_header()?;
                cursor.skip_payload(&hdr)?;
            }
            Ok(())
        }
        ElementType::Collection { item, .. } => {
            let count = cursor.read_u32()? as usize;
            let wire_mode = cursor.read_u8()?;
            match wire_mode {
                COLLECTION_OBJECT_WISE => {
                    for _ in 0..count {
                        skip_element(cursor, item)?;
                    }
                    Ok(())
                }
                COLLECTION_MEMBER_WISE => {
                    let hdr = cursor.read_object_header()?;
                    cursor.skip_payload(&hdr)
                }
                other => Err(Error::InvalidData {
                    reason: format!("unknown collection mode {}", other),
                }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Execute a read action slice over `instances`, returning bytes consumed.
#[allow(clippy::too_many_arguments)]
pub fn run_read(
    info: &super::StreamerInfo,
    registry: &Registry,
    cursor: &mut ReadCursor<'_>,
    instances: &mut [Instance],
    seq: &ActionSequence,
    first: usize,
    last: usize,
    base: usize,
    mode: IoMode,
) -> Result<usize> {
    let start = cursor.offset();
    let end = last.min(seq.actions.len());
    let slice = &seq.actions[first.min(end)..end];

    match mode {
        IoMode::ObjectWise => {
            for inst in instances.iter_mut() {
                let mut scratch = HashMap::new();
                for action in slice {
                    apply_read(&action.op, info, registry, cursor, inst, base, &mut scratch)?;
                }
            }
        }
        IoMode::MemberWise => {
            let mut scratches: Vec<HashMap<String, Value>> =
                (0..instances.len()).map(|_| HashMap::new()).collect();
            for action in slice {
                for (i, inst) in instances.iter_mut().enumerate() {
                    apply_read(
                        &action.op,
                        info,
                        registry,
                        cursor,
                        inst,
                        base,
                        &mut scratches[i],
                    )?;
                }
            }
        }
    }
    Ok(cursor.offset() - start)
}

/// Execute a write action slice over `instances`, returning bytes produced.
#[allow(clippy::too_many_arguments)]
pub fn run_write(
    info: &super::StreamerInfo,
    registry: &Registry,
    cursor: &mut WriteCursor,
    instances: &[Instance],
    seq: &ActionSequence,
    first: usize,
    last: usize,
    base: usize,
    mode: IoMode,
) -> Result<usize> {
    let start = cursor.len();
    let end = last.min(seq.actions.len());
    let slice = &seq.actions[first.min(end)..end];

    match mode {
        IoMode::ObjectWise => {
            for inst in instances {
                for action in slice {
                    apply_write(&action.op, info, registry, cursor, inst, base)?;
                }
            }
        }
        IoMode::MemberWise => {
            for action in slice {
                for inst in instances {
                    apply_write(&action.op, info, registry, cursor, inst, base)?;
                }
            }
        }
    }
    Ok(cursor.len() - start)
}

fn apply_read(
    op: &ActionOp,
    info: &super::StreamerInfo,
    registry: &Registry,
    cursor: &mut ReadCursor<'_>,
    inst: &mut Instance,
    base: usize,
    scratch: &mut HashMap<String, Value>,
) -> Result<()> {
    match op {
        ActionOp::CopyPrimitive { kind, offset } => {
            let v = read_primitive(cursor, *kind)?;
            *slot_mut(inst, base + offset)? = v;
        }
        ActionOp::CopyPrimitiveRun {
            kind,
            offset,
            count,
        } => {
            for k in 0..*count {
                let v = read_primitive(cursor, *kind)?;
                *slot_mut(inst, base + offset + k)? = v;
            }
        }
        ActionOp::CopyPrimitiveArray { kind, offset, len } => {
            let mut items = Vec::with_capacity(*len);
            for _ in 0..*len {
                items.push(read_primitive(cursor, *kind)?);
            }
            *slot_mut(inst, base + offset)? = Value::Array(items);
        }
        ActionOp::ConvertPrimitive { from, to, offset } => {
            let raw = read_primitive(cursor, *from)?;
            *slot_mut(inst, base + offset)? = convert_primitive(&raw, *to);
        }
        ActionOp::CopyString { offset } => {
            let s = cursor.read_str()?;
            *slot_mut(inst, base + offset)? = Value::String(s);
        }
        ActionOp::StreamObject { offset, .. } => {
            let obj = read_nested_object(registry, cursor)?;
            *slot_mut(inst, base + offset)? = Value::Object(obj);
        }
        ActionOp::StreamBase { offset, .. } => {
            let hdr = cursor.read_object_header()?;
            let binfo = registry.reading_info(&hdr.class, hdr.version)?;
            binfo.compile()?;
            let seqs = binfo.sequences().expect("compiled above");
            run_read(
                &binfo,
                registry,
                cursor,
                std::slice::from_mut(inst),
                &seqs.read_object,
                0,
                usize::MAX,
                base + offset,
                IoMode::ObjectWise,
            )?;
            cursor.finish_record(&hdr)?;
        }
        ActionOp::StreamPointer { offset, .. } => {
            let v = if cursor.read_u8()? == 0 {
                // Null: the nested-object action is never invoked.
                Value::Ptr(None)
            } else {
                Value::Ptr(Some(Box::new(read_nested_object(registry, cursor)?)))
            };
            *slot_mut(inst, base + offset)? = v;
        }
        ActionOp::StreamCollection {
            kind, item, offset, ..
        } => {
            let slot = slot_mut(inst, base + offset)?;
            read_collection_into(registry, cursor, *kind, item, slot)?;
        }
        ActionOp::SkipElement { etype } => skip_element(cursor, etype)?,
        ActionOp::CacheValue { name, etype } => {
            let v = read_value(registry, cursor, etype)?;
            scratch.insert(name.clone(), v);
        }
        ActionOp::ArtificialZero { offset, etype } => {
            let v = match etype {
                ElementType::Object { class } => registry
                    .shaping_info(class)
                    .map(|oinfo| Value::Object(oinfo.new_instance(registry)))
                    .unwrap_or(Value::Null),
                other => other.default_value(),
            };
            *slot_mut(inst, base + offset)? = v;
        }
        ActionOp::ArtificialRule { rule } => {
            apply_rule(rule, info, inst, base, scratch);
        }
    }
    Ok(())
}

fn apply_rule(
    rule: &EvolutionRule,
    info: &super::StreamerInfo,
    inst: &mut Instance,
    base: usize,
    scratch: &mut HashMap<String, Value>,
) {
    let RuleKind::Transform { func, .. } = rule.kind() else {
        // Renames are resolved into offset mappings at adaptation time.
        return;
    };

    let mut values = scratch.clone();
    for source in rule.sources() {
        if values.contains_key(source) {
            continue;
        }
        if let Some(slot) = info.slot_of(source) {
            if let Some(v) = inst.slot(base + slot) {
                values.insert(source.to_string(), v.clone());
            }
        }
    }

    let input = TransformInput::new(&values);
    for (target, value) in func(&input) {
        match info.slot_of(&target) {
            Some(slot) => {
                inst.set_slot(base + slot, value);
            }
            None => log::warn!(
                "evolution rule target {}::{} has no slot in the current layout",
                info.class_name(),
                target
            ),
        }
    }
}

fn apply_write(
    op: &ActionOp,
    _info: &super::StreamerInfo,
    registry: &Registry,
    cursor: &mut WriteCursor,
    inst: &Instance,
    base: usize,
) -> Result<()> {
    match op {
        ActionOp::CopyPrimitive { kind, offset } => {
            write_primitive(cursor, *kind, slot_ref(inst, base + offset)?)?;
        }
        ActionOp::CopyPrimitiveRun {
            kind,
            offset,
            count,
        } => {
            for k in 0..*count {
                write_primitive(cursor, *kind, slot_ref(inst, base + offset + k)?)?;
            }
        }
        ActionOp::CopyPrimitiveArray { kind, offset, len } => {
            write_value(
                registry,
                cursor,
                &ElementType::PrimitiveArray {
                    kind: *kind,
                    len: *len,
                },
                slot_ref(inst, base + offset)?,
            )?;
        }
        ActionOp::CopyString { offset } => {
            write_value(
                registry,
                cursor,
                &ElementType::String,
                slot_ref(inst, base + offset)?,
            )?;
        }
        ActionOp::StreamObject { class, offset } => {
            write_value(
                registry,
                cursor,
                &ElementType::Object {
                    class: class.clone(),
                },
                slot_ref(inst, base + offset)?,
            )?;
        }
        ActionOp::StreamBase { class, offset } => {
            let binfo = registry.current_info(class)?;
            binfo.compile()?;
            let seqs = binfo.sequences().expect("compiled above");
            cursor.write_version(class, binfo.version())?;
            let mark = cursor.begin_record();
            run_write(
                &binfo,
                registry,
                cursor,
                std::slice::from_ref(inst),
                &seqs.write_object,
                0,
                usize::MAX,
                base + offset,
                IoMode::ObjectWise,
            )?;
            cursor.end_record(mark)?;
        }
        ActionOp::StreamPointer { class, offset } => {
            write_value(
                registry,
                cursor,
                &ElementType::Pointer {
                    class: class.clone(),
                },
                slot_ref(inst, base + offset)?,
            )?;
        }
        ActionOp::StreamCollection {
            kind,
            item,
            offset,
            member_wise,
        } => {
            static EMPTY: Vec<Value> = Vec::new();
            let items = match slot_ref(inst, base + offset)? {
                Value::Collection(v) => v,
                Value::Null => &EMPTY,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: format!("{}<{}>", kind.name(), item.canonical()),
                        found: format!("{:?}", other),
                    })
                }
            };
            write_collection(registry, cursor, *kind, item, *member_wise, items)?;
        }
        ActionOp::ConvertPrimitive { .. }
        | ActionOp::SkipElement { .. }
        | ActionOp::CacheValue { .. }
        | ActionOp::ArtificialZero { .. }
        | ActionOp::ArtificialRule { .. } => {
            // Evolution-only steps never enter write sequences.
            return Err(Error::InvalidData {
                reason: "evolution action in write sequence".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip_all_kinds() {
        let pairs: Vec<(PrimitiveKind, Value)> = vec![
            (PrimitiveKind::Bool, Value::Bool(true)),
            (PrimitiveKind::I8, Value::I8(-5)),
            (PrimitiveKind::U8, Value::U8(200)),
            (PrimitiveKind::I16, Value::I16(-1234)),
            (PrimitiveKind::U16, Value::U16(40000)),
            (PrimitiveKind::I32, Value::I32(-100000)),
            (PrimitiveKind::U32, Value::U32(3_000_000_000)),
            (PrimitiveKind::I64, Value::I64(-1 << 40)),
            (PrimitiveKind::U64, Value::U64(1 << 50)),
            (PrimitiveKind::F32, Value::F32(2.5)),
            (PrimitiveKind::F64, Value::F64(-0.125)),
        ];

        let mut w = WriteCursor::new();
        for (kind, v) in &pairs {
            write_primitive(&mut w, *kind, v).unwrap();
        }
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        for (kind, v) in &pairs {
            assert_eq!(&read_primitive(&mut r, *kind).unwrap(), v);
        }
        assert!(r.is_eof());
    }

    #[test]
    fn test_write_primitive_type_mismatch() {
        let mut w = WriteCursor::new();
        let err = write_primitive(&mut w, PrimitiveKind::I32, &Value::F64(1.0)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_null_slot_streams_as_zero() {
        let mut w = WriteCursor::new();
        write_primitive(&mut w, PrimitiveKind::I32, &Value::Null).unwrap();
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        assert_eq!(read_primitive(&mut r, PrimitiveKind::I32).unwrap(), Value::I32(0));
    }

    #[test]
    fn test_convert_primitive_widening() {
        assert_eq!(
            convert_primitive(&Value::I32(5), PrimitiveKind::F64),
            Value::F64(5.0)
        );
        assert_eq!(
            convert_primitive(&Value::I16(-3), PrimitiveKind::I64),
            Value::I64(-3)
        );
        assert_eq!(
            convert_primitive(&Value::F64(7.9), PrimitiveKind::I32),
            Value::I32(7)
        );
        assert_eq!(
            convert_primitive(&Value::U8(0), PrimitiveKind::Bool),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_skip_element_fixed_and_variable() {
        let mut w = WriteCursor::new();
        w.write_i32(42);
        w.write_str("skipped");
        w.write_u8(0xEE);
        let bytes = w.into_bytes();

        let mut r = ReadCursor::new(&bytes);
        skip_element(&mut r, &ElementType::Primitive(PrimitiveKind::I32)).unwrap();
        skip_element(&mut r, &ElementType::String).unwrap();
        assert_eq!(r.read_u8().unwrap(), 0xEE);
    }

    #[test]
    fn test_skip_null_pointer_is_one_byte() {
        let bytes = [0u8, 0x55];
        let mut r = ReadCursor::new(&bytes);
        skip_element(
            &mut r,
            &ElementType::Pointer {
                class: Arc::from("Track"),
            },
        )
        .unwrap();
        assert_eq!(r.read_u8().unwrap(), 0x55);
    }
}
