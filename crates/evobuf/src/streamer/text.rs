// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text (JSON) executors over compiled sequences.
//!
//! The text variants walk the same full (unfused) action lists as member-wise
//! streaming, but target JSON fields keyed by element name instead of buffer
//! bytes. Nested objects carry an `@class` field so polymorphic pointers
//! survive the round trip.

use crate::element::{ElementType, PrimitiveKind};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::value::{Instance, Value};

use serde_json::{json, Map, Value as Json};

use super::actions::{convert_primitive, ActionOp, ActionSequence};
use super::StreamerInfo;

fn op_offset(op: &ActionOp) -> Option<usize> {
    match op {
        ActionOp::CopyPrimitive { offset, .. }
        | ActionOp::CopyPrimitiveRun { offset, .. }
        | ActionOp::CopyPrimitiveArray { offset, .. }
        | ActionOp::ConvertPrimitive { offset, .. }
        | ActionOp::CopyString { offset }
        | ActionOp::StreamObject { offset, .. }
        | ActionOp::StreamBase { offset, .. }
        | ActionOp::StreamPointer { offset, .. }
        | ActionOp::StreamCollection { offset, .. }
        | ActionOp::ArtificialZero { offset, .. } => Some(*offset),
        ActionOp::SkipElement { .. }
        | ActionOp::CacheValue { .. }
        | ActionOp::ArtificialRule { .. } => None,
    }
}

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

pub(super) fn run_write_text(
    info: &StreamerInfo,
    registry: &Registry,
    inst: &Instance,
    seq: &ActionSequence,
) -> Result<Json> {
    object_to_json(info, registry, inst, 0, seq)
}

fn object_to_json(
    info: &StreamerInfo,
    registry: &Registry,
    inst: &Instance,
    base: usize,
    seq: &ActionSequence,
) -> Result<Json> {
    let mut map = Map::new();
    for action in &seq.actions {
        let Some(elem_index) = action.elem else {
            continue;
        };
        let elem = &info.elements()[elem_index];
        let Some(offset) = op_offset(&action.op) else {
            continue;
        };

        if let ActionOp::StreamBase { class, .. } = &action.op {
            let binfo = registry.current_info(class)?;
            binfo.compile()?;
            let bseqs = binfo.sequences().expect("compiled above");
            let nested = object_to_json(&binfo, registry, inst, base + offset, &bseqs.write_text)?;
            map.insert(elem.name().to_string(), nested);
            continue;
        }

        let value = inst.slot(base + offset).ok_or_else(|| Error::InvalidData {
            reason: format!("slot {} out of range", base + offset),
        })?;
        map.insert(elem.name().to_string(), value_to_json(registry, value)?);
    }
    Ok(Json::Object(map))
}

fn value_to_json(registry: &Registry, value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Bool(v) => json!(v),
        Value::I8(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::F32(v) => serde_json::Number::from_f64(f64::from(*v))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::F64(v) => serde_json::Number::from_f64(*v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => json!(s),
        Value::Array(items) | Value::Collection(items) => Json::Array(
            items
                .iter()
                .map(|item| value_to_json(registry, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(obj) => instance_to_json(registry, obj)?,
        Value::Ptr(None) | Value::Null => Json::Null,
        Value::Ptr(Some(obj)) => instance_to_json(registry, obj)?,
    })
}

fn instance_to_json(registry: &Registry, obj: &Instance) -> Result<Json> {
    let info = registry.current_info(obj.class())?;
    info.compile()?;
    let seqs = info.sequences().expect("compiled above");
    let mut json = object_to_json(&info, registry, obj, 0, &seqs.write_text)?;
    if let Json::Object(ref mut map) = json {
        map.insert("@class".to_string(), json!(obj.class().as_ref()));
    }
    Ok(json)
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

pub(super) fn run_read_text(
    info: &StreamerInfo,
    registry: &Registry,
    json: &Json,
    inst: &mut Instance,
    seq: &ActionSequence,
) -> Result<()> {
    json_into_object(info, registry, json, inst, 0, seq)
}

fn json_into_object(
    info: &StreamerInfo,
    registry: &Registry,
    json: &Json,
    inst: &mut Instance,
    base: usize,
    seq: &ActionSequence,
) -> Result<()> {
    let map = json.as_object().ok_or_else(|| Error::InvalidData {
        reason: "expected a JSON object".into(),
    })?;

    for action in &seq.actions {
        match &action.op {
            ActionOp::SkipElement { .. } | ActionOp::CacheValue { .. } => continue,
            ActionOp::ArtificialRule { .. } => {
                log::debug!("rule-computed members are not evaluated from text");
                continue;
            }
            ActionOp::ArtificialZero { offset, etype } => {
                inst.set_slot(base + offset, etype.default_value());
                continue;
            }
            ActionOp::StreamBase { class, offset } => {
                let Some(elem_index) = action.elem else {
                    continue;
                };
                let name = info.elements()[elem_index].name();
                let Some(nested) = map.get(name) else {
                    continue;
                };
                let binfo = registry.current_info(class)?;
                binfo.compile()?;
                let bseqs = binfo.sequences().expect("compiled above");
                json_into_object(&binfo, registry, nested, inst, base + offset, &bseqs.read_text)?;
                continue;
            }
            _ => {}
        }

        let Some(elem_index) = action.elem else {
            continue;
        };
        let elem = &info.elements()[elem_index];
        let Some(offset) = op_offset(&action.op) else {
            continue;
        };
        // Absent fields keep their defaults (text tolerates partial records).
        let Some(field) = map.get(elem.name()) else {
            continue;
        };
        let target_type = match (&action.op, elem.element_type()) {
            (ActionOp::ConvertPrimitive { to, .. }, _) => ElementType::Primitive(*to),
            (_, etype) => etype.clone(),
        };
        let value = json_to_value(registry, &target_type, field)?;
        inst.set_slot(base + offset, value);
    }
    Ok(())
}

fn json_to_value(registry: &Registry, etype: &ElementType, json: &Json) -> Result<Value> {
    match etype {
        ElementType::Primitive(kind) => json_to_primitive(*kind, json),
        ElementType::PrimitiveArray { kind, len } => {
            let items = json.as_array().ok_or_else(|| Error::InvalidData {
                reason: format!("expected array of {}", len),
            })?;
            if items.len() != *len {
                return Err(Error::InvalidData {
                    reason: format!("expected array of {}, found {}", len, items.len()),
                });
            }
            Ok(Value::Array(
                items
                    .iter()
                    .map(|item| json_to_primitive(*kind, item))
                    .collect::<Result<Vec<_>>>()?,
            ))
        }
        ElementType::String => Ok(Value::String(
            json.as_str()
                .ok_or_else(|| Error::InvalidData {
                    reason: "expected string".into(),
                })?
                .to_string(),
        )),
        ElementType::Object { class } => Ok(Value::Object(json_to_instance(registry, class, json)?)),
        ElementType::Pointer { class } => {
            if json.is_null() {
                Ok(Value::Ptr(None))
            } else {
                Ok(Value::Ptr(Some(Box::new(json_to_instance(
                    registry, class, json,
                )?))))
            }
        }
        ElementType::Collection { item, .. } => {
            let items = json.as_array().ok_or_else(|| Error::InvalidData {
                reason: "expected array".into(),
            })?;
            Ok(Value::Collection(
                items
                    .iter()
                    .map(|entry| json_to_value(registry, item, entry))
                    .collect::<Result<Vec<_>>>()?,
            ))
        }
        ElementType::Base { .. } => Err(Error::InvalidData {
            reason: "base class is not a value type".into(),
        }),
    }
}

fn json_to_instance(registry: &Registry, declared: &str, json: &Json) -> Result<Instance> {
    // `@class` overrides the declared class for polymorphic members.
    let class = json
        .get("@class")
        .and_then(Json::as_str)
        .unwrap_or(declared);
    let info = registry.current_info(class)?;
    info.compile()?;
    let seqs = info.sequences().expect("compiled above");
    let mut inst = info.new_instance(registry);
    json_into_object(&info, registry, json, &mut inst, 0, &seqs.read_text)?;
    Ok(inst)
}

fn json_to_primitive(kind: PrimitiveKind, json: &Json) -> Result<Value> {
    let raw = if let Some(b) = json.as_bool() {
        Value::Bool(b)
    } else if let Some(v) = json.as_i64() {
        Value::I64(v)
    } else if let Some(v) = json.as_u64() {
        Value::U64(v)
    } else if let Some(v) = json.as_f64() {
        Value::F64(v)
    } else {
        return Err(Error::InvalidData {
            reason: format!("expected {} value, found {}", kind.name(), json),
        });
    };
    Ok(convert_primitive(&raw, kind))
}
