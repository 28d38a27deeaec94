// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Action compiler.
//!
//! Walks a descriptor's element list and selects, per element, the cheapest
//! correct action. Contiguous runs of same-kind primitives fuse into one
//! batched action in the object-wise sequences; member-wise and text
//! sequences keep the full per-element list because fusing across elements
//! would interleave wrongly when iterating element-major.

use crate::element::ElementType;
use crate::error::Result;

use super::actions::{ActionOp, ActionSequence, CompiledAction};
use super::StreamerInfo;

/// The compiled sequence variants owned by one descriptor.
///
/// All variants are built before any of them is published; readers observing
/// the descriptor as compiled can use any variant lock-free.
#[derive(Debug)]
pub struct CompiledSequences {
    pub read_object: ActionSequence,
    pub write_object: ActionSequence,
    pub read_member: ActionSequence,
    pub write_member: ActionSequence,
    pub read_text: ActionSequence,
    pub write_text: ActionSequence,
}

pub(super) fn compile_info(info: &StreamerInfo) -> Result<CompiledSequences> {
    let mut read_full: Vec<CompiledAction> = Vec::new();
    let mut write_full: Vec<CompiledAction> = Vec::new();

    for (index, elem) in info.elements().iter().enumerate() {
        if elem.is_transient() {
            continue;
        }
        if elem.is_cached() {
            read_full.push(CompiledAction {
                op: ActionOp::CacheValue {
                    name: elem.name().to_string(),
                    etype: elem.element_type().clone(),
                },
                elem: Some(index),
            });
            continue;
        }
        let Some(offset) = elem.offset() else {
            // On file but absent in memory: consume the bytes.
            read_full.push(CompiledAction {
                op: ActionOp::SkipElement {
                    etype: elem.element_type().clone(),
                },
                elem: Some(index),
            });
            continue;
        };

        let (read_op, write_op) = match elem.element_type() {
            ElementType::Primitive(kind) => match elem.new_kind() {
                Some(to) if to != *kind => (
                    ActionOp::ConvertPrimitive {
                        from: *kind,
                        to,
                        offset,
                    },
                    None,
                ),
                _ => (
                    ActionOp::CopyPrimitive {
                        kind: *kind,
                        offset,
                    },
                    Some(ActionOp::CopyPrimitive {
                        kind: *kind,
                        offset,
                    }),
                ),
            },
            ElementType::PrimitiveArray { kind, len } => {
                let op = ActionOp::CopyPrimitiveArray {
                    kind: *kind,
                    offset,
                    len: *len,
                };
                (op.clone(), Some(op))
            }
            ElementType::String => {
                let op = ActionOp::CopyString { offset };
                (op.clone(), Some(op))
            }
            ElementType::Object { class } => {
                let op = ActionOp::StreamObject {
                    class: class.clone(),
                    offset,
                };
                (op.clone(), Some(op))
            }
            ElementType::Base { class } => {
                let op = ActionOp::StreamBase {
                    class: class.clone(),
                    offset,
                };
                (op.clone(), Some(op))
            }
            ElementType::Pointer { class } => {
                let op = ActionOp::StreamPointer {
                    class: class.clone(),
                    offset,
                };
                (op.clone(), Some(op))
            }
            ElementType::Collection { kind, item } => {
                let op = ActionOp::StreamCollection {
                    kind: *kind,
                    item: (**item).clone(),
                    offset,
                    member_wise: matches!(**item, ElementType::Object { .. }),
                };
                (op.clone(), Some(op))
            }
        };

        read_full.push(CompiledAction {
            op: read_op,
            elem: Some(index),
        });
        if let Some(op) = write_op {
            write_full.push(CompiledAction {
                op,
                elem: Some(index),
            });
        }
    }

    // Elements absent on file come last: zero-init first, then rule-computed
    // members that may read the freshly decoded values.
    for (offset, etype) in info.artificial_zero() {
        read_full.push(CompiledAction {
            op: ActionOp::ArtificialZero {
                offset: *offset,
                etype: etype.clone(),
            },
            elem: None,
        });
    }
    for rule in info.artificial_rules() {
        read_full.push(CompiledAction {
            op: ActionOp::ArtificialRule { rule: rule.clone() },
            elem: None,
        });
    }

    Ok(CompiledSequences {
        read_object: ActionSequence {
            actions: fuse(&read_full),
        },
        write_object: ActionSequence {
            actions: fuse(&write_full),
        },
        read_member: ActionSequence {
            actions: read_full.clone(),
        },
        write_member: ActionSequence {
            actions: write_full.clone(),
        },
        read_text: ActionSequence { actions: read_full },
        write_text: ActionSequence {
            actions: write_full,
        },
    })
}

/// Fuse contiguous same-kind primitive copies into batched runs.
///
/// Pure optimization: a fused sequence produces byte-identical output to the
/// per-element one.
fn fuse(actions: &[CompiledAction]) -> Vec<CompiledAction> {
    let mut fused: Vec<CompiledAction> = Vec::with_capacity(actions.len());
    for action in actions {
        if let ActionOp::CopyPrimitive { kind, offset } = &action.op {
            if let Some(prev) = fused.last_mut() {
                let merged = match &prev.op {
                    ActionOp::CopyPrimitive {
                        kind: pkind,
                        offset: poffset,
                    } if pkind == kind && poffset + 1 == *offset => {
                        Some(ActionOp::CopyPrimitiveRun {
                            kind: *kind,
                            offset: *poffset,
                            count: 2,
                        })
                    }
                    ActionOp::CopyPrimitiveRun {
                        kind: pkind,
                        offset: poffset,
                        count,
                    } if pkind == kind && poffset + count == *offset => {
                        Some(ActionOp::CopyPrimitiveRun {
                            kind: *kind,
                            offset: *poffset,
                            count: count + 1,
                        })
                    }
                    _ => None,
                };
                if let Some(op) = merged {
                    prev.op = op;
                    continue;
                }
            }
        }
        fused.push(action.clone());
    }
    fused
}
