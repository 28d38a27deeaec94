// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collection adapter capability.
//!
//! Compiled collection actions never touch a concrete container type: they go
//! through this capability, so one compiled action works across container
//! implementations that only differ by the adapter selected at compile time.

use crate::element::{CollectionKind, ElementType};
use crate::value::Value;

/// Uniform surface over a collection's storage.
pub trait CollectionAdapter {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn at(&self, index: usize) -> Option<&Value>;

    fn at_mut(&mut self, index: usize) -> Option<&mut Value>;

    /// Append a default-initialized item and return it for in-place decode.
    fn push_default(&mut self) -> &mut Value;

    fn clear(&mut self);
}

/// Adapter over plain value/object sequences (and associative pair streams).
pub struct SequenceAdapter<'a> {
    items: &'a mut Vec<Value>,
    proto: ElementType,
}

impl<'a> SequenceAdapter<'a> {
    pub fn new(items: &'a mut Vec<Value>, item_type: &ElementType) -> Self {
        Self {
            items,
            proto: item_type.clone(),
        }
    }
}

impl CollectionAdapter for SequenceAdapter<'_> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn at(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    fn at_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.items.get_mut(index)
    }

    fn push_default(&mut self) -> &mut Value {
        self.items.push(self.proto.default_value());
        self.items.last_mut().expect("just pushed")
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Adapter over sequences of nullable object pointers.
pub struct PtrSequenceAdapter<'a> {
    items: &'a mut Vec<Value>,
}

impl<'a> PtrSequenceAdapter<'a> {
    pub fn new(items: &'a mut Vec<Value>) -> Self {
        Self { items }
    }
}

impl CollectionAdapter for PtrSequenceAdapter<'_> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn at(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    fn at_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.items.get_mut(index)
    }

    fn push_default(&mut self) -> &mut Value {
        self.items.push(Value::Ptr(None));
        self.items.last_mut().expect("just pushed")
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Select the adapter for a collection kind over the stock `Vec` storage.
pub fn adapt<'a>(
    kind: CollectionKind,
    item_type: &ElementType,
    items: &'a mut Vec<Value>,
) -> Box<dyn CollectionAdapter + 'a> {
    match kind {
        CollectionKind::Sequence | CollectionKind::Associative => {
            Box::new(SequenceAdapter::new(items, item_type))
        }
        CollectionKind::PtrSequence => Box::new(PtrSequenceAdapter::new(items)),
    }
}
