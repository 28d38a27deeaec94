// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory class layouts.
//!
//! A [`ClassLayout`] is the explicit type-description capability that replaces
//! runtime reflection: each serializable class registers one layout per
//! version (via code generation, macros, or direct builder calls), and the
//! engine derives descriptors and slot assignments from it.

use crate::element::{CollectionKind, ElementType, PrimitiveKind};
use std::sync::Arc;

/// One declared data member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberLayout {
    pub name: String,
    pub etype: ElementType,
    /// Transient members occupy a slot but never persist.
    pub transient: bool,
}

/// Declared layout of one class at one schema version.
///
/// Member order is declaration order and is significant: it fixes both the
/// wire order and the slot assignment of the built descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLayout {
    name: Arc<str>,
    version: i32,
    members: Vec<MemberLayout>,
}

impl ClassLayout {
    pub fn builder(name: impl Into<String>, version: i32) -> ClassLayoutBuilder {
        ClassLayoutBuilder {
            name: Arc::from(name.into()),
            version,
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn members(&self) -> &[MemberLayout] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&MemberLayout> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

/// Fluent builder for [`ClassLayout`].
#[derive(Debug)]
pub struct ClassLayoutBuilder {
    name: Arc<str>,
    version: i32,
    members: Vec<MemberLayout>,
}

impl ClassLayoutBuilder {
    fn push(mut self, name: impl Into<String>, etype: ElementType, transient: bool) -> Self {
        self.members.push(MemberLayout {
            name: name.into(),
            etype,
            transient,
        });
        self
    }

    /// Add a primitive member.
    pub fn field(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.push(name, ElementType::Primitive(kind), false)
    }

    /// Add a fixed-length primitive array member.
    pub fn array_field(self, name: impl Into<String>, kind: PrimitiveKind, len: usize) -> Self {
        self.push(name, ElementType::PrimitiveArray { kind, len }, false)
    }

    /// Add a string member.
    pub fn string_field(self, name: impl Into<String>) -> Self {
        self.push(name, ElementType::String, false)
    }

    /// Add a nested object member held by value.
    pub fn object_field(self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.push(
            name,
            ElementType::Object {
                class: Arc::from(class.into()),
            },
            false,
        )
    }

    /// Add a nullable object pointer member.
    pub fn pointer_field(self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.push(
            name,
            ElementType::Pointer {
                class: Arc::from(class.into()),
            },
            false,
        )
    }

    /// Add a sequence member of primitive items.
    pub fn sequence_field(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.collection_field(
            name,
            CollectionKind::Sequence,
            ElementType::Primitive(kind),
        )
    }

    /// Add a sequence member of nested objects.
    pub fn object_sequence_field(
        self,
        name: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        self.collection_field(
            name,
            CollectionKind::Sequence,
            ElementType::Object {
                class: Arc::from(class.into()),
            },
        )
    }

    /// Add a sequence member of nullable object pointers.
    pub fn pointer_sequence_field(
        self,
        name: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        self.collection_field(
            name,
            CollectionKind::PtrSequence,
            ElementType::Pointer {
                class: Arc::from(class.into()),
            },
        )
    }

    /// Add an associative member streamed as key/value pair objects of a
    /// registered pair class.
    pub fn assoc_field(self, name: impl Into<String>, pair_class: impl Into<String>) -> Self {
        self.collection_field(
            name,
            CollectionKind::Associative,
            ElementType::Object {
                class: Arc::from(pair_class.into()),
            },
        )
    }

    /// Add a collection member with an explicit kind and item type.
    pub fn collection_field(
        self,
        name: impl Into<String>,
        kind: CollectionKind,
        item: ElementType,
    ) -> Self {
        self.push(
            name,
            ElementType::Collection {
                kind,
                item: Box::new(item),
            },
            false,
        )
    }

    /// Add a base class whose members flatten into this class's slots.
    pub fn base(self, class: impl Into<String>) -> Self {
        let class: Arc<str> = Arc::from(class.into());
        let name = format!("@base:{}", class);
        self.push(name, ElementType::Base { class }, false)
    }

    /// Add a transient member: it occupies a slot but never persists.
    pub fn transient_field(self, name: impl Into<String>, etype: ElementType) -> Self {
        self.push(name, etype, true)
    }

    pub fn build(self) -> ClassLayout {
        ClassLayout {
            name: self.name,
            version: self.version,
            members: self.members,
        }
    }
}
