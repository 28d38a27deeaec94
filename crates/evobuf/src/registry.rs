// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide descriptor registry.
//!
//! Shared mutable state of the engine: canonical descriptors keyed by
//! (class, version) and by (class, checksum), registered in-memory layouts,
//! and evolution rule sets. Lookups are lock-free concurrent reads; insertion
//! goes through the sharded maps' entry API so that two threads building the
//! same descriptor converge on one canonical instance instead of racing to
//! register duplicates. Entries are never evicted before teardown, so action
//! sequences can hold registry keys without lifetime hazards.

use crate::error::{Error, Result};
use crate::layout::ClassLayout;
use crate::rules::{EvolutionRule, RuleSet};
use crate::streamer::StreamerInfo;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};

// ---------------------------------------------------------------------------
// ConflictPolicy
// ---------------------------------------------------------------------------

/// What to do when two sources declare the same (class, version) with
/// different checksums: legitimate schema drift vs. corruption cannot be told
/// apart, so the policy is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Reject the newcomer with a checksum mismatch.
    StrictFail,
    /// Keep both, keyed by checksum; version lookups keep the first comer.
    #[default]
    CoexistByChecksum,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Concurrent store of layouts, descriptors and evolution rules.
pub struct Registry {
    policy: ConflictPolicy,
    /// Registered in-memory layouts, one per class.
    layouts: DashMap<Arc<str>, Arc<ClassLayout>>,
    /// Canonical descriptor per (class, version); first registration wins.
    infos: DashMap<(Arc<str>, i32), Arc<StreamerInfo>>,
    /// Every distinct descriptor keyed by (class, checksum).
    variants: DashMap<(Arc<str>, u32), Arc<StreamerInfo>>,
    /// Layout-built descriptor per class (the one used for writing).
    current: DashMap<Arc<str>, Arc<StreamerInfo>>,
    /// `build_for` results per (class, on-file version), against `current`.
    adapted: DashMap<(Arc<str>, i32), Arc<StreamerInfo>>,
    /// Evolution rules per class.
    rules: DashMap<Arc<str>, RuleSet>,
}

impl Registry {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            layouts: DashMap::new(),
            infos: DashMap::new(),
            variants: DashMap::new(),
            current: DashMap::new(),
            adapted: DashMap::new(),
            rules: DashMap::new(),
        }
    }

    /// The process-wide registry (default policy).
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| Registry::new(ConflictPolicy::default()))
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    // -- layouts ------------------------------------------------------------

    /// Register (or replace) the in-memory layout of a class.
    ///
    /// Invalidates the cached layout-built descriptor and every adaptation
    /// targeting it; a structural change yields a fresh descriptor at the new
    /// version rather than mutating a published one.
    pub fn register_layout(&self, layout: ClassLayout) {
        let name = layout.name().clone();
        self.layouts.insert(name.clone(), Arc::new(layout));
        self.current.remove(&name);
        self.adapted.retain(|(class, _), _| class != &name);
    }

    pub fn resolve_layout(&self, name: &str) -> Option<Arc<ClassLayout>> {
        self.layouts.get(name).map(|entry| entry.value().clone())
    }

    // -- descriptors --------------------------------------------------------

    /// The descriptor matching the registered layout of `name`, built and
    /// registered on first use.
    pub fn current_info(&self, name: &str) -> Result<Arc<StreamerInfo>> {
        if let Some(entry) = self.current.get(name) {
            return Ok(entry.value().clone());
        }
        let layout = self.resolve_layout(name).ok_or_else(|| Error::DescriptorBuild {
            class: name.to_string(),
            member: "*".to_string(),
            reason: "no layout registered".to_string(),
        })?;

        let built = StreamerInfo::build(&layout, self, false)?;
        let checksum = built.checksum_value();
        let version = built.version();
        let class = layout.name().clone();

        // Policy check before anything is published: rejected descriptors
        // must not leak into the maps.
        if let Some(occupant) = self.lookup(&class, version) {
            if occupant.checksum_value() != checksum {
                match self.policy {
                    ConflictPolicy::StrictFail => {
                        return Err(Error::ChecksumMismatch {
                            class: name.to_string(),
                            version,
                            declared: occupant.checksum_value(),
                            computed: checksum,
                        });
                    }
                    ConflictPolicy::CoexistByChecksum => {
                        log::warn!(
                            "{} v{} already registered with checksum {:#010x}; \
                             layout-built {:#010x} coexists keyed by checksum",
                            name,
                            version,
                            occupant.checksum_value(),
                            checksum
                        );
                    }
                }
            }
        }

        // Canonical convergence: whichever thread inserts first wins and
        // every later builder adopts its instance.
        let canonical = match self.variants.entry((class.clone(), checksum)) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let arc = Arc::new(built);
                entry.insert(arc.clone());
                arc
            }
        };
        if let Entry::Vacant(entry) = self.infos.entry((class.clone(), version)) {
            entry.insert(canonical.clone());
        }

        self.current.insert(class, canonical.clone());
        Ok(canonical)
    }

    /// Canonical descriptor for an exact (class, version) pair.
    pub fn lookup(&self, name: &str, version: i32) -> Option<Arc<StreamerInfo>> {
        self.infos
            .get(&(Arc::from(name), version))
            .map(|entry| entry.value().clone())
    }

    /// Version registered for a (class, checksum) pair, if any.
    pub fn resolve_checksum(&self, name: &str, checksum: u32) -> Option<i32> {
        self.variants
            .get(&(Arc::from(name), checksum))
            .map(|entry| entry.value().version())
    }

    /// Canonical descriptor for a (class, checksum) pair, if any.
    pub fn variant(&self, name: &str, checksum: u32) -> Option<Arc<StreamerInfo>> {
        self.variants
            .get(&(Arc::from(name), checksum))
            .map(|entry| entry.value().clone())
    }

    /// Any registered descriptor of a class: the layout-built one when a
    /// layout exists, else the newest registered version (emulated shaping).
    pub fn any_info(&self, name: &str) -> Option<Arc<StreamerInfo>> {
        if let Some(entry) = self.current.get(name) {
            return Some(entry.value().clone());
        }
        self.infos
            .iter()
            .filter(|entry| entry.key().0.as_ref() == name)
            .max_by_key(|entry| entry.value().version())
            .map(|entry| entry.value().clone())
    }

    /// Descriptor that shapes instances of a class: builds from the layout
    /// when one is registered, else falls back to any registered version.
    /// Pointer members default to null without consulting this, so schema
    /// cycles through pointers never recurse here.
    pub(crate) fn shaping_info(&self, name: &str) -> Option<Arc<StreamerInfo>> {
        self.current_info(name).ok().or_else(|| self.any_info(name))
    }

    /// Register a descriptor deserialized from a buffer (build_check tail).
    pub(crate) fn register_file_info(
        &self,
        info: StreamerInfo,
        load: bool,
    ) -> Result<Arc<StreamerInfo>> {
        let arc = Arc::new(info);
        if !load {
            return Ok(arc);
        }
        let class = arc.class_arc().clone();
        let checksum = arc.checksum_value();
        let version = arc.version();

        // Policy check before publishing anything.
        if let Some(occupant) = self.lookup(&class, version) {
            if occupant.checksum_value() != checksum {
                match self.policy {
                    ConflictPolicy::StrictFail => {
                        return Err(Error::ChecksumMismatch {
                            class: arc.class_name().to_string(),
                            version,
                            declared: checksum,
                            computed: occupant.checksum_value(),
                        });
                    }
                    ConflictPolicy::CoexistByChecksum => {
                        log::warn!(
                            "{} v{} declared twice with different checksums \
                             ({:#010x} vs {:#010x}); coexisting by checksum",
                            arc.class_name(),
                            version,
                            occupant.checksum_value(),
                            checksum
                        );
                    }
                }
            }
        }

        let canonical = match self.variants.entry((class.clone(), checksum)) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                entry.insert(arc.clone());
                arc
            }
        };
        if let Entry::Vacant(entry) = self.infos.entry((class, version)) {
            entry.insert(canonical.clone());
        }
        Ok(canonical)
    }

    /// Map an on-file version counter onto an already-canonical descriptor
    /// (the "checksum matches, version counter was never bumped" case).
    pub(crate) fn alias_version(&self, version: i32, canonical: &Arc<StreamerInfo>) {
        let key = (canonical.class_arc().clone(), version);
        if let Entry::Vacant(entry) = self.infos.entry(key) {
            entry.insert(canonical.clone());
        }
    }

    /// Descriptor to decode an on-file (class, version) record with.
    ///
    /// Resolution order: the current layout-built descriptor when versions
    /// match, a cached adaptation, a fresh `build_for` of the registered
    /// on-file descriptor, or the on-file descriptor itself when no layout
    /// exists (emulated read). Anything else is an unknown version.
    pub fn reading_info(&self, class: &str, version: i32) -> Result<Arc<StreamerInfo>> {
        match self.current_info(class) {
            Ok(current) => {
                if current.version() == version {
                    return Ok(current);
                }
                let key = (Arc::from(class), version);
                if let Some(entry) = self.adapted.get(&key) {
                    return Ok(entry.value().clone());
                }
                let on_file = self.lookup(class, version).ok_or_else(|| Error::VersionUnknown {
                    class: class.to_string(),
                    version,
                })?;
                let adapted = Arc::new(on_file.build_for(self)?);
                self.adapted.insert(key, adapted.clone());
                Ok(adapted)
            }
            // No layout: emulated read shaped by the on-file descriptor.
            Err(_) => self.lookup(class, version).ok_or_else(|| Error::VersionUnknown {
                class: class.to_string(),
                version,
            }),
        }
    }

    // -- rules --------------------------------------------------------------

    /// Register an evolution rule; adaptations of its class are rebuilt on
    /// next use.
    pub fn add_rule(&self, rule: EvolutionRule) {
        let class = rule.class().clone();
        self.rules.entry(class.clone()).or_default().add(rule);
        self.adapted.retain(|(name, _), _| name != &class);
    }

    pub fn rules_for(&self, name: &str) -> Option<RuleSet> {
        self.rules.get(name).map(|entry| entry.value().clone())
    }

    // -- teardown -----------------------------------------------------------

    /// Drop every registration (process-boundary teardown, test isolation).
    pub fn clear(&self) {
        self.layouts.clear();
        self.infos.clear();
        self.variants.clear();
        self.current.clear();
        self.adapted.clear();
        self.rules.clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("policy", &self.policy)
            .field("layouts", &self.layouts.len())
            .field("infos", &self.infos.len())
            .field("variants", &self.variants.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}
