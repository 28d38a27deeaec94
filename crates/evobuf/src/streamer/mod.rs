// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class descriptors and the object read/write entry points.
//!
//! A [`StreamerInfo`] captures the schema of one class at one on-disk version:
//! its ordered element list, structural checksum, and the compiled action
//! sequences executed against buffer cursors. Descriptors move through
//! `Built -> Compiled`; once compiled and published they are immutable and
//! read lock-free from any thread.

pub mod actions;
mod compile;
mod text;

pub use actions::{ActionOp, ActionSequence, CompiledAction, IoMode};
pub use compile::CompiledSequences;

use crate::checksum::{self, structural_checksum, ChecksumMode};
use crate::cursor::{ObjectHeader, ReadCursor, WriteCursor};
use crate::element::{ElementType, StreamerElement};
use crate::error::{Error, Result};
use crate::layout::ClassLayout;
use crate::registry::Registry;
use crate::rules::{EvolutionRule, RuleKind};
use crate::value::{Instance, Value};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Reserved record name under which descriptors stream themselves.
pub const DESCRIPTOR_RECORD: &str = "evobuf.schema";
const DESCRIPTOR_FORMAT_VERSION: i32 = 1;

// ---------------------------------------------------------------------------
// StreamerInfo
// ---------------------------------------------------------------------------

/// Versioned schema descriptor for one class.
pub struct StreamerInfo {
    class: Arc<str>,
    class_version: i32,
    on_file_version: i32,
    checksum: u32,
    /// Declaration order, significant.
    elements: Vec<StreamerElement>,
    slot_count: usize,
    byte_size: usize,
    /// In-memory member name -> (slot, type); for adapted descriptors this is
    /// the *target* layout's map, so rule callbacks and defaults always
    /// address current slots.
    target_slots: HashMap<String, (usize, ElementType)>,
    /// In-memory members absent on file: default-initialized on read.
    artificial_zero: Vec<(usize, ElementType)>,
    /// In-memory members computed by rule callbacks on read.
    artificial_rules: Vec<Arc<EvolutionRule>>,
    compiled: ArcSwapOption<CompiledSequences>,
    compile_lock: Mutex<()>,
}

impl StreamerInfo {
    // -- construction -------------------------------------------------------

    /// Build a descriptor by walking a registered in-memory layout.
    ///
    /// Fails when a member's type has no resolvable descriptor and neither
    /// the member nor the build is marked transient. Failed builds are never
    /// published.
    pub fn build(layout: &ClassLayout, registry: &Registry, transient: bool) -> Result<Self> {
        let mut elements = Vec::with_capacity(layout.members().len());
        let mut target_slots = HashMap::new();
        let mut next_slot = 0usize;

        for member in layout.members() {
            if let Some(class) = member.etype.nested_class() {
                let resolvable = registry.resolve_layout(class).is_some()
                    || registry.any_info(class).is_some();
                if !resolvable && !member.transient && !transient {
                    return Err(Error::DescriptorBuild {
                        class: layout.name().to_string(),
                        member: member.name.clone(),
                        reason: format!("no descriptor registered for type {}", class),
                    });
                }
            }
            let span = match &member.etype {
                // Base members flatten: they claim the base's whole slot range.
                ElementType::Base { class } => registry.current_info(class)?.slot_count(),
                _ => 1,
            };
            let mut elem = StreamerElement::new(member.name.clone(), member.etype.clone())
                .with_offset(next_slot);
            if member.transient {
                elem = elem.transient();
            }
            if let Some(class) = member.etype.nested_class() {
                if let Some(nested) = registry.any_info(class) {
                    elem.update(class, nested.version());
                }
            }
            target_slots.insert(member.name.clone(), (next_slot, member.etype.clone()));
            elements.push(elem);
            next_slot += span;
        }

        let checksum = structural_checksum(&elements, ChecksumMode::Current);
        let byte_size = compute_byte_size(registry, &elements);
        Ok(Self {
            class: layout.name().clone(),
            class_version: layout.version(),
            on_file_version: layout.version(),
            checksum,
            elements,
            slot_count: next_slot,
            byte_size,
            target_slots,
            artificial_zero: Vec::new(),
            artificial_rules: Vec::new(),
            compiled: ArcSwapOption::empty(),
            compile_lock: Mutex::new(()),
        })
    }

    /// Reconcile a file-deserialized descriptor against the registry.
    ///
    /// Checksum-equal descriptors dedup onto the canonical registered
    /// instance; unknown checksums register a new canonical version (when
    /// `load` is set). A declared checksum matching no known era is replaced
    /// by the recomputed value, never silently trusted.
    pub fn build_check(mut self, registry: &Registry, load: bool) -> Result<Arc<Self>> {
        self.finalize_emulated(registry);

        let computed = structural_checksum(&self.elements, ChecksumMode::Current);
        if self.checksum != computed && !checksum::matches_any_era(&self.elements, self.checksum) {
            log::warn!(
                "declared checksum {:#010x} for {} v{} matches no era; using recomputed {:#010x}",
                self.checksum,
                self.class,
                self.class_version,
                computed
            );
            self.checksum = computed;
        }

        if let Some(canonical) = registry.variant(&self.class, self.checksum) {
            // Many files redeclare identical schemas, sometimes under a
            // version counter that was never bumped; keep that counter
            // resolvable but hand out the one canonical instance.
            if load {
                registry.alias_version(self.class_version, &canonical);
            }
            return Ok(canonical);
        }
        registry.register_file_info(self, load)
    }

    /// Produce a descriptor that reads this on-file schema into the current
    /// in-memory layout of the class, applying evolution rules where the
    /// element sets differ.
    pub fn build_for(&self, registry: &Registry) -> Result<Self> {
        let target = registry.current_info(&self.class)?;
        let rules = registry
            .rules_for(&self.class)
            .map(|set| set.select(self.checksum))
            .unwrap_or_default();

        let mut rename: HashMap<&str, &str> = HashMap::new();
        let mut cache_sources: HashSet<&str> = HashSet::new();
        let mut rule_targets: HashSet<&str> = HashSet::new();
        let mut transforms: Vec<Arc<EvolutionRule>> = Vec::new();
        for rule in &rules {
            match rule.kind() {
                RuleKind::Rename { from, to } => {
                    rename.insert(from.as_str(), to.as_str());
                    rule_targets.insert(to.as_str());
                }
                RuleKind::Transform {
                    sources, targets, ..
                } => {
                    for s in sources {
                        cache_sources.insert(s.as_str());
                    }
                    for t in targets {
                        rule_targets.insert(t.as_str());
                    }
                    transforms.push(rule.clone());
                }
            }
        }

        let mut elements = Vec::with_capacity(self.elements.len());
        let mut covered: HashSet<usize> = HashSet::new();
        for elem in &self.elements {
            let target_name = rename.get(elem.name()).copied().unwrap_or(elem.name());
            let adapted = match target.slot_entry(target_name) {
                Some((slot, tetype)) if elem.element_type() == tetype => {
                    covered.insert(slot);
                    elem.clone().with_offset(slot)
                }
                Some((slot, ElementType::Primitive(to))) => {
                    // Primitive type change: read the on-file kind, convert.
                    if let ElementType::Primitive(_) = elem.element_type() {
                        covered.insert(slot);
                        elem.clone().with_offset(slot).with_new_kind(*to)
                    } else {
                        log::warn!(
                            "incompatible shape change for {}::{} ({} on file); skipping",
                            self.class,
                            elem.name(),
                            elem.element_type().canonical()
                        );
                        elem.clone().cleared_offset()
                    }
                }
                Some((_, tetype)) => {
                    log::warn!(
                        "incompatible shape change for {}::{} ({} on file, {} in memory); skipping",
                        self.class,
                        elem.name(),
                        elem.element_type().canonical(),
                        tetype.canonical()
                    );
                    elem.clone().cleared_offset()
                }
                None if cache_sources.contains(elem.name()) => {
                    elem.clone().cleared_offset().cached()
                }
                None => elem.clone().cleared_offset(),
            };
            elements.push(adapted);
        }

        // In-memory members absent on file: zero-init unless a rule computes
        // them. Base spans keep their default-constructed content.
        let mut artificial_zero = Vec::new();
        for (name, (slot, etype)) in target.target_slots() {
            if covered.contains(slot)
                || rule_targets.contains(name.as_str())
                || matches!(etype, ElementType::Base { .. })
            {
                continue;
            }
            artificial_zero.push((*slot, etype.clone()));
        }
        artificial_zero.sort_by_key(|(slot, _)| *slot);

        let mut info = Self {
            class: self.class.clone(),
            class_version: self.class_version,
            on_file_version: self.on_file_version,
            checksum: self.checksum,
            elements,
            slot_count: target.slot_count(),
            byte_size: target.size(),
            target_slots: target.target_slots().clone(),
            artificial_zero,
            artificial_rules: transforms,
            compiled: ArcSwapOption::empty(),
            compile_lock: Mutex::new(()),
        };
        for elem in &mut info.elements {
            let linkage = elem
                .element_type()
                .nested_class()
                .and_then(|class| registry.any_info(class).map(|n| (class.clone(), n.version())));
            if let Some((class, version)) = linkage {
                elem.update(&class, version);
            }
        }
        Ok(info)
    }

    /// Assign sequential slots to a descriptor that has no in-memory layout
    /// (emulated/foreign schema), so its own element order shapes instances.
    pub(crate) fn finalize_emulated(&mut self, registry: &Registry) {
        let elements = std::mem::take(&mut self.elements);
        let mut out = Vec::with_capacity(elements.len());
        let mut target_slots = HashMap::new();
        let mut next_slot = 0usize;
        for elem in elements {
            let span = match elem.element_type() {
                ElementType::Base { class } => {
                    registry.any_info(class).map_or(1, |info| info.slot_count())
                }
                _ => 1,
            };
            target_slots.insert(
                elem.name().to_string(),
                (next_slot, elem.element_type().clone()),
            );
            out.push(elem.with_offset(next_slot));
            next_slot += span;
        }
        self.elements = out;
        self.slot_count = next_slot;
        self.target_slots = target_slots;
        self.byte_size = compute_byte_size(registry, &self.elements);
    }

    // -- compilation --------------------------------------------------------

    /// Populate the compiled action-sequence variants.
    ///
    /// Idempotent: later calls are no-ops. The sequence set is published
    /// atomically only after every variant is built, so concurrent readers
    /// never observe a half-compiled descriptor.
    pub fn compile(&self) -> Result<()> {
        if self.compiled.load().is_some() {
            return Ok(());
        }
        let _guard = self.compile_lock.lock();
        if self.compiled.load().is_some() {
            return Ok(());
        }
        let sequences = compile::compile_info(self)?;
        self.compiled.store(Some(Arc::new(sequences)));
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.load().is_some()
    }

    /// The compiled sequences, if [`compile`](Self::compile) has run.
    pub fn sequences(&self) -> Option<Arc<CompiledSequences>> {
        self.compiled.load_full()
    }

    // -- buffer execution ---------------------------------------------------

    /// Execute a contiguous slice `[first, last)` of a compiled read sequence
    /// against `instances`, shifting every target slot by `base`.
    /// Returns bytes consumed; cursor failures propagate as errors.
    #[allow(clippy::too_many_arguments)]
    pub fn read_buffer(
        &self,
        registry: &Registry,
        cursor: &mut ReadCursor<'_>,
        instances: &mut [Instance],
        seq: &ActionSequence,
        first: usize,
        last: usize,
        base: usize,
        mode: IoMode,
    ) -> Result<usize> {
        actions::run_read(
            self, registry, cursor, instances, seq, first, last, base, mode,
        )
    }

    /// Write counterpart of [`read_buffer`](Self::read_buffer); returns bytes
    /// produced.
    #[allow(clippy::too_many_arguments)]
    pub fn write_buffer(
        &self,
        registry: &Registry,
        cursor: &mut WriteCursor,
        instances: &[Instance],
        seq: &ActionSequence,
        first: usize,
        last: usize,
        base: usize,
        mode: IoMode,
    ) -> Result<usize> {
        actions::run_write(
            self, registry, cursor, instances, seq, first, last, base, mode,
        )
    }

    // -- text variants ------------------------------------------------------

    /// Render one instance as JSON using the compiled text-write sequence.
    pub fn write_text(&self, registry: &Registry, inst: &Instance) -> Result<serde_json::Value> {
        self.compile()?;
        let seqs = self.sequences().expect("compiled above");
        text::run_write_text(self, registry, inst, &seqs.write_text)
    }

    /// Build an instance from JSON using the compiled text-read sequence.
    pub fn read_text(&self, registry: &Registry, json: &serde_json::Value) -> Result<Instance> {
        self.compile()?;
        let seqs = self.sequences().expect("compiled above");
        let mut inst = self.new_instance(registry);
        text::run_read_text(self, registry, json, &mut inst, &seqs.read_text)?;
        Ok(inst)
    }

    // -- instance lifecycle -------------------------------------------------

    /// Construct a default-initialized instance shaped by this descriptor.
    ///
    /// Works for emulated/foreign schemas with no compiled type available;
    /// destruction is plain `Drop`.
    pub fn new_instance(&self, registry: &Registry) -> Instance {
        let mut inst = Instance::new(self.class.clone(), self.slot_count);
        self.fill_defaults(registry, &mut inst, 0);
        inst
    }

    /// Construct `count` default-initialized instances.
    pub fn new_array(&self, registry: &Registry, count: usize) -> Vec<Instance> {
        (0..count).map(|_| self.new_instance(registry)).collect()
    }

    fn fill_defaults(&self, registry: &Registry, inst: &mut Instance, base: usize) {
        for (slot, etype) in self.target_slots.values() {
            match etype {
                ElementType::Object { class } => {
                    if let Some(info) = registry.shaping_info(class) {
                        inst.set_slot(base + slot, Value::Object(info.new_instance(registry)));
                    }
                }
                ElementType::Base { class } => {
                    if let Some(info) = registry.shaping_info(class) {
                        info.fill_defaults(registry, inst, base + slot);
                    }
                }
                other => {
                    inst.set_slot(base + slot, other.default_value());
                }
            }
        }
    }

    // -- descriptor self-streaming ------------------------------------------

    /// Stream this descriptor with the engine's own framing, so a reader can
    /// reconstruct the schema with no compiled type available. Transient
    /// elements never persist.
    pub fn write_descriptor(&self, w: &mut WriteCursor) -> Result<()> {
        w.write_version(DESCRIPTOR_RECORD, DESCRIPTOR_FORMAT_VERSION)?;
        let mark = w.begin_record();
        w.write_str(&self.class);
        w.write_i32(self.class_version);
        w.write_u32(self.checksum);
        let persistent: Vec<&StreamerElement> =
            self.elements.iter().filter(|e| !e.is_transient()).collect();
        w.write_u32(persistent.len() as u32);
        for elem in persistent {
            elem.write_to(w);
        }
        w.end_record(mark)?;
        Ok(())
    }

    /// Decode a descriptor streamed by [`write_descriptor`](Self::write_descriptor).
    ///
    /// The result carries no slot assignment; pass it through
    /// [`build_check`](Self::build_check) before use.
    pub fn read_descriptor(r: &mut ReadCursor<'_>) -> Result<Self> {
        let hdr = r.read_object_header()?;
        if hdr.class != DESCRIPTOR_RECORD {
            return Err(Error::InvalidData {
                reason: format!("expected schema record, found {}", hdr.class),
            });
        }
        if hdr.version != DESCRIPTOR_FORMAT_VERSION {
            return Err(Error::InvalidData {
                reason: format!("unsupported schema record version {}", hdr.version),
            });
        }
        let class: Arc<str> = Arc::from(r.read_str()?);
        let class_version = r.read_i32()?;
        let checksum = r.read_u32()?;
        let count = r.read_u32()? as usize;
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            elements.push(StreamerElement::read_from(r)?);
        }
        r.finish_record(&hdr)?;
        Ok(Self {
            class,
            class_version,
            on_file_version: class_version,
            checksum,
            elements,
            slot_count: 0,
            byte_size: 0,
            target_slots: HashMap::new(),
            artificial_zero: Vec::new(),
            artificial_rules: Vec::new(),
            compiled: ArcSwapOption::empty(),
            compile_lock: Mutex::new(()),
        })
    }

    // -- checksums ----------------------------------------------------------

    /// Structural checksum under a specific era.
    pub fn checksum(&self, mode: ChecksumMode) -> u32 {
        structural_checksum(&self.elements, mode)
    }

    /// The checksum this descriptor was built or loaded with.
    pub fn checksum_value(&self) -> u32 {
        self.checksum
    }

    /// True when `declared` matches this element list under any era.
    pub fn matches_legacy_checksum(&self, declared: u32) -> bool {
        checksum::matches_any_era(&self.elements, declared)
    }

    // -- linkage ------------------------------------------------------------

    /// Refresh every element's cached linkage to `class` after that class's
    /// descriptor was rebuilt at `version`.
    pub fn update(&mut self, class: &str, version: i32) {
        for elem in &mut self.elements {
            elem.update(class, version);
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub(crate) fn class_arc(&self) -> &Arc<str> {
        &self.class
    }

    pub fn version(&self) -> i32 {
        self.class_version
    }

    pub fn on_file_version(&self) -> i32 {
        self.on_file_version
    }

    pub fn elements(&self) -> &[StreamerElement] {
        &self.elements
    }

    pub fn element(&self, index: usize) -> Option<&StreamerElement> {
        self.elements.get(index)
    }

    /// Nominal in-memory footprint; sizes emulated allocation.
    pub fn size(&self) -> usize {
        self.byte_size
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Slot of an in-memory member by name.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.target_slots.get(name).map(|(slot, _)| *slot)
    }

    pub(crate) fn slot_entry(&self, name: &str) -> Option<(usize, &ElementType)> {
        self.target_slots
            .get(name)
            .map(|(slot, etype)| (*slot, etype))
    }

    pub(crate) fn target_slots(&self) -> &HashMap<String, (usize, ElementType)> {
        &self.target_slots
    }

    pub(crate) fn artificial_zero(&self) -> &[(usize, ElementType)] {
        &self.artificial_zero
    }

    pub(crate) fn artificial_rules(&self) -> &[Arc<EvolutionRule>] {
        &self.artificial_rules
    }
}

impl Clone for StreamerInfo {
    fn clone(&self) -> Self {
        Self {
            class: self.class.clone(),
            class_version: self.class_version,
            on_file_version: self.on_file_version,
            checksum: self.checksum,
            elements: self.elements.clone(),
            slot_count: self.slot_count,
            byte_size: self.byte_size,
            target_slots: self.target_slots.clone(),
            artificial_zero: self.artificial_zero.clone(),
            artificial_rules: self.artificial_rules.clone(),
            compiled: ArcSwapOption::new(self.compiled.load_full()),
            compile_lock: Mutex::new(()),
        }
    }
}

impl fmt::Debug for StreamerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamerInfo")
            .field("class", &self.class)
            .field("version", &self.class_version)
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .field("elements", &self.elements.len())
            .field("slots", &self.slot_count)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

fn compute_byte_size(registry: &Registry, elements: &[StreamerElement]) -> usize {
    elements
        .iter()
        .map(|elem| match elem.element_type() {
            etype if etype.fixed_size().is_some() => etype.fixed_size().unwrap_or(0),
            ElementType::String | ElementType::Collection { .. } => 24,
            ElementType::Pointer { .. } => 8,
            ElementType::Object { class } | ElementType::Base { class } => {
                registry.any_info(class).map_or(0, |info| info.size())
            }
            _ => 0,
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Top-level object I/O
// ---------------------------------------------------------------------------

/// Write one object with full record framing; returns bytes produced.
///
/// The descriptor is built from the registered layout on first use and
/// compiled on first I/O in this mode.
pub fn write_object(registry: &Registry, w: &mut WriteCursor, inst: &Instance) -> Result<usize> {
    let start = w.len();
    let info = registry.current_info(inst.class())?;
    info.compile()?;
    let seqs = info.sequences().expect("compiled above");
    w.write_version(inst.class(), info.version())?;
    let mark = w.begin_record();
    actions::run_write(
        &info,
        registry,
        w,
        std::slice::from_ref(inst),
        &seqs.write_object,
        0,
        usize::MAX,
        0,
        IoMode::ObjectWise,
    )?;
    w.end_record(mark)?;
    Ok(w.len() - start)
}

/// Read one object with full record framing.
///
/// An unknown on-file version is skipped exactly (cursor stays aligned for
/// the next record) and surfaced as [`Error::VersionUnknown`]; the caller
/// decides whether missing data is fatal for its use case.
pub fn read_object(registry: &Registry, r: &mut ReadCursor<'_>) -> Result<Instance> {
    let hdr = r.read_object_header()?;
    read_payload(registry, r, &hdr)
}

pub(crate) fn read_nested_object(registry: &Registry, r: &mut ReadCursor<'_>) -> Result<Instance> {
    let hdr = r.read_object_header()?;
    read_payload(registry, r, &hdr)
}

pub(crate) fn write_nested_object(
    registry: &Registry,
    w: &mut WriteCursor,
    obj: &Instance,
) -> Result<()> {
    write_object(registry, w, obj).map(|_| ())
}

fn read_payload(
    registry: &Registry,
    r: &mut ReadCursor<'_>,
    hdr: &ObjectHeader,
) -> Result<Instance> {
    if hdr.continued {
        // Multi-chunk records are forward-skippable but not decodable.
        r.skip_payload(hdr)?;
        return Err(Error::RecordTooLarge {
            size: hdr.byte_count,
        });
    }
    let info = match registry.reading_info(&hdr.class, hdr.version) {
        Ok(info) => info,
        Err(err) => {
            if err.is_recoverable() {
                r.skip_payload(hdr)?;
            }
            return Err(err);
        }
    };
    info.compile()?;
    let seqs = info.sequences().expect("compiled above");
    let mut inst = info.new_instance(registry);
    actions::run_read(
        &info,
        registry,
        r,
        std::slice::from_mut(&mut inst),
        &seqs.read_object,
        0,
        usize::MAX,
        0,
        IoMode::ObjectWise,
    )?;
    r.finish_record(hdr)?;
    Ok(inst)
}

// ---------------------------------------------------------------------------
// Batch reads
// ---------------------------------------------------------------------------

/// Per-object statuses of a batch read, alongside aggregate counts.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One entry per record; `None` where the record was skipped.
    pub instances: Vec<Option<Instance>>,
    /// Record index plus the diagnostic that skipped it.
    pub errors: Vec<(usize, Error)>,
}

impl BatchOutcome {
    pub fn ok_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_some()).count()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read `count` consecutive object records.
///
/// Recoverable per-record conditions (unknown version) skip that record and
/// continue; truncation and framing defects abort the batch, per the error
/// taxonomy.
pub fn read_batch(
    registry: &Registry,
    r: &mut ReadCursor<'_>,
    count: usize,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome {
        instances: Vec::with_capacity(count),
        errors: Vec::new(),
    };
    for index in 0..count {
        let hdr = r.read_object_header()?;
        match read_payload(registry, r, &hdr) {
            Ok(inst) => outcome.instances.push(Some(inst)),
            Err(err) if err.is_recoverable() => {
                log::debug!("record {} skipped: {}", index, err);
                outcome.instances.push(None);
                outcome.errors.push((index, err));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(outcome)
}
