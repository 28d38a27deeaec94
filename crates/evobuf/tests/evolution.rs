// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Schema evolution scenarios: descriptors travel with the bytes, and readers
// reconcile on-file layouts against their own through the rules engine.
// Writer and reader use separate registries throughout, as two processes
// (or two software generations) would.

#![allow(clippy::float_cmp)]

use evobuf::{
    read_batch, read_object, write_object, ClassLayout, ConflictPolicy, Error, EvolutionRule,
    PrimitiveKind, ReadCursor, Registry, StreamerInfo, Value, WriteCursor,
};
use std::sync::Arc;

/// Writer-side v1 Event: {a: i32, b: f32, c: seq<i32>}.
fn writer_v1() -> Registry {
    let registry = Registry::default();
    registry.register_layout(
        ClassLayout::builder("Event", 1)
            .field("a", PrimitiveKind::I32)
            .field("b", PrimitiveKind::F32)
            .sequence_field("c", PrimitiveKind::I32)
            .build(),
    );
    registry
}

fn write_v1_event(registry: &Registry, a: i32, b: f32, c: &[i32]) -> Vec<u8> {
    let info = registry.current_info("Event").expect("descriptor");
    let mut event = info.new_instance(registry);
    event.set_slot(0, Value::I32(a));
    event.set_slot(1, Value::F32(b));
    event.set_slot(
        2,
        Value::Collection(c.iter().map(|v| Value::I32(*v)).collect()),
    );

    let mut w = WriteCursor::new();
    // Self-describing stream: the schema record precedes the data.
    info.write_descriptor(&mut w).expect("descriptor");
    write_object(registry, &mut w, &event).expect("object");
    w.into_bytes()
}

/// Load the leading schema record into `registry`.
fn load_schema(registry: &Registry, r: &mut ReadCursor<'_>) -> Arc<StreamerInfo> {
    let on_file = StreamerInfo::read_descriptor(r).expect("schema record");
    on_file.build_check(registry, true).expect("build_check")
}

#[test]
fn forward_compat_added_member_rule_computed() {
    // v1 bytes read by a v2 layout that added `d: f64`, with the default rule
    // d = a * 2.
    let bytes = write_v1_event(&writer_v1(), 5, 2.5, &[1, 2, 3]);

    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Event", 2)
            .field("a", PrimitiveKind::I32)
            .field("b", PrimitiveKind::F32)
            .sequence_field("c", PrimitiveKind::I32)
            .field("d", PrimitiveKind::F64)
            .build(),
    );
    reader.add_rule(EvolutionRule::transform(
        "Event",
        vec!["a".to_string()],
        vec!["d".to_string()],
        |input| {
            let a = input.get("a").and_then(Value::as_i32).unwrap_or(0);
            vec![("d".to_string(), Value::F64(f64::from(a) * 2.0))]
        },
    ));

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let event = read_object(&reader, &mut r).expect("read");

    // Retained members keep their written values, the added member is
    // rule-computed.
    assert_eq!(event.slot(0).and_then(Value::as_i32), Some(5));
    assert_eq!(event.slot(1).and_then(Value::as_f32), Some(2.5));
    assert_eq!(
        event.slot(2).and_then(Value::as_collection),
        Some(&[Value::I32(1), Value::I32(2), Value::I32(3)][..])
    );
    assert_eq!(event.slot(3).and_then(Value::as_f64), Some(10.0));
}

#[test]
fn forward_compat_added_member_defaults_without_rule() {
    let bytes = write_v1_event(&writer_v1(), 7, 1.0, &[]);

    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Event", 2)
            .field("a", PrimitiveKind::I32)
            .field("b", PrimitiveKind::F32)
            .sequence_field("c", PrimitiveKind::I32)
            .field("d", PrimitiveKind::F64)
            .build(),
    );

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let event = read_object(&reader, &mut r).expect("read");

    assert_eq!(event.slot(0).and_then(Value::as_i32), Some(7));
    assert_eq!(event.slot(3).and_then(Value::as_f64), Some(0.0));
}

#[test]
fn backward_compat_removed_member_bytes_skipped_exactly() {
    // v2 writer adds `d: f64`; a v1 reader must skip the added bytes and stay
    // aligned for the next record.
    let writer = Registry::default();
    writer.register_layout(
        ClassLayout::builder("Event", 2)
            .field("a", PrimitiveKind::I32)
            .field("b", PrimitiveKind::F32)
            .sequence_field("c", PrimitiveKind::I32)
            .field("d", PrimitiveKind::F64)
            .build(),
    );
    let info = writer.current_info("Event").expect("descriptor");

    let mut w = WriteCursor::new();
    info.write_descriptor(&mut w).expect("descriptor");
    for i in 0..2 {
        let mut event = info.new_instance(&writer);
        event.set_slot(0, Value::I32(i));
        event.set_slot(1, Value::F32(0.5));
        event.set_slot(2, Value::Collection(vec![Value::I32(i * 10)]));
        event.set_slot(3, Value::F64(3.125));
        write_object(&writer, &mut w, &event).expect("object");
    }
    let bytes = w.into_bytes();

    let reader = writer_v1();
    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);

    let first = read_object(&reader, &mut r).expect("first");
    assert_eq!(first.slot(0).and_then(Value::as_i32), Some(0));
    assert_eq!(first.slot_count(), 3); // shaped by the v1 layout

    // Alignment check: the second record decodes cleanly after the skip.
    let second = read_object(&reader, &mut r).expect("second");
    assert_eq!(second.slot(0).and_then(Value::as_i32), Some(1));
    assert_eq!(
        second.slot(2).and_then(Value::as_collection),
        Some(&[Value::I32(10)][..])
    );
    assert!(r.is_eof());
}

#[test]
fn rename_rule_maps_old_member() {
    let writer = Registry::default();
    writer.register_layout(
        ClassLayout::builder("Track", 1)
            .field("momentum_x", PrimitiveKind::F64)
            .build(),
    );
    let info = writer.current_info("Track").expect("descriptor");
    let mut track = info.new_instance(&writer);
    track.set_slot(0, Value::F64(1.75));

    let mut w = WriteCursor::new();
    info.write_descriptor(&mut w).expect("descriptor");
    write_object(&writer, &mut w, &track).expect("object");
    let bytes = w.into_bytes();

    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Track", 2)
            .field("px", PrimitiveKind::F64)
            .build(),
    );
    reader.add_rule(EvolutionRule::rename("Track", "momentum_x", "px"));

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let track = read_object(&reader, &mut r).expect("read");
    assert_eq!(track.slot(0).and_then(Value::as_f64), Some(1.75));
}

#[test]
fn primitive_type_change_converts() {
    let writer = Registry::default();
    writer.register_layout(
        ClassLayout::builder("Counter", 1)
            .field("n", PrimitiveKind::I32)
            .field("scale", PrimitiveKind::F32)
            .build(),
    );
    let info = writer.current_info("Counter").expect("descriptor");
    let mut counter = info.new_instance(&writer);
    counter.set_slot(0, Value::I32(-12));
    counter.set_slot(1, Value::F32(1.5));

    let mut w = WriteCursor::new();
    info.write_descriptor(&mut w).expect("descriptor");
    write_object(&writer, &mut w, &counter).expect("object");
    let bytes = w.into_bytes();

    // v2 widens n to i64 and scale to f64.
    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Counter", 2)
            .field("n", PrimitiveKind::I64)
            .field("scale", PrimitiveKind::F64)
            .build(),
    );

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let counter = read_object(&reader, &mut r).expect("read");
    assert_eq!(counter.slot(0).and_then(Value::as_i64), Some(-12));
    assert_eq!(counter.slot(1).and_then(Value::as_f64), Some(1.5));
}

#[test]
fn removed_member_feeds_transform_rule() {
    // v1 {raw: i32, gain: f32}; v2 keeps only {calibrated: f64} computed from
    // both old members, one of which no longer exists in memory.
    let writer = Registry::default();
    writer.register_layout(
        ClassLayout::builder("Cell", 1)
            .field("raw", PrimitiveKind::I32)
            .field("gain", PrimitiveKind::F32)
            .build(),
    );
    let info = writer.current_info("Cell").expect("descriptor");
    let mut cell = info.new_instance(&writer);
    cell.set_slot(0, Value::I32(40));
    cell.set_slot(1, Value::F32(0.25));

    let mut w = WriteCursor::new();
    info.write_descriptor(&mut w).expect("descriptor");
    write_object(&writer, &mut w, &cell).expect("object");
    let bytes = w.into_bytes();

    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Cell", 2)
            .field("calibrated", PrimitiveKind::F64)
            .build(),
    );
    reader.add_rule(EvolutionRule::transform(
        "Cell",
        vec!["raw".to_string(), "gain".to_string()],
        vec!["calibrated".to_string()],
        |input| {
            let raw = input.get("raw").and_then(Value::as_i32).unwrap_or(0);
            let gain = input.get("gain").and_then(Value::as_f32).unwrap_or(0.0);
            vec![(
                "calibrated".to_string(),
                Value::F64(f64::from(raw) * f64::from(gain)),
            )]
        },
    ));

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let cell = read_object(&reader, &mut r).expect("read");
    assert_eq!(cell.slot(0).and_then(Value::as_f64), Some(10.0));
}

#[test]
fn unknown_newer_version_skips_record_in_batch() {
    // The reader knows Event v1 only; a v9 record (no schema record shipped)
    // must skip cleanly and not poison its neighbors.
    let writer_new = Registry::default();
    writer_new.register_layout(
        ClassLayout::builder("Event", 9)
            .field("a", PrimitiveKind::I32)
            .string_field("tag")
            .build(),
    );
    let writer_old = writer_v1();

    let mut w = WriteCursor::new();
    let old_info = writer_old.current_info("Event").expect("v1 descriptor");
    let mut first = old_info.new_instance(&writer_old);
    first.set_slot(0, Value::I32(1));
    first.set_slot(1, Value::F32(1.0));
    first.set_slot(2, Value::Collection(vec![]));
    write_object(&writer_old, &mut w, &first).expect("first");

    let new_info = writer_new.current_info("Event").expect("v9 descriptor");
    let mut middle = new_info.new_instance(&writer_new);
    middle.set_slot(0, Value::I32(2));
    middle.set_slot(1, Value::String("future".into()));
    write_object(&writer_new, &mut w, &middle).expect("middle");

    let mut last = old_info.new_instance(&writer_old);
    last.set_slot(0, Value::I32(3));
    last.set_slot(1, Value::F32(3.0));
    last.set_slot(2, Value::Collection(vec![]));
    write_object(&writer_old, &mut w, &last).expect("last");
    let bytes = w.into_bytes();

    let reader = writer_v1();
    let mut r = ReadCursor::new(&bytes);
    let outcome = read_batch(&reader, &mut r, 3).expect("batch");

    assert_eq!(outcome.ok_count(), 2);
    assert_eq!(outcome.error_count(), 1);
    assert!(outcome.instances[1].is_none());
    match &outcome.errors[0] {
        (1, Error::VersionUnknown { class, version }) => {
            assert_eq!(class, "Event");
            assert_eq!(*version, 9);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(
        outcome.instances[2]
            .as_ref()
            .and_then(|i| i.slot(0))
            .and_then(Value::as_i32),
        Some(3)
    );
}

#[test]
fn registry_dedups_identical_schemas_across_buffers() {
    // Many files redeclare identical schemas; only one canonical descriptor
    // per distinct checksum survives.
    let writer = writer_v1();
    let reader = Registry::default();

    let mut canonical: Option<Arc<StreamerInfo>> = None;
    for _ in 0..4 {
        let bytes = write_v1_event(&writer, 0, 0.0, &[]);
        let mut r = ReadCursor::new(&bytes);
        let loaded = load_schema(&reader, &mut r);
        match &canonical {
            None => canonical = Some(loaded),
            Some(first) => assert!(Arc::ptr_eq(first, &loaded)),
        }
    }
}

#[test]
fn emulated_read_without_layout() {
    // No layout registered on the reader side at all: instances take the
    // shape of the on-file schema.
    let bytes = write_v1_event(&writer_v1(), 11, 0.5, &[4, 5]);

    let reader = Registry::default();
    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let event = read_object(&reader, &mut r).expect("read");

    assert_eq!(event.class().as_ref(), "Event");
    assert_eq!(event.slot_count(), 3);
    assert_eq!(event.slot(0).and_then(Value::as_i32), Some(11));
    assert_eq!(
        event.slot(2).and_then(Value::as_collection),
        Some(&[Value::I32(4), Value::I32(5)][..])
    );
}

#[test]
fn checksum_identity_survives_version_counter_drift() {
    // Same structure declared at two version numbers: the checksum flags the
    // equivalence and resolves to the registered version.
    let writer = writer_v1();
    let info = writer.current_info("Event").expect("descriptor");

    let reader = writer_v1();
    reader.current_info("Event").expect("prime registry");
    assert_eq!(
        reader.resolve_checksum("Event", info.checksum_value()),
        Some(1)
    );
}

#[test]
fn conflicting_checksums_follow_policy() {
    // Two sources declare Event v1 with different member sets.
    let drifted = {
        let registry = Registry::default();
        registry.register_layout(
            ClassLayout::builder("Event", 1)
                .field("a", PrimitiveKind::I32)
                .field("extra", PrimitiveKind::U64)
                .build(),
        );
        let info = registry.current_info("Event").expect("descriptor");
        let mut w = WriteCursor::new();
        info.write_descriptor(&mut w).expect("descriptor");
        w.into_bytes()
    };

    // Strict policy: the second declaration is rejected.
    let strict = Registry::new(ConflictPolicy::StrictFail);
    strict.register_layout(
        ClassLayout::builder("Event", 1)
            .field("a", PrimitiveKind::I32)
            .build(),
    );
    strict.current_info("Event").expect("prime registry");
    let mut r = ReadCursor::new(&drifted);
    let on_file = StreamerInfo::read_descriptor(&mut r).expect("schema record");
    let err = on_file.build_check(&strict, true).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }), "{:?}", err);

    // Coexist policy: both survive, keyed by checksum.
    let coexist = Registry::new(ConflictPolicy::CoexistByChecksum);
    coexist.register_layout(
        ClassLayout::builder("Event", 1)
            .field("a", PrimitiveKind::I32)
            .build(),
    );
    coexist.current_info("Event").expect("prime registry");
    let mut r = ReadCursor::new(&drifted);
    let on_file = StreamerInfo::read_descriptor(&mut r).expect("schema record");
    let checksum = on_file.checksum_value();
    let loaded = on_file.build_check(&coexist, true).expect("coexist");
    assert_eq!(loaded.checksum_value(), checksum);
    assert!(coexist.variant("Event", checksum).is_some());
}

#[test]
fn conflicting_rules_warn_and_keep_first() {
    let bytes = write_v1_event(&writer_v1(), 3, 0.0, &[]);

    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Event", 2)
            .field("a", PrimitiveKind::I32)
            .field("b", PrimitiveKind::F32)
            .sequence_field("c", PrimitiveKind::I32)
            .field("d", PrimitiveKind::F64)
            .build(),
    );
    reader.add_rule(EvolutionRule::transform(
        "Event",
        vec!["a".to_string()],
        vec!["d".to_string()],
        |input| {
            let a = input.get("a").and_then(Value::as_i32).unwrap_or(0);
            vec![("d".to_string(), Value::F64(f64::from(a)))]
        },
    ));
    // Later rule claiming the same target: ignored, never applied on top.
    reader.add_rule(EvolutionRule::transform(
        "Event",
        vec!["a".to_string()],
        vec!["d".to_string()],
        |_| vec![("d".to_string(), Value::F64(-1.0))],
    ));

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let event = read_object(&reader, &mut r).expect("read");
    assert_eq!(event.slot(3).and_then(Value::as_f64), Some(3.0));
}

#[test]
fn checksum_pinned_rule_outranks_generic() {
    let writer = writer_v1();
    let info = writer.current_info("Event").expect("descriptor");
    let v1_checksum = info.checksum_value();
    let bytes = write_v1_event(&writer, 4, 0.0, &[]);

    let reader = Registry::default();
    reader.register_layout(
        ClassLayout::builder("Event", 2)
            .field("a", PrimitiveKind::I32)
            .field("b", PrimitiveKind::F32)
            .sequence_field("c", PrimitiveKind::I32)
            .field("d", PrimitiveKind::F64)
            .build(),
    );
    reader.add_rule(EvolutionRule::transform(
        "Event",
        vec!["a".to_string()],
        vec!["d".to_string()],
        |_| vec![("d".to_string(), Value::F64(-1.0))],
    ));
    reader.add_rule(
        EvolutionRule::transform(
            "Event",
            vec!["a".to_string()],
            vec!["d".to_string()],
            |input| {
                let a = input.get("a").and_then(Value::as_i32).unwrap_or(0);
                vec![("d".to_string(), Value::F64(f64::from(a) * 100.0))]
            },
        )
        .for_checksum(v1_checksum),
    );

    let mut r = ReadCursor::new(&bytes);
    load_schema(&reader, &mut r);
    let event = read_object(&reader, &mut r).expect("read");
    assert_eq!(event.slot(3).and_then(Value::as_f64), Some(400.0));
}
