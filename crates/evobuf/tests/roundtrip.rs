// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// End-to-end object round-trips: every non-transient member written must read
// back observably equal, across primitives, strings, arrays, nested objects,
// pointers, collections and base classes.

#![allow(clippy::float_cmp)]

use evobuf::{
    compress_buffer, decompress_buffer, read_batch, read_object, write_object, ClassLayout,
    Error, ElementType, Instance, PrimitiveKind, ReadCursor, Registry, Value, WriteCursor,
};
use std::io::{Read, Write};

fn event_registry() -> Registry {
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

fn make_event(registry: &Registry, a: i32, b: f32, c: &[i32]) -> Instance {
    let info = registry.current_info("Event").expect("Event descriptor");
    let mut event = info.new_instance(registry);
    event.set_slot(0, Value::I32(a));
    event.set_slot(1, Value::F32(b));
    event.set_slot(
        2,
        Value::Collection(c.iter().map(|v| Value::I32(*v)).collect()),
    );
    event
}

#[test]
fn roundtrip_concrete_event() {
    let registry = event_registry();
    let event = make_event(&registry, 5, 2.5, &[1, 2, 3]);

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &event).expect("write");
    let bytes = w.into_bytes();

    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    assert_eq!(back.slot(0).and_then(Value::as_i32), Some(5));
    assert_eq!(back.slot(1).and_then(Value::as_f32), Some(2.5));
    assert_eq!(
        back.slot(2).and_then(Value::as_collection),
        Some(&[Value::I32(1), Value::I32(2), Value::I32(3)][..])
    );
    assert!(r.is_eof());
}

#[test]
fn roundtrip_all_primitive_kinds() {
    let registry = Registry::default();
    registry.register_layout(
        ClassLayout::builder("Primitives", 1)
            .field("flag", PrimitiveKind::Bool)
            .field("i8", PrimitiveKind::I8)
            .field("u8", PrimitiveKind::U8)
            .field("i16", PrimitiveKind::I16)
            .field("u16", PrimitiveKind::U16)
            .field("i32", PrimitiveKind::I32)
            .field("u32", PrimitiveKind::U32)
            .field("i64", PrimitiveKind::I64)
            .field("u64", PrimitiveKind::U64)
            .field("f32", PrimitiveKind::F32)
            .field("f64", PrimitiveKind::F64)
            .build(),
    );

    let info = registry.current_info("Primitives").expect("descriptor");
    let mut inst = info.new_instance(&registry);
    let values = vec![
        Value::Bool(true),
        Value::I8(-8),
        Value::U8(200),
        Value::I16(-1600),
        Value::U16(60000),
        Value::I32(-2_000_000),
        Value::U32(4_000_000_000),
        Value::I64(-(1 << 40)),
        Value::U64(1 << 60),
        Value::F32(3.25),
        Value::F64(-0.0625),
    ];
    for (i, v) in values.iter().enumerate() {
        inst.set_slot(i, v.clone());
    }

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &inst).expect("write");
    let bytes = w.into_bytes();
    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    for (i, v) in values.iter().enumerate() {
        assert_eq!(back.slot(i), Some(v), "slot {}", i);
    }
}

#[test]
fn roundtrip_string_and_array() {
    let registry = Registry::default();
    registry.register_layout(
        ClassLayout::builder("Sample", 2)
            .string_field("label")
            .array_field("bins", PrimitiveKind::F64, 4)
            .build(),
    );

    let info = registry.current_info("Sample").expect("descriptor");
    let mut inst = info.new_instance(&registry);
    inst.set_slot(0, Value::String("calorimeter".into()));
    inst.set_slot(
        1,
        Value::Array(vec![
            Value::F64(0.5),
            Value::F64(1.5),
            Value::F64(2.5),
            Value::F64(3.5),
        ]),
    );

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &inst).expect("write");
    let bytes = w.into_bytes();
    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    assert_eq!(back.slot(0).and_then(Value::as_str), Some("calorimeter"));
    assert_eq!(
        back.slot(1).and_then(Value::as_array).map(<[Value]>::len),
        Some(4)
    );
}

fn tracker_registry() -> Registry {
    let registry = Registry::default();
    registry.register_layout(
        ClassLayout::builder("Point", 1)
            .field("x", PrimitiveKind::F64)
            .field("y", PrimitiveKind::F64)
            .build(),
    );
    registry.register_layout(
        ClassLayout::builder("Track", 1)
            .field("id", PrimitiveKind::U32)
            .object_field("origin", "Point")
            .build(),
    );
    registry.register_layout(
        ClassLayout::builder("Detector", 1)
            .string_field("name")
            .object_sequence_field("tracks", "Track")
            .pointer_field("best", "Track")
            .build(),
    );
    registry
}

fn make_track(registry: &Registry, id: u32, x: f64, y: f64) -> Instance {
    let info = registry.current_info("Track").expect("Track descriptor");
    let mut track = info.new_instance(registry);
    track.set_slot(0, Value::U32(id));
    let origin = track.slot_mut(1).and_then(Value::as_object_mut).expect("origin");
    origin.set_slot(0, Value::F64(x));
    origin.set_slot(1, Value::F64(y));
    track
}

#[test]
fn roundtrip_nested_objects_and_member_wise_collection() {
    let registry = tracker_registry();

    let info = registry.current_info("Detector").expect("descriptor");
    let mut det = info.new_instance(&registry);
    det.set_slot(0, Value::String("pixel".into()));
    det.set_slot(
        1,
        Value::Collection(vec![
            Value::Object(make_track(&registry, 1, 0.5, -0.5)),
            Value::Object(make_track(&registry, 2, 1.5, -1.5)),
            Value::Object(make_track(&registry, 3, 2.5, -2.5)),
        ]),
    );
    det.set_slot(
        2,
        Value::Ptr(Some(Box::new(make_track(&registry, 7, 9.0, 9.0)))),
    );

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &det).expect("write");
    let bytes = w.into_bytes();
    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    assert_eq!(back.slot(0).and_then(Value::as_str), Some("pixel"));
    let tracks = back.slot(1).and_then(Value::as_collection).expect("tracks");
    assert_eq!(tracks.len(), 3);
    let second = tracks[1].as_object().expect("track object");
    assert_eq!(second.slot(0).and_then(Value::as_u32), Some(2));
    let origin = second.slot(1).and_then(Value::as_object).expect("origin");
    assert_eq!(origin.slot(0).and_then(Value::as_f64), Some(1.5));

    let best = back.slot(2).and_then(Value::as_ptr).flatten().expect("best");
    assert_eq!(best.slot(0).and_then(Value::as_u32), Some(7));
}

#[test]
fn null_pointer_streams_as_single_sentinel_byte() {
    let registry = tracker_registry();
    registry.register_layout(
        ClassLayout::builder("Holder", 1)
            .pointer_field("track", "Track")
            .build(),
    );

    let info = registry.current_info("Holder").expect("descriptor");
    let holder = info.new_instance(&registry);

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &holder).expect("write");
    let bytes = w.into_bytes();

    let mut r = ReadCursor::new(&bytes);
    let hdr = r.read_object_header().expect("header");
    // The whole payload is the one-byte null marker.
    assert_eq!(hdr.byte_count, 1);

    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");
    assert_eq!(back.slot(0).and_then(Value::as_ptr), Some(None));
}

#[test]
fn roundtrip_pointer_sequence_with_nulls() {
    let registry = tracker_registry();
    registry.register_layout(
        ClassLayout::builder("TrackRefs", 1)
            .pointer_sequence_field("refs", "Track")
            .build(),
    );

    let info = registry.current_info("TrackRefs").expect("descriptor");
    let mut inst = info.new_instance(&registry);
    inst.set_slot(
        0,
        Value::Collection(vec![
            Value::Ptr(Some(Box::new(make_track(&registry, 10, 1.0, 2.0)))),
            Value::Ptr(None),
            Value::Ptr(Some(Box::new(make_track(&registry, 11, 3.0, 4.0)))),
        ]),
    );

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &inst).expect("write");
    let bytes = w.into_bytes();
    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    let refs = back.slot(0).and_then(Value::as_collection).expect("refs");
    assert_eq!(refs.len(), 3);
    assert!(refs[0].as_ptr().flatten().is_some());
    assert_eq!(refs[1].as_ptr(), Some(None));
    assert_eq!(
        refs[2].as_ptr().flatten().and_then(|t| t.slot(0)).and_then(Value::as_u32),
        Some(11)
    );
}

#[test]
fn roundtrip_base_class_flattening() {
    let registry = Registry::default();
    registry.register_layout(
        ClassLayout::builder("Named", 1)
            .string_field("name")
            .field("uid", PrimitiveKind::U32)
            .build(),
    );
    registry.register_layout(
        ClassLayout::builder("Histogram", 1)
            .base("Named")
            .field("entries", PrimitiveKind::U64)
            .array_field("sums", PrimitiveKind::F64, 2)
            .build(),
    );

    let info = registry.current_info("Histogram").expect("descriptor");
    assert_eq!(info.slot_count(), 4); // name, uid flattened + entries, sums

    let mut hist = info.new_instance(&registry);
    hist.set_slot(0, Value::String("h_pt".into()));
    hist.set_slot(1, Value::U32(42));
    hist.set_slot(2, Value::U64(1000));
    hist.set_slot(3, Value::Array(vec![Value::F64(12.5), Value::F64(250.0)]));

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &hist).expect("write");
    let bytes = w.into_bytes();
    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    assert_eq!(back.slot(0).and_then(Value::as_str), Some("h_pt"));
    assert_eq!(back.slot(1).and_then(Value::as_u32), Some(42));
    assert_eq!(back.slot(2).and_then(Value::as_u64), Some(1000));
}

#[test]
fn transient_members_do_not_persist() {
    let registry = Registry::default();
    registry.register_layout(
        ClassLayout::builder("Cached", 1)
            .field("kept", PrimitiveKind::I32)
            .transient_field("scratch", ElementType::Primitive(PrimitiveKind::F64))
            .build(),
    );

    let info = registry.current_info("Cached").expect("descriptor");
    let mut inst = info.new_instance(&registry);
    inst.set_slot(0, Value::I32(77));
    inst.set_slot(1, Value::F64(99.9));

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &inst).expect("write");
    let bytes = w.into_bytes();
    let mut r = ReadCursor::new(&bytes);
    let back = read_object(&registry, &mut r).expect("read");

    assert_eq!(back.slot(0).and_then(Value::as_i32), Some(77));
    // The transient slot comes back default-initialized, not 99.9.
    assert_eq!(back.slot(1).and_then(Value::as_f64), Some(0.0));
}

#[test]
fn batch_roundtrip_with_counts() {
    let registry = event_registry();
    let mut w = WriteCursor::new();
    for i in 0..5 {
        let event = make_event(&registry, i, i as f32 * 0.5, &[i, i + 1]);
        write_object(&registry, &mut w, &event).expect("write");
    }
    let bytes = w.into_bytes();

    let mut r = ReadCursor::new(&bytes);
    let outcome = read_batch(&registry, &mut r, 5).expect("batch");
    assert!(outcome.is_complete());
    assert_eq!(outcome.ok_count(), 5);
    for (i, inst) in outcome.instances.iter().enumerate() {
        let inst = inst.as_ref().expect("instance");
        assert_eq!(inst.slot(0).and_then(Value::as_i32), Some(i as i32));
    }
}

#[test]
fn truncated_buffer_is_fatal_not_partial() {
    let registry = event_registry();
    let event = make_event(&registry, 1, 1.0, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &event).expect("write");
    let bytes = w.into_bytes();

    // Cut deep into the declared payload.
    let mut r = ReadCursor::new(&bytes[..bytes.len() - 20]);
    let err = read_object(&registry, &mut r).unwrap_err();
    assert!(matches!(err, Error::TruncatedBuffer { .. }), "{:?}", err);
}

#[test]
fn compressed_buffer_roundtrip_through_file() {
    let registry = event_registry();
    let event = make_event(&registry, 9, -4.5, &[5, 10, 15]);

    let mut w = WriteCursor::new();
    write_object(&registry, &mut w, &event).expect("write");
    let raw = w.into_bytes();

    // Compression wraps the completed buffer, never individual elements.
    let packed = compress_buffer(&raw).expect("compress");

    let mut file = tempfile::tempfile().expect("tempfile");
    file.write_all(&packed).expect("write file");
    file.flush().expect("flush");

    let mut stored = Vec::new();
    use std::io::Seek;
    file.rewind().expect("rewind");
    file.read_to_end(&mut stored).expect("read file");

    let unpacked = decompress_buffer(&stored).expect("decompress");
    assert_eq!(unpacked, raw);

    let mut r = ReadCursor::new(&unpacked);
    let back = read_object(&registry, &mut r).expect("read");
    assert_eq!(back.slot(0).and_then(Value::as_i32), Some(9));
}

#[test]
fn randomized_event_batches_roundtrip() {
    let registry = event_registry();
    fastrand::seed(0x5EED);

    for _ in 0..20 {
        let count = fastrand::usize(1..8);
        let mut events = Vec::with_capacity(count);
        let mut w = WriteCursor::new();
        for _ in 0..count {
            let a = fastrand::i32(..);
            let b = f32::from_bits(fastrand::u32(..) & 0x7F7F_FFFF); // finite
            let c: Vec<i32> = (0..fastrand::usize(0..16)).map(|_| fastrand::i32(..)).collect();
            let event = make_event(&registry, a, b, &c);
            write_object(&registry, &mut w, &event).expect("write");
            events.push(event);
        }
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        let outcome = read_batch(&registry, &mut r, count).expect("batch");
        assert_eq!(outcome.ok_count(), count);
        for (expected, got) in events.iter().zip(outcome.instances.iter()) {
            assert_eq!(got.as_ref().expect("instance"), expected);
        }
    }
}

#[test]
fn text_variant_roundtrip() {
    let registry = tracker_registry();
    let info = registry.current_info("Detector").expect("descriptor");

    let mut det = info.new_instance(&registry);
    det.set_slot(0, Value::String("strip".into()));
    det.set_slot(
        1,
        Value::Collection(vec![Value::Object(make_track(&registry, 4, 0.25, 0.75))]),
    );
    det.set_slot(2, Value::Ptr(None));

    let json = info.write_text(&registry, &det).expect("to json");
    assert_eq!(json["name"], "strip");
    assert!(json["best"].is_null());
    assert_eq!(json["tracks"][0]["id"], 4);

    let back = info.read_text(&registry, &json).expect("from json");
    assert_eq!(back.slot(0).and_then(Value::as_str), Some("strip"));
    assert_eq!(back.slot(2).and_then(Value::as_ptr), Some(None));
    let tracks = back.slot(1).and_then(Value::as_collection).expect("tracks");
    assert_eq!(tracks.len(), 1);
    assert_eq!(
        tracks[0].as_object().and_then(|t| t.slot(0)).and_then(Value::as_u32),
        Some(4)
    );
}
