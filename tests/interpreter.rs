use binform::{
    compile_schema, parse, parse_with_options, parse_with_schema, CompileOptions, Error,
    ParseErrorKind, ParseOptions, Value,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn position_discipline_without_pos() {
    init_logs();
    let root = parse(
        r#"
meta:
  id: seqs
  endian: le
seq:
  - id: a
    type: u1
  - id: b
    type: u2
  - id: c
    size: 3
"#,
        &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06][..],
    )
    .unwrap();
    assert_eq!(root.debug_meta("a"), Some((0, 1)));
    assert_eq!(root.debug_meta("b"), Some((1, 2)));
    assert_eq!(root.debug_meta("c"), Some((3, 3)));
    assert_eq!(root.sizeof(), 6);
    assert_eq!(root.get("b").unwrap(), Value::Int(0x0302));
}

#[test]
fn pos_fields_restore_the_cursor() {
    let root = parse(
        r#"
meta:
  id: peeker
seq:
  - id: a
    type: u1
  - id: peeked
    type: u1
    pos: 3
  - id: c
    type: u1
"#,
        &[0x10, 0x20, 0x30, 0x40][..],
    )
    .unwrap();
    assert_eq!(root.get("a").unwrap(), Value::Int(0x10));
    assert_eq!(root.get("peeked").unwrap(), Value::Int(0x40));
    // `pos` did not disturb the sequential cursor.
    assert_eq!(root.get("c").unwrap(), Value::Int(0x20));
    assert_eq!(root.debug_meta("peeked"), Some((3, 1)));
}

#[test]
fn false_guard_suppresses_the_field_without_consuming_bytes() {
    let root = parse(
        r#"
meta:
  id: guarded
seq:
  - id: kind
    type: u1
  - id: extra
    type: u1
    if: kind == 0xff
  - id: tail
    type: u1
"#,
        &[0x00, 0xaa][..],
    )
    .unwrap();
    assert_eq!(root.get("extra").unwrap(), Value::Absent);
    assert!(!root.is_present("extra").unwrap());
    assert_eq!(root.get("tail").unwrap(), Value::Int(0xaa));
    assert_eq!(root.debug_meta("extra"), Some((1, 0)));
}

#[test]
fn endianness_round_trips_for_every_width() {
    init_logs();
    let schema_src = r#"
meta:
  id: nums
seq:
  - id: a
    type: u2le
  - id: b
    type: u2be
  - id: c
    type: u4le
  - id: d
    type: s4be
  - id: e
    type: s8le
  - id: f
    type: f4be
  - id: g
    type: f8le
"#;
    let mut buf = Vec::new();
    buf.extend_from_slice(&0xbeefu16.to_le_bytes());
    buf.extend_from_slice(&0xbeefu16.to_be_bytes());
    buf.extend_from_slice(&0xdead_beefu32.to_le_bytes());
    buf.extend_from_slice(&(-123_456i32).to_be_bytes());
    buf.extend_from_slice(&(-1i64).to_le_bytes());
    buf.extend_from_slice(&1.5f32.to_be_bytes());
    buf.extend_from_slice(&(-2.25f64).to_le_bytes());

    let root = parse(schema_src, buf).unwrap();
    assert_eq!(root.get("a").unwrap(), Value::Int(0xbeef));
    assert_eq!(root.get("b").unwrap(), Value::Int(0xbeef));
    assert_eq!(root.get("c").unwrap(), Value::Int(0xdead_beef));
    assert_eq!(root.get("d").unwrap(), Value::Int(-123_456));
    assert_eq!(root.get("e").unwrap(), Value::Int(-1));
    assert_eq!(root.get("f").unwrap(), Value::Float(1.5));
    assert_eq!(root.get("g").unwrap(), Value::Float(-2.25));
}

#[test]
fn end_of_stream_carries_path_and_offset() {
    let err = parse(
        r#"
meta:
  id: short
  endian: le
seq:
  - id: a
    type: u4
"#,
        &[0x01, 0x02][..],
    )
    .unwrap_err();
    match err {
        Error::Parse(pe) => {
            assert!(matches!(pe.kind, ParseErrorKind::EndOfStream { needed: 4, .. }));
            assert_eq!(pe.path, "short.a");
            assert_eq!(pe.offset, 0);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn repeat_expr_and_eos() {
    let root = parse(
        r#"
meta:
  id: rep
  endian: le
seq:
  - id: count
    type: u1
  - id: head
    type: u2
    repeat: expr
    repeat-expr: count
  - id: rest
    type: u1
    repeat: eos
"#,
        &[0x02, 0x01, 0x00, 0x02, 0x00, 0xaa, 0xbb, 0xcc][..],
    )
    .unwrap();
    let head = root.get("head").unwrap();
    match &head {
        Value::Array(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], Value::Int(1));
            assert_eq!(items[1], Value::Int(2));
        }
        other => panic!("expected array, got {other:?}"),
    }
    match root.get("rest").unwrap() {
        Value::Array(items) => assert_eq!(items.len(), 3),
        other => panic!("expected array, got {other:?}"),
    }
}

#[test]
fn repeat_eos_with_misaligned_tail_fails() {
    let err = parse(
        r#"
meta:
  id: rep
  endian: le
seq:
  - id: entries
    type: u2
    repeat: eos
"#,
        &[0x01, 0x00, 0x02][..],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(pe) if matches!(pe.kind, ParseErrorKind::EndOfStream { .. })
    ));
}

#[test]
fn enums_wrap_values_and_compare_numerically() {
    let src = r#"
meta:
  id: colors
seq:
  - id: first
    type: u1
    enum: color
  - id: second
    type: u1
    enum: color
enums:
  color:
    1: red
    2: green
"#;
    let root = parse(src, &[0x01, 0x05][..]).unwrap();
    let first = root.get("first").unwrap();
    assert_eq!(first, Value::Int(1));
    match &first {
        Value::Enum(e) => {
            assert_eq!(&*e.enum_name, "color");
            assert_eq!(e.label.as_deref(), Some("red"));
        }
        other => panic!("expected enum, got {other:?}"),
    }
    // Lookup miss keeps the raw integer but remembers the enum.
    match root.get("second").unwrap() {
        Value::Enum(e) => {
            assert_eq!(e.label, None);
            assert_eq!(e.value, 5);
        }
        other => panic!("expected enum, got {other:?}"),
    }

    assert_eq!(
        binform::eval_expression(&root, "first == color::red").unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        binform::eval_expression(&root, "first == 1").unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn strict_enums_reject_unmapped_values() {
    let src = r#"
meta:
  id: colors
seq:
  - id: c
    type: u1
    enum: color
enums:
  color:
    1: red
"#;
    let schema = compile_schema(src, &CompileOptions::default()).unwrap();
    let mut options = ParseOptions {
        strict_enums: true,
        ..ParseOptions::default()
    };
    let err = parse_with_options(&schema, &[0x07][..], &mut options).unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(pe) if matches!(pe.kind, ParseErrorKind::InvalidEnumValue { value: 7, .. })
    ));
}

#[test]
fn strz_reads_to_the_terminator() {
    let root = parse(
        r#"
meta:
  id: names
seq:
  - id: name
    type: strz
    encoding: ASCII
  - id: after
    type: u1
"#,
        &b"abc\0Z"[..],
    )
    .unwrap();
    assert_eq!(root.get("name").unwrap(), Value::Str("abc".into()));
    assert_eq!(root.get("after").unwrap(), Value::Int(b'Z' as i128));
}

#[test]
fn strz_inside_a_sized_region() {
    let src = r#"
meta:
  id: names
seq:
  - id: name
    type: strz
    size: 8
    encoding: ASCII
  - id: after
    type: u1
"#;
    let root = parse(src, &b"abc\0wxyzQ"[..]).unwrap();
    assert_eq!(root.get("name").unwrap(), Value::Str("abc".into()));
    // The sized region is consumed in full regardless of the terminator.
    assert_eq!(root.get("after").unwrap(), Value::Int(b'Q' as i128));

    // No terminator in the region: fatal by default ...
    let err = parse(src, &b"abcdwxyzQ"[..]).unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(pe) if matches!(pe.kind, ParseErrorKind::EndOfStream { .. })
    ));

    // ... unless eos-error is disabled.
    let relaxed = r#"
meta:
  id: names
seq:
  - id: name
    type: strz
    size: 8
    encoding: ASCII
    eos-error: false
"#;
    let root = parse(relaxed, &b"abcdwxyz"[..]).unwrap();
    assert_eq!(root.get("name").unwrap(), Value::Str("abcdwxyz".into()));
}

#[test]
fn pad_right_strips_sized_bytes_and_strings() {
    let root = parse(
        r#"
meta:
  id: padded
seq:
  - id: name
    type: str
    size: 8
    encoding: ASCII
    pad-right: 0x20
"#,
        &b"hello   "[..],
    )
    .unwrap();
    assert_eq!(root.get("name").unwrap(), Value::Str("hello".into()));
}

#[test]
fn utf16_decoding() {
    let root = parse(
        r#"
meta:
  id: wide
seq:
  - id: s
    type: str
    size: 8
    encoding: UTF-16LE
"#,
        &[0x48, 0x00, 0x69, 0x00, 0x21, 0x00, 0x2e, 0x00][..],
    )
    .unwrap();
    assert_eq!(root.get("s").unwrap(), Value::Str("Hi!.".into()));

    let err = parse(
        r#"
meta:
  id: bad
seq:
  - id: s
    size: 2
    type: str
    encoding: ASCII
"#,
        &[0xff, 0xfe][..],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(pe) if matches!(pe.kind, ParseErrorKind::Encoding { .. })
    ));
}

#[test]
fn user_types_get_parent_root_and_a_bounded_io() {
    let src = r#"
meta:
  id: outer
  endian: le
seq:
  - id: header
    size: 4
    type: header
  - id: tail
    type: u1
types:
  header:
    seq:
      - id: a
        type: u2
"#;
    let root = parse(src, &[0x01, 0x00, 0xff, 0xff, 0x7a][..]).unwrap();
    let header = root.get("header").unwrap().as_obj().unwrap();
    assert_eq!(header.get("a").unwrap(), Value::Int(1));
    // The substream is bounded to the declared size.
    assert_eq!(header.io().borrow().size(), 4);
    assert_eq!(header.sizeof(), 4);
    // Parent and root point back at the enclosing object.
    assert!(std::rc::Rc::ptr_eq(&header.parent().unwrap(), &root));
    assert!(std::rc::Rc::ptr_eq(&header.root().unwrap(), &root));
    // The enclosing stream skipped the whole extent.
    assert_eq!(root.get("tail").unwrap(), Value::Int(0x7a));
}

#[test]
fn io_redirects_a_field_to_another_stream() {
    let src = r#"
meta:
  id: redirect
seq:
  - id: blob
    size: 4
    type: container
instances:
  third:
    io: blob._io
    pos: 2
    type: u1
types:
  container:
    seq:
      - id: first
        type: u1
"#;
    let root = parse(src, &[0x0a, 0x0b, 0x0c, 0x0d][..]).unwrap();
    assert_eq!(root.get("third").unwrap(), Value::Int(0x0c));
    // The redirected stream's cursor was restored.
    let blob = root.get("blob").unwrap().as_obj().unwrap();
    assert_eq!(blob.io().borrow().pos(), 1);
}

#[test]
fn process_xor_transforms_the_extent_before_parsing() {
    let root = parse(
        r#"
meta:
  id: scrambled
  endian: le
seq:
  - id: body
    size: 2
    process: xor(0xff)
    type: payload
types:
  payload:
    seq:
      - id: v
        type: u2
"#,
        &[0xfe, 0xff][..],
    )
    .unwrap();
    let body = root.get("body").unwrap().as_obj().unwrap();
    assert_eq!(body.get("v").unwrap(), Value::Int(1));
}

#[test]
fn unknown_process_fails_the_parse() {
    let err = parse(
        r#"
meta:
  id: scrambled
seq:
  - id: body
    size: 2
    process: quantum_decrypt(4)
"#,
        &[0x00, 0x00][..],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(pe) if matches!(pe.kind, ParseErrorKind::UnknownProcess(_))
    ));
}

#[test]
fn repeated_parses_are_deterministic_and_equivalent() {
    let src = r#"
meta:
  id: det
  endian: le
seq:
  - id: n
    type: u1
  - id: items
    type: u2
    repeat: expr
    repeat-expr: n
"#;
    let data = &[0x02, 0x01, 0x00, 0x02, 0x00][..];

    let schema = compile_schema(src, &CompileOptions::default()).unwrap();
    let a = parse_with_schema(&schema, data).unwrap();
    let b = parse_with_schema(&schema, data).unwrap();
    let c = parse(src, data).unwrap();

    let render = |root: &binform::ObjRef| Value::Obj(root.clone()).to_json();
    assert_eq!(render(&a), render(&b));
    assert_eq!(render(&a), render(&c));
}

#[test]
fn value_instances_memoize_and_detect_cycles() {
    let src = r#"
meta:
  id: inst
seq:
  - id: x
    type: u1
instances:
  doubled:
    value: x * 2
  a:
    value: b
  b:
    value: a
"#;
    let root = parse(src, &[0x15][..]).unwrap();
    assert_eq!(root.get("doubled").unwrap(), Value::Int(0x2a));
    assert_eq!(root.get("doubled").unwrap(), Value::Int(0x2a));

    let err = root.get("a").unwrap_err();
    assert!(err.to_string().contains("circular"), "{err}");
}

#[test]
fn positioned_instances_read_lazily_and_restore_position() {
    let src = r#"
meta:
  id: lazyread
seq:
  - id: ofs
    type: u1
instances:
  target:
    pos: ofs
    type: u1
"#;
    let root = parse(src, &[0x03, 0xaa, 0xbb, 0xcc][..]).unwrap();
    // Nothing read yet beyond the sequence.
    assert_eq!(root.io().borrow().pos(), 1);
    assert_eq!(root.get("target").unwrap(), Value::Int(0xcc));
    assert_eq!(root.io().borrow().pos(), 1);
    assert_eq!(root.debug_meta("target"), Some((3, 1)));
}
