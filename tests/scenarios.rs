//! End-to-end scenarios over realistic format fragments: magic headers,
//! flag-driven instances, sentinel-terminated runs, discriminated chunks,
//! and cross-element forward references.

use binform::{eval_expression, parse, Error, ParseErrorKind, Value};

#[test]
fn magic_and_version() {
    let src = r#"
meta:
  id: gif
seq:
  - id: magic
    contents: GIF
  - id: version
    type: str
    size: 3
    encoding: ASCII
"#;
    let root = parse(src, &b"GIF89a"[..]).unwrap();
    match root.get("magic").unwrap() {
        Value::Bytes(b) => assert_eq!(&b[..], &[0x47, 0x49, 0x46]),
        other => panic!("expected bytes, got {other:?}"),
    }
    assert_eq!(root.get("version").unwrap(), Value::Str("89a".into()));

    let err = parse(src, &b"HIF89a"[..]).unwrap_err();
    match err {
        Error::Parse(pe) => {
            assert_eq!(pe.offset, 0);
            assert!(matches!(pe.kind, ParseErrorKind::ContentsMismatch { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn flag_driven_instances() {
    let src = r#"
meta:
  id: logical_screen_descriptor
seq:
  - id: flags
    type: u1
instances:
  has_color_table:
    value: (flags & 0x80) != 0
  color_table_size:
    value: 2 << (flags & 7)
"#;
    let root = parse(src, &[0x87][..]).unwrap();
    assert_eq!(root.get("has_color_table").unwrap(), Value::Bool(true));
    assert_eq!(root.get("color_table_size").unwrap(), Value::Int(256));
}

#[test]
fn repeat_until_sentinel() {
    let src = r#"
meta:
  id: block_list
seq:
  - id: subblocks
    type: subblock
    repeat: until
    repeat-until: _.num_bytes == 0
types:
  subblock:
    seq:
      - id: num_bytes
        type: u1
      - id: bytes
        size: num_bytes
"#;
    let root = parse(src, &[0x03, 0xaa, 0xbb, 0xcc, 0x00][..]).unwrap();
    let blocks = root.get("subblocks").unwrap();
    let Value::Array(items) = &blocks else {
        panic!("expected array, got {blocks:?}");
    };
    assert_eq!(items.len(), 2);

    let first = items[0].as_obj().unwrap();
    assert_eq!(first.get("num_bytes").unwrap(), Value::Int(3));
    match first.get("bytes").unwrap() {
        Value::Bytes(b) => assert_eq!(&b[..], &[0xaa, 0xbb, 0xcc]),
        other => panic!("expected bytes, got {other:?}"),
    }

    // The element that triggered the stop is included.
    let last = items[1].as_obj().unwrap();
    assert_eq!(last.get("num_bytes").unwrap(), Value::Int(0));
    match last.get("bytes").unwrap() {
        Value::Bytes(b) => assert!(b.is_empty()),
        other => panic!("expected bytes, got {other:?}"),
    }

    assert_eq!(root.sizeof(), 5);
}

#[test]
fn switch_dispatch_on_chunk_id() {
    let src = r#"
meta:
  id: riff
  endian: le
seq:
  - id: chunk_id
    type: str
    size: 4
    encoding: ASCII
  - id: len
    type: u4
  - id: body
    size: len
    type:
      switch-on: chunk_id
      cases:
        '"fmt "': fmt_chunk
        '"data"': data_chunk
types:
  fmt_chunk:
    seq:
      - id: format_tag
        type: u2
      - id: num_channels
        type: u2
  data_chunk:
    seq:
      - id: data
        size-eos: true
"#;

    let mut fmt_input = b"fmt ".to_vec();
    fmt_input.extend_from_slice(&4u32.to_le_bytes());
    fmt_input.extend_from_slice(&[0x01, 0x00, 0x02, 0x00]);
    let root = parse(src, fmt_input).unwrap();
    let body = root.get("body").unwrap().as_obj().unwrap();
    assert_eq!(body.type_name(), "fmt_chunk");
    assert_eq!(body.get("format_tag").unwrap(), Value::Int(1));
    assert_eq!(body.get("num_channels").unwrap(), Value::Int(2));

    let mut data_input = b"data".to_vec();
    data_input.extend_from_slice(&2u32.to_le_bytes());
    data_input.extend_from_slice(&[0xde, 0xad]);
    let root = parse(src, data_input).unwrap();
    let body = root.get("body").unwrap().as_obj().unwrap();
    assert_eq!(body.type_name(), "data_chunk");

    // No case matches, but the size-delimited extent bounds the damage:
    // the field degrades to raw bytes.
    let mut junk_input = b"JUNK".to_vec();
    junk_input.extend_from_slice(&2u32.to_le_bytes());
    junk_input.extend_from_slice(&[0x11, 0x22]);
    let root = parse(src, junk_input).unwrap();
    match root.get("body").unwrap() {
        Value::Bytes(b) => assert_eq!(&b[..], &[0x11, 0x22]),
        other => panic!("expected raw bytes, got {other:?}"),
    }
}

#[test]
fn switch_without_extent_or_default_fails() {
    let src = r#"
meta:
  id: tagged
seq:
  - id: tag
    type: u1
  - id: body
    type:
      switch-on: tag
      cases:
        1: one_byte
types:
  one_byte:
    seq:
      - id: v
        type: u1
"#;
    let err = parse(src, &[0x09, 0x00][..]).unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(pe) if matches!(pe.kind, ParseErrorKind::NoSwitchMatch { .. })
    ));
}

#[test]
fn switch_default_case() {
    let src = r#"
meta:
  id: tagged
seq:
  - id: tag
    type: u1
  - id: body
    type:
      switch-on: tag
      cases:
        1: one
        _: other
types:
  one:
    seq:
      - id: v
        type: u1
  other:
    seq:
      - id: w
        type: u1
"#;
    let root = parse(src, &[0x09, 0x2a][..]).unwrap();
    let body = root.get("body").unwrap().as_obj().unwrap();
    assert_eq!(body.type_name(), "other");
    assert_eq!(body.get("w").unwrap(), Value::Int(0x2a));
}

#[test]
fn lazy_instance_with_false_guard_never_evaluates_its_value() {
    let src = r#"
meta:
  id: lazy
seq:
  - id: x
    type: u1
instances:
  ok:
    value: x * 2
  skip:
    value: no_such_field + 1
    if: false
"#;
    let root = parse(src, &[0x04][..]).unwrap();

    // Enumerating instance names must not evaluate anything.
    assert_eq!(root.field_names(), vec!["x", "ok", "skip"]);

    // The guarded instance is absent; its value expression (which would
    // raise UnknownIdentifierError) never runs.
    assert_eq!(root.get("skip").unwrap(), Value::Absent);
    assert!(!root.is_present("skip").unwrap());
    assert_eq!(root.get("ok").unwrap(), Value::Int(8));
}

#[test]
fn parameterized_type_with_forward_reference() {
    let src = r#"
meta:
  id: resource_file
  endian: le
seq:
  - id: num_resources
    type: u1
  - id: resources
    type: 'resource(_index, _index < num_resources - 1)'
    repeat: expr
    repeat-expr: num_resources
types:
  resource:
    params:
      - id: idx
        type: s4
      - id: has_body
        type: bool
    seq:
      - id: ofs_body
        type: u2
    instances:
      len_body:
        value: _parent.resources[idx + 1].ofs_body - ofs_body
        if: has_body
"#;
    let mut input = vec![0x03u8];
    for ofs in [10u16, 20, 35] {
        input.extend_from_slice(&ofs.to_le_bytes());
    }
    let root = parse(src, input).unwrap();
    let resources = root.get("resources").unwrap();
    let Value::Array(items) = &resources else {
        panic!("expected array");
    };

    let first = items[0].as_obj().unwrap();
    assert_eq!(first.get("len_body").unwrap(), Value::Int(10));
    let second = items[1].as_obj().unwrap();
    assert_eq!(second.get("len_body").unwrap(), Value::Int(15));

    // The sentinel has has_body == false: absent, not an error.
    let last = items[2].as_obj().unwrap();
    assert_eq!(last.get("len_body").unwrap(), Value::Absent);

    // The same access through the expression REPL.
    assert_eq!(
        eval_expression(&root, "resources[0].len_body").unwrap(),
        Value::Int(10)
    );
    assert_eq!(
        eval_expression(&root, "resources[2].len_body").unwrap(),
        Value::Absent
    );
}
