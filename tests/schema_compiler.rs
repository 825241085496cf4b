use binform::{compile_schema, CompileOptions, Error, SchemaError};

fn compile(src: &str) -> Result<std::sync::Arc<binform::CompiledSchema>, Error> {
    compile_schema(src, &CompileOptions::default())
}

#[test]
fn minimal_schema_compiles() {
    let schema = compile(
        r#"
meta:
  id: minimal
seq:
  - id: one
    type: u1
"#,
    )
    .unwrap();
    assert_eq!(schema.meta().id, "minimal");
    assert_eq!(schema.root_type().seq.len(), 1);
}

#[test]
fn missing_meta_id_is_a_shape_error() {
    let err = compile("seq:\n  - id: x\n    type: u1\n").unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Shape { .. })), "{err}");

    let err = compile("meta:\n  endian: le\n").unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Shape { .. })), "{err}");
}

#[test]
fn invalid_yaml_is_a_syntax_error() {
    let err = compile("meta: [unclosed").unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Syntax(_))), "{err}");
}

#[test]
fn unknown_keys_error_under_strict_mode() {
    let src = r#"
meta:
  id: k
seq:
  - id: x
    type: u1
    flavor: vanilla
"#;
    assert!(compile(src).is_ok());

    let strict = CompileOptions {
        strict: true,
        ..CompileOptions::default()
    };
    let err = compile_schema(src, &strict).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Shape { .. })), "{err}");
}

#[test]
fn unknown_user_type_is_reported_with_its_path() {
    let err = compile(
        r#"
meta:
  id: k
seq:
  - id: hdr
    type: no_such_type
"#,
    )
    .unwrap_err();
    match err {
        Error::Schema(SchemaError::UnknownType { name, path }) => {
            assert_eq!(name, "no_such_type");
            assert!(path.contains("seq[0]"), "path was {path}");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn nested_type_lookup_walks_outward() {
    let schema = compile(
        r#"
meta:
  id: outer
seq:
  - id: a
    type: middle
types:
  shared:
    seq:
      - id: v
        type: u1
  middle:
    seq:
      - id: inner_field
        type: deep
    types:
      deep:
        seq:
          - id: s
            type: shared
"#,
    )
    .unwrap();
    // `deep` resolves `shared` two scopes up.
    assert_eq!(schema.meta().id, "outer");
}

#[test]
fn parameter_arity_is_checked_at_the_call_site() {
    let err = compile(
        r#"
meta:
  id: k
seq:
  - id: body
    type: 'pair(1)'
types:
  pair:
    params:
      - id: a
      - id: b
    seq:
      - id: v
        type: u1
"#,
    )
    .unwrap_err();
    match err {
        Error::Schema(SchemaError::ParameterArity { expected, given, name, .. }) => {
            assert_eq!((expected, given), (2, 1));
            assert_eq!(name, "pair");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn malformed_expressions_carry_offsets() {
    let err = compile(
        r#"
meta:
  id: k
seq:
  - id: x
    type: u1
  - id: y
    type: u1
    if: 'x == '
"#,
    )
    .unwrap_err();
    match err {
        Error::Schema(SchemaError::ExpressionSyntax { text, offset, .. }) => {
            assert_eq!(text, "x == ");
            assert!(offset >= 4, "offset {offset}");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn multi_byte_primitive_requires_endianness() {
    let err = compile(
        r#"
meta:
  id: k
seq:
  - id: x
    type: u2
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Shape { .. })), "{err}");

    // An explicit suffix or meta.endian both fix it.
    compile("meta:\n  id: k\nseq:\n  - id: x\n    type: u2be\n").unwrap();
    compile("meta:\n  id: k\n  endian: le\nseq:\n  - id: x\n    type: u2\n").unwrap();
}

#[test]
fn str_needs_an_extent() {
    let err = compile(
        r#"
meta:
  id: k
seq:
  - id: s
    type: str
    encoding: ASCII
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Shape { .. })), "{err}");
}

#[test]
fn imports_resolve_against_caller_supplied_sources() {
    let common = r#"
meta:
  id: shared_header
seq:
  - id: magic
    type: u1
"#;
    let main = r#"
meta:
  id: main_format
  imports:
    - common/shared
seq:
  - id: hdr
    type: shared_header
"#;
    let mut options = CompileOptions::default();
    options
        .imports
        .insert("common/shared".to_string(), common.to_string());
    compile_schema(main, &options).unwrap();

    // Without the import source the reference cannot resolve.
    let err = compile(main).unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::UnknownType { .. })), "{err}");
}

#[test]
fn contents_forms_normalize_to_bytes() {
    let schema = compile(
        r#"
meta:
  id: k
seq:
  - id: a
    contents: GIF
  - id: b
    contents: [0x47, 73, "F"]
  - id: c
    contents: 0x47
"#,
    )
    .unwrap();
    let root = schema.root_type();
    assert_eq!(root.seq[0].contents.as_deref(), Some(&b"GIF"[..]));
    assert_eq!(root.seq[1].contents.as_deref(), Some(&b"GIF"[..]));
    assert_eq!(root.seq[2].contents.as_deref(), Some(&b"G"[..]));
}

#[test]
fn switchable_endianness_is_rejected() {
    let err = compile(
        r#"
meta:
  id: k
  endian:
    switch-on: some_field
    cases:
      1: le
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::Shape { .. })), "{err}");
}
