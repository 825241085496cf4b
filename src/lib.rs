//! binform: a data-driven interpreter for declarative binary format
//! schemas.
//!
//! A schema (YAML, Kaitai-Struct-compatible) describes a binary format as
//! typed sequences, conditional fields, repetitions, switch types and lazy
//! instances. [`compile_schema`] lowers it once into an immutable
//! [`CompiledSchema`]; [`parse_with_schema`] interprets it over any number
//! of byte buffers, producing a navigable tree of [`Value`]s with
//! `_parent`/`_root`/`_io` handles and per-field byte ranges for debuggers.
//!
//! ```
//! let schema = "
//! meta:
//!   id: gif_header
//! seq:
//!   - id: magic
//!     contents: GIF
//!   - id: version
//!     type: str
//!     size: 3
//!     encoding: ASCII
//! ";
//! let root = binform::parse(schema, &b"GIF89a"[..]).unwrap();
//! assert_eq!(root.get("version").unwrap(), binform::Value::Str("89a".into()));
//! ```

pub mod error;
pub mod expr;
pub mod interp;
pub mod schema;
pub mod stream;
pub mod value;

use std::sync::Arc;

use bytes::Bytes;
use log::debug;

pub use error::{Error, ExprError, ParseError, ParseErrorKind, Result, SchemaError};
pub use expr::EvalContext;
pub use interp::{EventSink, ParseEvent, ParseOptions, Processor};
pub use schema::{CompileOptions, CompiledSchema};
pub use stream::{ByteStream, Endian};
pub use value::{ObjRef, ParsedObj, Value};

/// Compile schema text into an immutable, shareable [`CompiledSchema`].
///
/// The result may be reused across any number of parses, concurrently.
pub fn compile_schema(source: &str, options: &CompileOptions) -> Result<Arc<CompiledSchema>> {
    schema::compile(source, options)
}

/// Interpret a compiled schema over a byte buffer.
pub fn parse_with_schema(
    schema: &Arc<CompiledSchema>,
    buffer: impl Into<Bytes>,
) -> Result<ObjRef> {
    parse_with_options(schema, buffer, &mut ParseOptions::default())
}

/// [`parse_with_schema`] with an event sink, enum strictness, and custom
/// `process` handlers.
pub fn parse_with_options(
    schema: &Arc<CompiledSchema>,
    buffer: impl Into<Bytes>,
    options: &mut ParseOptions<'_>,
) -> Result<ObjRef> {
    let buffer = buffer.into();
    debug!(
        "parsing {} byte(s) with schema `{}`",
        buffer.len(),
        schema.meta().id
    );
    interp::parse_buffer(schema, buffer, options)
}

/// Compile and parse in one call.
pub fn parse(source: &str, buffer: impl Into<Bytes>) -> Result<ObjRef> {
    let schema = compile_schema(source, &CompileOptions::default())?;
    parse_with_schema(&schema, buffer)
}

/// Evaluate an expression against a completed parse tree — the REPL
/// contract used by external tools. The expression sees the given object's
/// fields, enum tables, and navigation handles.
pub fn eval_expression(obj: &ObjRef, text: &str) -> Result<Value> {
    let ast = expr::parse_expression_source(text).map_err(|(offset, message)| {
        SchemaError::ExpressionSyntax {
            path: "<repl>".to_string(),
            text: text.to_string(),
            offset,
            message,
        }
    })?;
    expr::eval(&ast, &EvalContext::new(obj.clone()))
}
