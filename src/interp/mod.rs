//! Type interpreter: drives a compiled schema over a byte stream and builds
//! the parse tree.
//!
//! Per-field protocol (sequence fields and positioned instances share it):
//!
//! ```text
//! START → (eval if) ──false──→ ABSENT
//!       └─true─→ SELECT_IO → APPLY_POS → SIZE → DISPATCH → REPEAT?
//!               → RESTORE_POS → DONE
//! ```
//!
//! `if`, `io` and `pos` apply once per field; `size` establishes a fresh
//! bounded substream per repeated element. Instances run the same protocol
//! lazily on first access, always restoring the stream position.

pub mod events;
pub mod process;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use log::trace;

use crate::error::{Error, ExprError, ParseError, ParseErrorKind, SchemaError};
use crate::expr::ast::Expr;
use crate::expr::eval::{eval, EvalContext};
use crate::schema::model::{CompiledSchema, DataType, FieldDef, Repeat};
use crate::stream::{ByteStream, Endian};
use crate::value::{EnumValue, InstanceState, ObjRef, ParsedObj, SeqSlot, StreamRef, Value};

pub use events::{EventSink, ParseEvent};
pub use process::Processor;

/// Options accepted by the parse entry points.
#[derive(Default)]
pub struct ParseOptions<'a> {
    /// When set, the interpreter reports a depth-first event stream.
    pub sink: Option<&'a mut dyn EventSink>,
    /// Fail on integers that have no mapping in the field's enum; the
    /// default keeps the raw value tagged with the enum name.
    pub strict_enums: bool,
    /// Caller-registered `process` handlers; consulted before the builtin
    /// `xor`/`rol`/`ror`.
    pub processors: HashMap<String, Box<dyn Processor>>,
}

pub fn parse_buffer(
    schema: &Arc<CompiledSchema>,
    buffer: Bytes,
    opts: &mut ParseOptions<'_>,
) -> Result<ObjRef, Error> {
    let io: StreamRef = Rc::new(RefCell::new(ByteStream::new(buffer)));
    let root = ParsedObj::new_root(schema.clone(), io);
    let mut state = ParseState { opts };
    match state.parse_object(&root) {
        Ok(()) => {
            state.emit_with(|| ParseEvent::Complete);
            Ok(root)
        }
        Err(e) => {
            if let Error::Parse(pe) = &e {
                let (path, offset, message) = (pe.path.clone(), pe.offset, pe.kind.to_string());
                state.emit_with(|| ParseEvent::Error {
                    path,
                    offset,
                    error: message,
                });
            }
            Err(e)
        }
    }
}

struct ParseState<'s, 'a> {
    opts: &'s mut ParseOptions<'a>,
}

impl ParseState<'_, '_> {
    fn emit_with(&mut self, event: impl FnOnce() -> ParseEvent) {
        if let Some(sink) = self.opts.sink.as_mut() {
            sink.on_event(event());
        }
    }

    fn err(&self, kind: ParseErrorKind, path: &str, offset: usize) -> Error {
        ParseError {
            kind,
            path: path.to_string(),
            offset,
        }
        .into()
    }

    fn eval_ctx(
        &self,
        expr: &Expr,
        ctx: &EvalContext,
        path: &str,
        stream: &StreamRef,
    ) -> Result<Value, Error> {
        let offset = stream.borrow().pos();
        eval(expr, ctx).map_err(|e| e.with_field_context(path, offset))
    }

    fn eval_bool(
        &self,
        expr: &Expr,
        ctx: &EvalContext,
        path: &str,
        stream: &StreamRef,
    ) -> Result<bool, Error> {
        let offset = stream.borrow().pos();
        self.eval_ctx(expr, ctx, path, stream)?
            .as_bool()
            .map_err(|e| e.with_field_context(path, offset))
    }

    fn eval_usize(
        &self,
        expr: &Expr,
        ctx: &EvalContext,
        path: &str,
        stream: &StreamRef,
    ) -> Result<usize, Error> {
        let offset = stream.borrow().pos();
        self.eval_ctx(expr, ctx, path, stream)?
            .as_usize()
            .map_err(|e| e.with_field_context(path, offset))
    }

    fn parse_object(&mut self, obj: &ObjRef) -> Result<(), Error> {
        trace!("parsing `{}` as {}", obj.path(), obj.type_name());
        let td = obj.type_def();
        for field in &td.seq {
            self.parse_field(obj, field)?;
        }
        obj.end.set(obj.io.borrow().pos());
        Ok(())
    }

    fn parse_field(&mut self, obj: &ObjRef, field: &FieldDef) -> Result<(), Error> {
        let path = format!("{}.{}", obj.path(), field.id);
        let ctx = EvalContext::new(obj.clone());

        if let Some(cond) = &field.cond {
            if !self.eval_bool(cond, &ctx, &path, &obj.io)? {
                let offset = obj.io.borrow().pos();
                obj.slots.borrow_mut().push(SeqSlot {
                    id: field.id.clone(),
                    value: Value::Absent,
                    start: offset,
                    len: 0,
                });
                self.emit_with(|| ParseEvent::FieldEnter {
                    path: path.clone(),
                    field_name: field.id.clone(),
                    offset,
                    size: Some(0),
                });
                self.emit_with(|| ParseEvent::FieldExit {
                    path: path.clone(),
                    field_name: field.id.clone(),
                    offset,
                    size: 0,
                    value: serde_json::Value::Null,
                });
                trace!("field `{path}` suppressed by `if`");
                return Ok(());
            }
        }

        let stream = self.select_stream(obj, field, &ctx, &path)?;
        let saved_pos = self.apply_pos(field, &ctx, &path, &stream)?;

        let start = stream.borrow().pos();
        self.emit_with(|| ParseEvent::FieldEnter {
            path: path.clone(),
            field_name: field.id.clone(),
            offset: start,
            size: None,
        });

        let value = self.read_with_repeat(obj, field, &stream, &path)?;
        let end = stream.borrow().pos();

        if let Some(saved) = saved_pos {
            stream.borrow_mut().seek(saved);
        }

        self.emit_with(|| ParseEvent::FieldExit {
            path: path.clone(),
            field_name: field.id.clone(),
            offset: start,
            size: end - start,
            value: value.to_json(),
        });
        trace!("field `{path}` = {value:?} [{start}..{end})");

        obj.slots.borrow_mut().push(SeqSlot {
            id: field.id.clone(),
            value,
            start,
            len: end - start,
        });
        Ok(())
    }

    fn select_stream(
        &mut self,
        obj: &ObjRef,
        field: &FieldDef,
        ctx: &EvalContext,
        path: &str,
    ) -> Result<StreamRef, Error> {
        match &field.io {
            Some(io_expr) => {
                let offset = obj.io.borrow().pos();
                self.eval_ctx(io_expr, ctx, path, &obj.io)?
                    .as_stream()
                    .map_err(|e| e.with_field_context(path, offset))
            }
            None => Ok(obj.io.clone()),
        }
    }

    fn apply_pos(
        &mut self,
        field: &FieldDef,
        ctx: &EvalContext,
        path: &str,
        stream: &StreamRef,
    ) -> Result<Option<usize>, Error> {
        match &field.pos {
            Some(pos_expr) => {
                let target = self.eval_usize(pos_expr, ctx, path, stream)?;
                let saved = stream.borrow().pos();
                stream.borrow_mut().seek(target);
                Ok(Some(saved))
            }
            None => Ok(None),
        }
    }

    fn read_with_repeat(
        &mut self,
        obj: &ObjRef,
        field: &FieldDef,
        stream: &StreamRef,
        path: &str,
    ) -> Result<Value, Error> {
        match &field.repeat {
            None => self.parse_once(obj, field, stream, path, None),
            Some(Repeat::Expr(count_expr)) => {
                let ctx = EvalContext::new(obj.clone());
                let count = self.eval_usize(count_expr, &ctx, path, stream)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let elem_path = format!("{path}[{i}]");
                    items.push(self.parse_once(obj, field, stream, &elem_path, Some(i))?);
                }
                Ok(Value::Array(Rc::new(items)))
            }
            Some(Repeat::Eos) => {
                let mut items = Vec::new();
                let mut i = 0;
                while !stream.borrow().is_eof() {
                    let elem_path = format!("{path}[{i}]");
                    items.push(self.parse_once(obj, field, stream, &elem_path, Some(i))?);
                    i += 1;
                }
                Ok(Value::Array(Rc::new(items)))
            }
            Some(Repeat::Until(cond)) => {
                let mut items = Vec::new();
                let mut i = 0;
                loop {
                    let elem_path = format!("{path}[{i}]");
                    let elem = self.parse_once(obj, field, stream, &elem_path, Some(i))?;
                    items.push(elem.clone());
                    let ctx = EvalContext::with_element(obj.clone(), elem, i);
                    if self.eval_bool(cond, &ctx, &elem_path, stream)? {
                        break;
                    }
                    i += 1;
                }
                Ok(Value::Array(Rc::new(items)))
            }
        }
    }

    /// Steps 4-6 of the protocol for a single element: establish the byte
    /// extent, apply `process`, verify `contents`, dispatch on the type
    /// designator, and wrap through the field's enum.
    fn parse_once(
        &mut self,
        obj: &ObjRef,
        field: &FieldDef,
        stream: &StreamRef,
        path: &str,
        index: Option<usize>,
    ) -> Result<Value, Error> {
        let ctx = match index {
            Some(i) => EvalContext::with_index(obj.clone(), i),
            None => EvalContext::new(obj.clone()),
        };

        let mut extent = self.establish_extent(field, &ctx, path, stream)?;

        if let Some(spec) = &field.process {
            extent = Some(self.apply_process(spec, extent, &ctx, path, stream)?);
        }

        if let Some(expected) = &field.contents {
            let eff = extent.as_ref().unwrap_or(stream);
            let offset = eff.borrow().pos();
            let actual = eff
                .borrow_mut()
                .read_bytes(expected.len())
                .map_err(|k| self.err(k, path, offset))?;
            if actual.as_ref() != expected.as_slice() {
                return Err(self.err(
                    ParseErrorKind::ContentsMismatch {
                        expected: expected.clone(),
                        actual: actual.to_vec(),
                    },
                    path,
                    offset,
                ));
            }
            return Ok(Value::Bytes(actual));
        }

        let value = self.dispatch(obj, field, &field.data, stream, &extent, &ctx, path)?;
        self.wrap_enum(field, value, path, stream)
    }

    fn establish_extent(
        &mut self,
        field: &FieldDef,
        ctx: &EvalContext,
        path: &str,
        stream: &StreamRef,
    ) -> Result<Option<StreamRef>, Error> {
        if let Some(size_expr) = &field.size {
            let n = self.eval_usize(size_expr, ctx, path, stream)?;
            let offset = stream.borrow().pos();
            let sub = stream
                .borrow()
                .substream(offset, n)
                .map_err(|k| self.err(k, path, offset))?;
            stream.borrow_mut().seek(offset + n);
            Ok(Some(Rc::new(RefCell::new(sub))))
        } else if field.size_eos {
            let offset = stream.borrow().pos();
            let n = stream.borrow().remaining();
            let sub = stream
                .borrow()
                .substream(offset, n)
                .map_err(|k| self.err(k, path, offset))?;
            stream.borrow_mut().seek(offset + n);
            Ok(Some(Rc::new(RefCell::new(sub))))
        } else {
            Ok(None)
        }
    }

    fn apply_process(
        &mut self,
        spec: &crate::schema::model::ProcessSpec,
        extent: Option<StreamRef>,
        ctx: &EvalContext,
        path: &str,
        stream: &StreamRef,
    ) -> Result<StreamRef, Error> {
        let offset = stream.borrow().pos();
        let extent = extent.ok_or_else(|| {
            Error::from(SchemaError::Shape {
                path: path.to_string(),
                message: "`process` requires a sized field".to_string(),
            })
        })?;
        let raw = extent.borrow_mut().read_bytes_full();
        let args = spec
            .args
            .iter()
            .map(|a| self.eval_ctx(a, ctx, path, stream))
            .collect::<Result<Vec<_>, _>>()?;
        let out = if let Some(processor) = self.opts.processors.get(&spec.name) {
            processor.apply(&raw, &args)
        } else {
            process::run_builtin(&spec.name, &raw, &args)
                .unwrap_or_else(|| Err(ParseErrorKind::UnknownProcess(spec.name.clone())))
        }
        .map_err(|k| self.err(k, path, offset))?;
        Ok(Rc::new(RefCell::new(ByteStream::new(out))))
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        obj: &ObjRef,
        field: &FieldDef,
        data: &DataType,
        stream: &StreamRef,
        extent: &Option<StreamRef>,
        ctx: &EvalContext,
        path: &str,
    ) -> Result<Value, Error> {
        let eff = extent.as_ref().unwrap_or(stream);
        match data {
            DataType::None => {
                let raw = self.read_raw(field, eff, extent.is_some(), path)?;
                Ok(Value::Bytes(raw))
            }
            DataType::UInt { width, endian } => {
                let endian = self.effective_endian(*endian, obj, *width, path)?;
                let offset = eff.borrow().pos();
                let mut s = eff.borrow_mut();
                let v: i128 = match width {
                    1 => i128::from(s.read_u1().map_err(|k| self.err(k, path, offset))?),
                    2 => i128::from(s.read_u2(endian).map_err(|k| self.err(k, path, offset))?),
                    4 => i128::from(s.read_u4(endian).map_err(|k| self.err(k, path, offset))?),
                    _ => i128::from(s.read_u8(endian).map_err(|k| self.err(k, path, offset))?),
                };
                Ok(Value::Int(v))
            }
            DataType::SInt { width, endian } => {
                let endian = self.effective_endian(*endian, obj, *width, path)?;
                let offset = eff.borrow().pos();
                let mut s = eff.borrow_mut();
                let v: i128 = match width {
                    1 => i128::from(s.read_s1().map_err(|k| self.err(k, path, offset))?),
                    2 => i128::from(s.read_s2(endian).map_err(|k| self.err(k, path, offset))?),
                    4 => i128::from(s.read_s4(endian).map_err(|k| self.err(k, path, offset))?),
                    _ => i128::from(s.read_s8(endian).map_err(|k| self.err(k, path, offset))?),
                };
                Ok(Value::Int(v))
            }
            DataType::Float { width, endian } => {
                let endian = self.effective_endian(*endian, obj, *width, path)?;
                let offset = eff.borrow().pos();
                let mut s = eff.borrow_mut();
                let v = if *width == 4 {
                    f64::from(s.read_f4(endian).map_err(|k| self.err(k, path, offset))?)
                } else {
                    s.read_f8(endian).map_err(|k| self.err(k, path, offset))?
                };
                Ok(Value::Float(v))
            }
            DataType::Str { zero_term } => {
                let offset = eff.borrow().pos();
                let raw = self.read_str_raw(field, *zero_term, eff, extent.is_some(), path)?;
                let encoding = field
                    .encoding
                    .as_deref()
                    .or(obj.type_def().encoding.as_deref())
                    .unwrap_or("UTF-8");
                decode_bytes(&raw, encoding)
                    .map(Value::Str)
                    .map_err(|k| self.err(k, path, offset))
            }
            DataType::User { ty, args } => {
                let target = obj.schema.type_def(*ty);
                let mut params = Vec::with_capacity(target.params.len());
                for (param, arg) in target.params.iter().zip(args) {
                    params.push((param.id.clone(), self.eval_ctx(arg, ctx, path, stream)?));
                }
                let name = match ctx.index {
                    Some(i) => format!("{}[{i}]", field.id),
                    None => field.id.clone(),
                };
                let child_io = eff.clone();
                let child = ParsedObj::new_child(obj, name, *ty, child_io, params);
                self.parse_object(&child)?;
                if let Some(ext) = extent {
                    // The enclosing stream gave this object its whole
                    // extent; `_sizeof` covers it even if the sequence left
                    // a tail unread.
                    child.start.set(0);
                    child.end.set(ext.borrow().size());
                }
                Ok(Value::Obj(child))
            }
            DataType::Switch { on, cases, default } => {
                let disc = self.eval_ctx(on, ctx, path, stream)?;
                for case in cases {
                    let key = self.eval_ctx(&case.key, ctx, path, stream)?;
                    if key == disc {
                        return self.dispatch(obj, field, &case.target, stream, extent, ctx, path);
                    }
                }
                if let Some(target) = default {
                    return self.dispatch(obj, field, target, stream, extent, ctx, path);
                }
                match extent {
                    // A sized extent bounds the damage: yield the raw bytes.
                    Some(ext) => Ok(Value::Bytes(ext.borrow_mut().read_bytes_full())),
                    None => Err(self.err(
                        ParseErrorKind::NoSwitchMatch {
                            discriminant: disc.to_string(),
                        },
                        path,
                        stream.borrow().pos(),
                    )),
                }
            }
        }
    }

    /// Raw `bytes` field: the whole extent, or a terminator-delimited run.
    fn read_raw(
        &mut self,
        field: &FieldDef,
        eff: &StreamRef,
        sized: bool,
        path: &str,
    ) -> Result<Bytes, Error> {
        let offset = eff.borrow().pos();
        let mut raw = if sized {
            eff.borrow_mut().read_bytes_full()
        } else if let Some(term) = field.terminator {
            eff.borrow_mut()
                .read_bytes_term(term, field.include, field.consume, field.eos_error)
                .map_err(|k| self.err(k, path, offset))?
        } else {
            // Unreachable for validated schemas; degrade to the remainder.
            eff.borrow_mut().read_bytes_full()
        };
        if let Some(pad) = field.pad_right {
            raw = strip_right(raw, pad);
        }
        if sized {
            if let Some(term) = field.terminator {
                raw = terminate(raw, term, field.include);
            }
        }
        Ok(raw)
    }

    /// Raw string payload. Inside a sized region the terminator is a stop
    /// condition; `eos-error` controls whether its absence is fatal.
    fn read_str_raw(
        &mut self,
        field: &FieldDef,
        zero_term: bool,
        eff: &StreamRef,
        sized: bool,
        path: &str,
    ) -> Result<Bytes, Error> {
        let offset = eff.borrow().pos();
        let term = field.terminator.or(if zero_term { Some(0) } else { None });
        if sized {
            let mut raw = eff.borrow_mut().read_bytes_full();
            if let Some(pad) = field.pad_right {
                raw = strip_right(raw, pad);
            }
            if let Some(term) = term {
                match raw.iter().position(|&b| b == term) {
                    Some(idx) => raw = raw.slice(..idx + usize::from(field.include)),
                    None if field.eos_error && zero_term => {
                        return Err(self.err(
                            ParseErrorKind::EndOfStream {
                                needed: 1,
                                available: 0,
                            },
                            path,
                            offset,
                        ));
                    }
                    None => {}
                }
            }
            Ok(raw)
        } else if let Some(term) = term {
            eff.borrow_mut()
                .read_bytes_term(term, field.include, field.consume, field.eos_error)
                .map_err(|k| self.err(k, path, offset))
        } else {
            // `str` without size or terminator is rejected at compile time.
            Ok(eff.borrow_mut().read_bytes_full())
        }
    }

    fn wrap_enum(
        &mut self,
        field: &FieldDef,
        value: Value,
        path: &str,
        stream: &StreamRef,
    ) -> Result<Value, Error> {
        let Some(def) = &field.enum_ref else {
            return Ok(value);
        };
        let n = match value {
            Value::Int(n) => n,
            other => return Ok(other),
        };
        match def.by_value.get(&n) {
            Some(label) => Ok(Value::Enum(EnumValue {
                enum_name: Arc::from(def.name.as_str()),
                label: Some(Arc::from(label.as_str())),
                value: n,
            })),
            None if self.opts.strict_enums => Err(self.err(
                ParseErrorKind::InvalidEnumValue {
                    enum_name: def.name.clone(),
                    value: n,
                },
                path,
                stream.borrow().pos(),
            )),
            None => Ok(Value::Enum(EnumValue {
                enum_name: Arc::from(def.name.as_str()),
                label: None,
                value: n,
            })),
        }
    }

    fn effective_endian(
        &self,
        field_endian: Option<Endian>,
        obj: &ObjRef,
        width: u8,
        path: &str,
    ) -> Result<Endian, Error> {
        if width == 1 {
            return Ok(Endian::Le);
        }
        field_endian
            .or(obj.type_def().endian)
            .ok_or_else(|| {
                SchemaError::Shape {
                    path: path.to_string(),
                    message: "multi-byte primitive without endianness".to_string(),
                }
                .into()
            })
    }
}

fn strip_right(raw: Bytes, pad: u8) -> Bytes {
    let end = raw
        .iter()
        .rposition(|&b| b != pad)
        .map(|i| i + 1)
        .unwrap_or(0);
    raw.slice(..end)
}

fn terminate(raw: Bytes, term: u8, include: bool) -> Bytes {
    match raw.iter().position(|&b| b == term) {
        Some(idx) => raw.slice(..idx + usize::from(include)),
        None => raw,
    }
}

/// Decode raw bytes per a schema `encoding` name.
pub(crate) fn decode_bytes(data: &[u8], encoding: &str) -> Result<String, ParseErrorKind> {
    let bad = || ParseErrorKind::Encoding {
        encoding: encoding.to_string(),
    };
    let normalized: String = encoding
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect::<String>()
        .to_ascii_uppercase();
    match normalized.as_str() {
        "UTF8" => std::str::from_utf8(data).map(str::to_string).map_err(|_| bad()),
        "ASCII" | "USASCII" => {
            if data.iter().all(u8::is_ascii) {
                Ok(data.iter().map(|&b| b as char).collect())
            } else {
                Err(bad())
            }
        }
        "ISO88591" | "LATIN1" => Ok(data.iter().map(|&b| b as char).collect()),
        "UTF16LE" | "UTF16BE" => {
            if data.len() % 2 != 0 {
                return Err(bad());
            }
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| {
                    if normalized == "UTF16LE" {
                        u16::from_le_bytes([pair[0], pair[1]])
                    } else {
                        u16::from_be_bytes([pair[0], pair[1]])
                    }
                })
                .collect();
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .map_err(|_| bad())
        }
        _ => Err(bad()),
    }
}

/// Force an instance: evaluate its guard, then its value, memoizing the
/// result. Re-entrant access raises `CircularInstance` instead of looping.
pub(crate) fn force_instance(obj: &ObjRef, name: &str) -> Result<Value, Error> {
    let path = format!("{}.{}", obj.path(), name);
    {
        let instances = obj.instances.borrow();
        match instances.get(name) {
            None => return Err(ExprError::UnknownIdentifier(name.to_string()).into()),
            Some(InstanceState::Done { value, .. }) => return Ok(value.clone()),
            Some(InstanceState::InProgress) => {
                return Err(
                    Error::from(ExprError::CircularInstance(name.to_string()))
                        .with_field_context(&path, obj.io.borrow().pos()),
                );
            }
            Some(InstanceState::Pending) => {}
        }
    }
    let Some(field) = obj.type_def().instance(name) else {
        return Err(ExprError::UnknownIdentifier(name.to_string()).into());
    };

    if let Some(cond) = &field.cond {
        let ctx = EvalContext::new(obj.clone());
        let present = eval(cond, &ctx)
            .and_then(|v| v.as_bool())
            .map_err(|e| e.with_field_context(&path, obj.io.borrow().pos()))?;
        if !present {
            obj.instances.borrow_mut().insert(
                name.to_string(),
                InstanceState::Done {
                    value: Value::Absent,
                    start: 0,
                    len: 0,
                },
            );
            return Ok(Value::Absent);
        }
    }

    obj.instances
        .borrow_mut()
        .insert(name.to_string(), InstanceState::InProgress);

    let result = evaluate_instance(obj, field, &path);
    match result {
        Ok((value, start, len)) => {
            obj.instances.borrow_mut().insert(
                name.to_string(),
                InstanceState::Done {
                    value: value.clone(),
                    start,
                    len,
                },
            );
            Ok(value)
        }
        Err(e) => {
            // Leave the slot retryable; errors are not memoized.
            obj.instances
                .borrow_mut()
                .insert(name.to_string(), InstanceState::Pending);
            Err(e)
        }
    }
}

/// Presence check that evaluates at most the instance's guard.
pub(crate) fn instance_present(obj: &ObjRef, name: &str) -> Result<bool, Error> {
    {
        let instances = obj.instances.borrow();
        if let Some(InstanceState::Done { value, .. }) = instances.get(name) {
            return Ok(!matches!(value, Value::Absent));
        }
    }
    let Some(field) = obj.type_def().instance(name) else {
        return Err(ExprError::UnknownIdentifier(name.to_string()).into());
    };
    let Some(cond) = &field.cond else {
        return Ok(true);
    };
    let path = format!("{}.{}", obj.path(), name);
    let present = eval(cond, &EvalContext::new(obj.clone()))
        .and_then(|v| v.as_bool())
        .map_err(|e| e.with_field_context(&path, obj.io.borrow().pos()))?;
    if !present {
        obj.instances.borrow_mut().insert(
            name.to_string(),
            InstanceState::Done {
                value: Value::Absent,
                start: 0,
                len: 0,
            },
        );
    }
    Ok(present)
}

fn evaluate_instance(
    obj: &ObjRef,
    field: &FieldDef,
    path: &str,
) -> Result<(Value, usize, usize), Error> {
    if let Some(value_expr) = &field.value {
        let ctx = EvalContext::new(obj.clone());
        let value = eval(value_expr, &ctx)
            .map_err(|e| e.with_field_context(path, obj.io.borrow().pos()))?;
        return Ok((value, 0, 0));
    }

    // Positioned instance: run the regular field protocol against the
    // selected stream, always restoring the position afterwards.
    let mut opts = ParseOptions::default();
    let mut state = ParseState { opts: &mut opts };
    let ctx = EvalContext::new(obj.clone());
    let stream = state.select_stream(obj, field, &ctx, path)?;
    let saved = stream.borrow().pos();
    let result = (|| {
        if let Some(pos_expr) = &field.pos {
            let target = state.eval_usize(pos_expr, &ctx, path, &stream)?;
            stream.borrow_mut().seek(target);
        }
        let start = stream.borrow().pos();
        let value = state.read_with_repeat(obj, field, &stream, path)?;
        let end = stream.borrow().pos();
        Ok((value, start, end - start))
    })();
    stream.borrow_mut().seek(saved);
    result
}
