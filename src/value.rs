//! Runtime representation of parsed data.
//!
//! [`Value`] is the tagged variant flowing through the interpreter and the
//! expression evaluator. [`ParsedObj`] is one node of the parse tree: ordered
//! sequence slots, lazily-materialized instance slots, and the hidden
//! navigation handles `_parent`, `_root`, `_io`, `_sizeof`.
//!
//! Ownership: the root object owns the whole tree through its field slots;
//! `_parent` and `_root` are weak back references, so the tree is acyclic
//! for the allocator. The tree is deliberately *not* thread-safe (`Rc`,
//! `RefCell`); the compiled schema it references is.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, ExprError};
use crate::schema::model::{CompiledSchema, TypeDef, TypeId};
use crate::stream::ByteStream;

pub type ObjRef = Rc<ParsedObj>;
pub type StreamRef = Rc<RefCell<ByteStream>>;

#[derive(Clone)]
pub enum Value {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Bytes),
    Array(Rc<Vec<Value>>),
    Obj(ObjRef),
    Stream(StreamRef),
    Enum(EnumValue),
    /// The distinguished value of a field whose `if` evaluated false.
    Absent,
}

/// An integer tagged with the enum it was read through. The label is `None`
/// when the raw value has no mapping; the tag is kept either way so equality
/// against enum constants still works.
#[derive(Clone, Debug)]
pub struct EnumValue {
    pub enum_name: Arc<str>,
    pub label: Option<Arc<str>>,
    pub value: i128,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Obj(_) => "object",
            Value::Stream(_) => "stream",
            Value::Enum(_) => "enum",
            Value::Absent => "absent",
        }
    }

    pub fn as_int(&self) -> Result<i128, Error> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Enum(e) => Ok(e.value),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_usize(&self) -> Result<usize, Error> {
        let n = self.as_int()?;
        usize::try_from(n)
            .map_err(|_| ExprError::TypeMismatch(format!("expected a non-negative size, got {n}")).into())
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }

    pub fn as_stream(&self) -> Result<StreamRef, Error> {
        match self {
            Value::Stream(s) => Ok(s.clone()),
            other => Err(mismatch("stream", other)),
        }
    }

    pub fn as_obj(&self) -> Result<ObjRef, Error> {
        match self {
            Value::Obj(o) => Ok(o.clone()),
            other => Err(mismatch("object", other)),
        }
    }

    /// JSON rendering for external tooling. Objects render their parsed
    /// sequence fields plus instances that happen to be memoized already;
    /// nothing is forced.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Int(n) => match i64::try_from(*n) {
                Ok(v) => Json::from(v),
                Err(_) => Json::String(n.to_string()),
            },
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Str(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|&x| Json::from(x)).collect()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Obj(obj) => obj.to_json(),
            Value::Stream(s) => Json::String(format!("<stream:{}>", s.borrow().size())),
            Value::Enum(e) => match &e.label {
                Some(label) => Json::String(format!("{}::{}", e.enum_name, label)),
                None => Json::from(i64::try_from(e.value).unwrap_or_default()),
            },
            Value::Absent => Json::Null,
        }
    }
}

fn mismatch(expected: &str, got: &Value) -> Error {
    ExprError::TypeMismatch(format!("expected {expected}, got {}", got.kind())).into()
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            (Value::Stream(a), Value::Stream(b)) => Rc::ptr_eq(a, b),
            // Enum-tagged integers compare numerically, both against each
            // other and against raw integers.
            (Value::Enum(a), Value::Enum(b)) => a.value == b.value,
            (Value::Enum(e), Value::Int(n)) | (Value::Int(n), Value::Enum(e)) => e.value == *n,
            (Value::Absent, Value::Absent) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes({b:02x?})"),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Obj(obj) => write!(f, "Obj({})", obj.type_name()),
            Value::Stream(s) => write!(f, "Stream(size={})", s.borrow().size()),
            Value::Enum(e) => match &e.label {
                Some(label) => write!(f, "Enum({}::{} = {})", e.enum_name, label, e.value),
                None => write!(f, "Enum({} = {})", e.enum_name, e.value),
            },
            Value::Absent => write!(f, "Absent"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{b:02x?}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Obj(obj) => write!(f, "<{}>", obj.type_name()),
            Value::Stream(s) => write!(f, "<stream:{}>", s.borrow().size()),
            Value::Enum(e) => match &e.label {
                Some(label) => write!(f, "{}::{}", e.enum_name, label),
                None => write!(f, "{}({})", e.enum_name, e.value),
            },
            Value::Absent => write!(f, "<absent>"),
        }
    }
}

/// One parsed sequence field: the value plus its byte range in the owning
/// object's `_io` (debug metadata for hex viewers and debuggers).
#[derive(Debug)]
pub(crate) struct SeqSlot {
    pub id: String,
    pub value: Value,
    pub start: usize,
    pub len: usize,
}

#[derive(Debug)]
pub(crate) enum InstanceState {
    Pending,
    InProgress,
    Done {
        value: Value,
        start: usize,
        len: usize,
    },
}

pub struct ParsedObj {
    pub(crate) schema: Arc<CompiledSchema>,
    pub(crate) type_id: TypeId,
    /// Display name within the parent (`"header"`, `"resources[2]"`), used
    /// for error paths.
    pub(crate) name: String,
    /// Self-handle so `&self` methods can hand out `ObjRef`s (e.g. into
    /// evaluation contexts).
    pub(crate) this: Weak<ParsedObj>,
    pub(crate) parent: Weak<ParsedObj>,
    pub(crate) root: Weak<ParsedObj>,
    pub(crate) io: StreamRef,
    pub(crate) start: Cell<usize>,
    pub(crate) end: Cell<usize>,
    pub(crate) params: Vec<(String, Value)>,
    pub(crate) slots: RefCell<Vec<SeqSlot>>,
    pub(crate) instances: RefCell<HashMap<String, InstanceState>>,
}

impl ParsedObj {
    pub(crate) fn new_root(schema: Arc<CompiledSchema>, io: StreamRef) -> ObjRef {
        let type_id = schema.root;
        let name = schema.meta.id.clone();
        let instances = Self::pending_instances(&schema, type_id);
        Rc::new_cyclic(|me| ParsedObj {
            schema,
            type_id,
            name,
            this: me.clone(),
            parent: Weak::new(),
            root: me.clone(),
            io,
            start: Cell::new(0),
            end: Cell::new(0),
            params: Vec::new(),
            slots: RefCell::new(Vec::new()),
            instances: RefCell::new(instances),
        })
    }

    pub(crate) fn new_child(
        parent: &ObjRef,
        name: String,
        type_id: TypeId,
        io: StreamRef,
        params: Vec<(String, Value)>,
    ) -> ObjRef {
        let schema = parent.schema.clone();
        let instances = Self::pending_instances(&schema, type_id);
        let start = io.borrow().pos();
        Rc::new_cyclic(|me| ParsedObj {
            schema,
            type_id,
            name,
            this: me.clone(),
            parent: Rc::downgrade(parent),
            root: parent.root.clone(),
            io,
            start: Cell::new(start),
            end: Cell::new(start),
            params,
            slots: RefCell::new(Vec::new()),
            instances: RefCell::new(instances),
        })
    }

    fn pending_instances(
        schema: &Arc<CompiledSchema>,
        type_id: TypeId,
    ) -> HashMap<String, InstanceState> {
        schema
            .type_def(type_id)
            .instances
            .iter()
            .map(|f| (f.id.clone(), InstanceState::Pending))
            .collect()
    }

    pub(crate) fn type_def(&self) -> &TypeDef {
        self.schema.type_def(self.type_id)
    }

    pub fn type_name(&self) -> &str {
        &self.type_def().name
    }

    pub fn parent(&self) -> Option<ObjRef> {
        self.parent.upgrade()
    }

    pub fn root(&self) -> Option<ObjRef> {
        self.root.upgrade()
    }

    pub fn io(&self) -> StreamRef {
        self.io.clone()
    }

    /// Total bytes this object covered in its enclosing stream.
    pub fn sizeof(&self) -> usize {
        self.end.get().saturating_sub(self.start.get())
    }

    /// Defined field names in schema order: sequence fields first, then
    /// instances. Enumerating never evaluates an instance.
    pub fn field_names(&self) -> Vec<String> {
        let td = self.type_def();
        td.seq
            .iter()
            .chain(td.instances.iter())
            .map(|f| f.id.clone())
            .collect()
    }

    fn this(&self) -> Result<ObjRef, Error> {
        self.this
            .upgrade()
            .ok_or_else(|| ExprError::MissingValue("_self".to_string()).into())
    }

    /// Look up a field, parameter, or navigation handle by name. Instances
    /// are forced (and memoized) on first access.
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        match name {
            "_parent" => return Ok(self.parent().map(Value::Obj).unwrap_or(Value::Absent)),
            "_root" => {
                return self
                    .root()
                    .map(Value::Obj)
                    .ok_or_else(|| ExprError::MissingValue("_root".to_string()).into());
            }
            "_io" => return Ok(Value::Stream(self.io.clone())),
            "_sizeof" => return Ok(Value::Int(self.sizeof() as i128)),
            _ => {}
        }
        if let Some((_, v)) = self.params.iter().find(|(n, _)| n == name) {
            return Ok(v.clone());
        }
        if let Some(v) = {
            let slots = self.slots.borrow();
            slots.iter().find(|s| s.id == name).map(|s| s.value.clone())
        } {
            return Ok(v);
        }
        let td = self.type_def();
        if td.instance(name).is_some() {
            return crate::interp::force_instance(&self.this()?, name);
        }
        if td.seq_field(name).is_some() {
            // Declared but not parsed yet: a forward reference from an
            // expression evaluated mid-parse.
            return Err(ExprError::MissingValue(name.to_string()).into());
        }
        Err(ExprError::UnknownIdentifier(name.to_string()).into())
    }

    /// Whether a field is present, evaluating at most its `if` guard --
    /// never its value.
    pub fn is_present(&self, name: &str) -> Result<bool, Error> {
        if self.params.iter().any(|(n, _)| n == name) {
            return Ok(true);
        }
        if let Some(present) = {
            let slots = self.slots.borrow();
            slots
                .iter()
                .find(|s| s.id == name)
                .map(|s| !matches!(s.value, Value::Absent))
        } {
            return Ok(present);
        }
        let td = self.type_def();
        if td.instance(name).is_some() {
            return crate::interp::instance_present(&self.this()?, name);
        }
        if td.seq_field(name).is_some() {
            return Ok(false);
        }
        Err(ExprError::UnknownIdentifier(name.to_string()).into())
    }

    /// Byte range `(start, len)` of a parsed field within this object's
    /// `_io`, when known (sequence fields and memoized positioned
    /// instances).
    pub fn debug_meta(&self, name: &str) -> Option<(usize, usize)> {
        if let Some(range) = {
            let slots = self.slots.borrow();
            slots.iter().find(|s| s.id == name).map(|s| (s.start, s.len))
        } {
            return Some(range);
        }
        match self.instances.borrow().get(name) {
            Some(InstanceState::Done { start, len, .. }) => Some((*start, *len)),
            _ => None,
        }
    }

    /// Error path from the root to this object.
    pub(crate) fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}.{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for slot in self.slots.borrow().iter() {
            map.insert(slot.id.clone(), slot.value.to_json());
        }
        for field in &self.type_def().instances {
            if let Some(InstanceState::Done { value, .. }) = self.instances.borrow().get(&field.id)
            {
                map.insert(field.id.clone(), value.to_json());
            }
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Debug for ParsedObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedObj")
            .field("type", &self.type_name())
            .field("name", &self.name)
            .field("fields", &self.slots.borrow())
            .finish_non_exhaustive()
    }
}
