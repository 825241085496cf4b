//! Compiled schema model.
//!
//! A [`CompiledSchema`] is an immutable arena of [`TypeDef`]s addressed by
//! [`TypeId`]. User-type references are resolved to indices at compile time,
//! so the structure is acyclic even for mutually recursive types, and the
//! whole schema is `Send + Sync` for concurrent read-only use.

use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::ast::Expr;
use crate::stream::Endian;

pub type TypeId = usize;

#[derive(Debug)]
pub struct CompiledSchema {
    pub(crate) types: Vec<TypeDef>,
    pub(crate) root: TypeId,
    pub(crate) meta: Meta,
}

impl CompiledSchema {
    pub fn root_type(&self) -> &TypeDef {
        &self.types[self.root]
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id]
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }
}

#[derive(Debug, Clone)]
pub struct Meta {
    pub id: String,
    pub endian: Option<Endian>,
    pub encoding: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug)]
pub struct TypeDef {
    pub name: String,
    pub seq: Vec<FieldDef>,
    /// Lazy fields, in document order.
    pub instances: Vec<FieldDef>,
    pub params: Vec<ParamDef>,
    /// Enum tables defined directly on this type.
    pub enums: HashMap<String, Arc<EnumDef>>,
    /// Flattened lexical scope: own tables shadow enclosing ones.
    pub enum_scope: HashMap<String, Arc<EnumDef>>,
    /// Effective default endianness (own `meta.endian` or inherited).
    pub endian: Option<Endian>,
    /// Effective default string encoding (own `meta.encoding` or inherited).
    pub encoding: Option<String>,
    pub doc: Option<String>,
}

impl TypeDef {
    pub fn instance(&self, name: &str) -> Option<&FieldDef> {
        self.instances.iter().find(|f| f.id == name)
    }

    pub fn seq_field(&self, name: &str) -> Option<&FieldDef> {
        self.seq.iter().find(|f| f.id == name)
    }
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub id: String,
    pub ty: Option<String>,
}

#[derive(Debug)]
pub struct EnumDef {
    pub name: String,
    pub by_value: HashMap<i128, String>,
    pub by_label: HashMap<String, i128>,
}

/// One entry of a type's `seq` or `instances` map, fully lowered: every
/// expression-bearing attribute is a pre-parsed AST.
#[derive(Debug)]
pub struct FieldDef {
    pub id: String,
    pub data: DataType,
    pub size: Option<Expr>,
    pub size_eos: bool,
    pub pos: Option<Expr>,
    pub io: Option<Expr>,
    /// `if` guard; `None` means unconditional.
    pub cond: Option<Expr>,
    pub repeat: Option<Repeat>,
    pub contents: Option<Vec<u8>>,
    pub enum_ref: Option<Arc<EnumDef>>,
    pub encoding: Option<String>,
    pub terminator: Option<u8>,
    pub include: bool,
    pub consume: bool,
    pub eos_error: bool,
    pub pad_right: Option<u8>,
    pub process: Option<ProcessSpec>,
    /// Computed instance body; mutually exclusive with `data` reads.
    pub value: Option<Expr>,
    pub doc: Option<String>,
}

impl FieldDef {
    pub(crate) fn bare(id: String) -> FieldDef {
        FieldDef {
            id,
            data: DataType::None,
            size: None,
            size_eos: false,
            pos: None,
            io: None,
            cond: None,
            repeat: None,
            contents: None,
            enum_ref: None,
            encoding: None,
            terminator: None,
            include: false,
            consume: true,
            eos_error: true,
            pad_right: None,
            process: None,
            value: None,
            doc: None,
        }
    }
}

#[derive(Debug)]
pub enum Repeat {
    Expr(Expr),
    Eos,
    Until(Expr),
}

#[derive(Debug)]
pub struct ProcessSpec {
    pub name: String,
    pub args: Vec<Expr>,
}

/// Lowered type designator.
#[derive(Debug)]
pub enum DataType {
    /// No `type` attribute: raw bytes delimited by `size`/`size-eos`/
    /// `terminator`/`contents`.
    None,
    UInt {
        width: u8,
        endian: Option<Endian>,
    },
    SInt {
        width: u8,
        endian: Option<Endian>,
    },
    Float {
        width: u8,
        endian: Option<Endian>,
    },
    Str {
        /// `strz`: terminated by a (default zero) byte.
        zero_term: bool,
    },
    User {
        ty: TypeId,
        args: Vec<Expr>,
    },
    Switch {
        on: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Box<DataType>>,
    },
}

#[derive(Debug)]
pub struct SwitchCase {
    pub key: Expr,
    pub target: DataType,
}
