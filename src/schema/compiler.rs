//! Schema loader: YAML text in, [`CompiledSchema`] out.
//!
//! Compilation runs in three phases over the raw document:
//!
//! 1. *Registration* — every type (the document root, nested `types`, and
//!    imported roots) gets a scope and a `TypeId`, with parameter counts
//!    recorded for arity checking.
//! 2. *Enum lowering* — enum tables are built and each scope receives its
//!    flattened lexical enum scope (own tables shadow enclosing ones).
//! 3. *Field lowering* — `seq` entries and `instances` are validated and
//!    lowered; every expression-bearing attribute is parsed to an AST, type
//!    designators are resolved to arena indices, `contents` literals are
//!    normalized to canonical byte arrays.
//!
//! Compilation is deterministic and side-effect-free; the result is shared
//! via `Arc` and safe for concurrent read-only use.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use serde_yaml::{Mapping, Value as Yaml};

use crate::error::{Error, SchemaError};
use crate::expr::ast::Expr;
use crate::expr::expression_parser::parse_expression_source;
use crate::schema::model::{
    CompiledSchema, DataType, EnumDef, FieldDef, Meta, ParamDef, ProcessSpec, Repeat, SwitchCase,
    TypeDef, TypeId,
};
use crate::stream::Endian;

/// Options accepted by [`compile`].
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Escalate unknown schema keys from warnings to errors.
    pub strict: bool,
    /// Run shape validation (on by default).
    pub validate: bool,
    /// Sources for `meta.imports`, keyed by import string. The core performs
    /// no file I/O; callers supply imported schema texts here.
    pub imports: HashMap<String, String>,
}

impl Default for CompileOptions {
    fn default() -> CompileOptions {
        CompileOptions {
            strict: false,
            validate: true,
            imports: HashMap::new(),
        }
    }
}

pub fn compile(source: &str, opts: &CompileOptions) -> Result<Arc<CompiledSchema>, Error> {
    let doc: Yaml = serde_yaml::from_str(source)
        .map_err(|e| SchemaError::Syntax(e.to_string()))?;
    let root = as_mapping(&doc, "")?;

    let meta_node = get(root, "meta")
        .ok_or_else(|| shape("meta", "missing `meta` section"))?;
    let meta_map = as_mapping(meta_node, "meta")?;
    let meta = lower_meta(meta_map, opts)?;

    let mut compiler = Compiler {
        opts,
        scopes: Vec::new(),
        globals: HashMap::new(),
    };

    debug!("compiling schema `{}`", meta.id);

    let root_scope = compiler.register(
        None,
        &meta.id,
        root,
        meta.endian,
        meta.encoding.clone(),
        String::new(),
    )?;
    compiler.globals.insert(meta.id.clone(), root_scope);
    compiler.register_imports(meta_map)?;

    compiler.lower_enum_scopes()?;
    let types = compiler.lower_types()?;

    debug!(
        "compiled schema `{}`: {} type(s)",
        meta.id,
        types.len()
    );

    Ok(Arc::new(CompiledSchema {
        types,
        root: root_scope,
        meta,
    }))
}

struct Scope {
    name: String,
    body: Mapping,
    parent: Option<usize>,
    children: HashMap<String, usize>,
    param_count: usize,
    endian: Option<Endian>,
    encoding: Option<String>,
    path: String,
    enums: HashMap<String, Arc<EnumDef>>,
    enum_scope: HashMap<String, Arc<EnumDef>>,
}

struct Compiler<'o> {
    opts: &'o CompileOptions,
    scopes: Vec<Scope>,
    /// Top-level names: the root type plus imported roots.
    globals: HashMap<String, usize>,
}

const TYPE_KEYS: &[&str] = &["meta", "seq", "types", "instances", "enums", "params", "doc", "doc-ref"];
const META_KEYS: &[&str] = &[
    "id", "endian", "encoding", "imports", "title", "application", "file-extension", "license",
    "ks-version", "ks-debug", "xref",
];
const FIELD_KEYS: &[&str] = &[
    "id", "type", "size", "size-eos", "pos", "io", "if", "repeat", "repeat-expr", "repeat-until",
    "contents", "enum", "encoding", "terminator", "include", "consume", "eos-error", "pad-right",
    "process", "value", "doc", "doc-ref",
];

impl Compiler<'_> {
    fn register(
        &mut self,
        parent: Option<usize>,
        name: &str,
        body: &Mapping,
        endian: Option<Endian>,
        encoding: Option<String>,
        path: String,
    ) -> Result<usize, Error> {
        let param_count = match get(body, "params") {
            Some(Yaml::Sequence(params)) => params.len(),
            Some(_) => return Err(shape(&join(&path, "params"), "`params` must be a list")),
            None => 0,
        };

        self.check_keys(body, TYPE_KEYS, &path)?;

        let idx = self.scopes.len();
        self.scopes.push(Scope {
            name: name.to_string(),
            body: body.clone(),
            parent,
            children: HashMap::new(),
            param_count,
            endian,
            encoding: encoding.clone(),
            path: path.clone(),
            enums: HashMap::new(),
            enum_scope: HashMap::new(),
        });
        if let Some(p) = parent {
            self.scopes[p].children.insert(name.to_string(), idx);
        }

        if let Some(types_node) = get(body, "types") {
            let types_path = join(&path, "types");
            let types = as_mapping(types_node, &types_path)?;
            for (key, node) in types {
                let tname = key_string(key, &types_path)?;
                let tpath = join(&types_path, &tname);
                let tbody = as_mapping(node, &tpath)?;
                self.register(Some(idx), &tname, tbody, endian, encoding.clone(), tpath)?;
            }
        }

        Ok(idx)
    }

    fn register_imports(&mut self, meta: &Mapping) -> Result<(), Error> {
        let Some(imports_node) = get(meta, "imports") else {
            return Ok(());
        };
        let Yaml::Sequence(imports) = imports_node else {
            return Err(shape("meta.imports", "`imports` must be a list"));
        };
        for entry in imports {
            let Yaml::String(name) = entry else {
                return Err(shape("meta.imports", "import entries must be strings"));
            };
            let source = self.opts.imports.get(name).ok_or_else(|| {
                Error::from(SchemaError::UnknownType {
                    path: "meta.imports".to_string(),
                    name: name.clone(),
                })
            })?;
            let doc: Yaml = serde_yaml::from_str(source)
                .map_err(|e| SchemaError::Syntax(format!("import `{name}`: {e}")))?;
            let import_path = format!("<import {name}>");
            let root = as_mapping(&doc, &import_path)?;
            let meta_map = as_mapping(
                get(root, "meta").ok_or_else(|| shape(&import_path, "missing `meta` section"))?,
                &import_path,
            )?;
            let import_meta = lower_meta(meta_map, self.opts)?;
            if self.globals.contains_key(&import_meta.id) {
                continue;
            }
            let idx = self.register(
                None,
                &import_meta.id,
                root,
                import_meta.endian,
                import_meta.encoding.clone(),
                import_path,
            )?;
            self.globals.insert(import_meta.id, idx);
            // Transitive imports resolve against the same caller-supplied map.
            let meta_map = meta_map.clone();
            self.register_imports(&meta_map)?;
        }
        Ok(())
    }

    fn check_keys(&self, body: &Mapping, known: &[&str], path: &str) -> Result<(), Error> {
        if !self.opts.validate {
            return Ok(());
        }
        for (key, _) in body {
            let name = match key {
                Yaml::String(s) => s.clone(),
                other => format!("{other:?}"),
            };
            if !known.contains(&name.as_str()) && !name.starts_with('-') {
                if self.opts.strict {
                    return Err(shape(path, &format!("unknown key `{name}`")));
                }
                warn!("{}: ignoring unknown key `{}`", display_path(path), name);
            }
        }
        Ok(())
    }

    fn resolve_type(&self, from: usize, name: &str, path: &str) -> Result<TypeId, Error> {
        let mut cursor = Some(from);
        while let Some(idx) = cursor {
            let scope = &self.scopes[idx];
            if let Some(&child) = scope.children.get(name) {
                return Ok(child);
            }
            if scope.name == name {
                return Ok(idx);
            }
            cursor = scope.parent;
        }
        if let Some(&idx) = self.globals.get(name) {
            return Ok(idx);
        }
        Err(SchemaError::UnknownType {
            path: display_path(path),
            name: name.to_string(),
        }
        .into())
    }

    fn resolve_enum(&self, from: usize, name: &str, path: &str) -> Result<Arc<EnumDef>, Error> {
        self.scopes[from]
            .enum_scope
            .get(name)
            .cloned()
            .ok_or_else(|| shape(path, &format!("unknown enum `{name}`")))
    }

    fn lower_enum_scopes(&mut self) -> Result<(), Error> {
        for idx in 0..self.scopes.len() {
            let enums_node = get(&self.scopes[idx].body, "enums").cloned();
            let path = join(&self.scopes[idx].path, "enums");
            let own = match enums_node {
                Some(node) => lower_enums(as_mapping(&node, &path)?, &path)?,
                None => HashMap::new(),
            };
            // Parents are registered (and therefore processed) before their
            // children, so the parent's flattened scope is complete here.
            let mut flattened = match self.scopes[idx].parent {
                Some(p) => self.scopes[p].enum_scope.clone(),
                None => HashMap::new(),
            };
            flattened.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
            let scope = &mut self.scopes[idx];
            scope.enums = own;
            scope.enum_scope = flattened;
        }
        Ok(())
    }

    fn lower_types(&self) -> Result<Vec<TypeDef>, Error> {
        let mut types = Vec::with_capacity(self.scopes.len());
        for idx in 0..self.scopes.len() {
            types.push(self.lower_type(idx)?);
        }
        Ok(types)
    }

    fn lower_type(&self, idx: usize) -> Result<TypeDef, Error> {
        let scope = &self.scopes[idx];
        debug!("lowering type `{}`", scope.name);

        let mut seq = Vec::new();
        if let Some(seq_node) = get(&scope.body, "seq") {
            let seq_path = join(&scope.path, "seq");
            let Yaml::Sequence(entries) = seq_node else {
                return Err(shape(&seq_path, "`seq` must be a list"));
            };
            for (i, entry) in entries.iter().enumerate() {
                let entry_path = format!("{seq_path}[{i}]");
                let body = as_mapping(entry, &entry_path)?;
                let id = match get(body, "id") {
                    Some(Yaml::String(s)) => s.clone(),
                    Some(_) => return Err(shape(&entry_path, "`id` must be a string")),
                    None => return Err(shape(&entry_path, "missing `id`")),
                };
                seq.push(self.lower_field(idx, id, body, &entry_path, false)?);
            }
        }

        let mut instances = Vec::new();
        if let Some(inst_node) = get(&scope.body, "instances") {
            let inst_path = join(&scope.path, "instances");
            for (key, node) in as_mapping(inst_node, &inst_path)? {
                let name = key_string(key, &inst_path)?;
                let entry_path = join(&inst_path, &name);
                let body = as_mapping(node, &entry_path)?;
                instances.push(self.lower_field(idx, name, body, &entry_path, true)?);
            }
        }

        let params = match get(&scope.body, "params") {
            Some(Yaml::Sequence(entries)) => {
                let params_path = join(&scope.path, "params");
                let mut params = Vec::new();
                for (i, entry) in entries.iter().enumerate() {
                    let entry_path = format!("{params_path}[{i}]");
                    let body = as_mapping(entry, &entry_path)?;
                    let id = match get(body, "id") {
                        Some(Yaml::String(s)) => s.clone(),
                        _ => return Err(shape(&entry_path, "missing `id`")),
                    };
                    let ty = match get(body, "type") {
                        Some(Yaml::String(s)) => Some(s.clone()),
                        _ => None,
                    };
                    params.push(ParamDef { id, ty });
                }
                params
            }
            _ => Vec::new(),
        };

        Ok(TypeDef {
            name: scope.name.clone(),
            seq,
            instances,
            params,
            enums: scope.enums.clone(),
            enum_scope: scope.enum_scope.clone(),
            endian: scope.endian,
            encoding: scope.encoding.clone(),
            doc: get(&scope.body, "doc").and_then(Yaml::as_str).map(str::to_string),
        })
    }

    fn lower_field(
        &self,
        scope: usize,
        id: String,
        body: &Mapping,
        path: &str,
        is_instance: bool,
    ) -> Result<FieldDef, Error> {
        self.check_keys(body, FIELD_KEYS, path)?;

        let mut field = FieldDef::bare(id);
        field.doc = get(body, "doc").and_then(Yaml::as_str).map(str::to_string);

        if let Some(node) = get(body, "value") {
            if !is_instance {
                return Err(shape(path, "`value` is only valid on instances"));
            }
            field.value = Some(yaml_expr(node, &join(path, "value"))?);
        }

        if let Some(node) = get(body, "if") {
            field.cond = Some(yaml_expr(node, &join(path, "if"))?);
        }
        if let Some(node) = get(body, "size") {
            field.size = Some(yaml_expr(node, &join(path, "size"))?);
        }
        if let Some(node) = get(body, "pos") {
            field.pos = Some(yaml_expr(node, &join(path, "pos"))?);
        }
        if let Some(node) = get(body, "io") {
            field.io = Some(yaml_expr(node, &join(path, "io"))?);
        }
        field.size_eos = bool_attr(body, "size-eos", path, false)?;
        field.include = bool_attr(body, "include", path, false)?;
        field.consume = bool_attr(body, "consume", path, true)?;
        field.eos_error = bool_attr(body, "eos-error", path, true)?;

        if let Some(node) = get(body, "terminator") {
            field.terminator = Some(byte_attr(node, &join(path, "terminator"))?);
        }
        if let Some(node) = get(body, "pad-right") {
            field.pad_right = Some(byte_attr(node, &join(path, "pad-right"))?);
        }
        if let Some(node) = get(body, "contents") {
            field.contents = Some(normalize_contents(node, &join(path, "contents"))?);
        }
        if let Some(node) = get(body, "encoding") {
            field.encoding = match node {
                Yaml::String(s) => Some(s.clone()),
                _ => return Err(shape(&join(path, "encoding"), "`encoding` must be a string")),
            };
        }

        field.repeat = self.lower_repeat(body, path)?;
        field.process = self.lower_process(body, path)?;

        if let Some(node) = get(body, "type") {
            field.data = match node {
                Yaml::String(designator) => {
                    self.lower_designator(scope, designator, &join(path, "type"))?
                }
                Yaml::Mapping(switch) => self.lower_switch(scope, switch, &join(path, "type"))?,
                _ => return Err(shape(&join(path, "type"), "`type` must be a string or a switch mapping")),
            };
        }

        if let Some(node) = get(body, "enum") {
            let Yaml::String(name) = node else {
                return Err(shape(&join(path, "enum"), "`enum` must be a string"));
            };
            field.enum_ref = Some(self.resolve_enum(scope, name, &join(path, "enum"))?);
        }

        if self.opts.validate {
            self.validate_field(&field, path)?;
        }

        Ok(field)
    }

    fn lower_repeat(&self, body: &Mapping, path: &str) -> Result<Option<Repeat>, Error> {
        let Some(node) = get(body, "repeat") else {
            if get(body, "repeat-expr").is_some() || get(body, "repeat-until").is_some() {
                return Err(shape(path, "`repeat-expr`/`repeat-until` require a `repeat` mode"));
            }
            return Ok(None);
        };
        let Yaml::String(mode) = node else {
            return Err(shape(&join(path, "repeat"), "`repeat` must be a string"));
        };
        match mode.as_str() {
            "expr" => {
                let count = get(body, "repeat-expr")
                    .ok_or_else(|| shape(path, "`repeat: expr` requires `repeat-expr`"))?;
                Ok(Some(Repeat::Expr(yaml_expr(count, &join(path, "repeat-expr"))?)))
            }
            "eos" => Ok(Some(Repeat::Eos)),
            "until" => {
                let cond = get(body, "repeat-until")
                    .ok_or_else(|| shape(path, "`repeat: until` requires `repeat-until`"))?;
                Ok(Some(Repeat::Until(yaml_expr(cond, &join(path, "repeat-until"))?)))
            }
            other => Err(shape(
                &join(path, "repeat"),
                &format!("unknown repeat mode `{other}`"),
            )),
        }
    }

    fn lower_process(&self, body: &Mapping, path: &str) -> Result<Option<ProcessSpec>, Error> {
        let Some(node) = get(body, "process") else {
            return Ok(None);
        };
        let Yaml::String(spec) = node else {
            return Err(shape(&join(path, "process"), "`process` must be a string"));
        };
        let spec_path = join(path, "process");
        if is_plain_name(spec) {
            return Ok(Some(ProcessSpec {
                name: spec.clone(),
                args: Vec::new(),
            }));
        }
        match expr_attr(spec, &spec_path)? {
            Expr::Call { callee, args } => match *callee {
                Expr::Ident(name) => Ok(Some(ProcessSpec { name, args })),
                _ => Err(shape(&spec_path, "malformed process directive")),
            },
            _ => Err(shape(&spec_path, "malformed process directive")),
        }
    }

    fn lower_designator(&self, scope: usize, s: &str, path: &str) -> Result<DataType, Error> {
        if let Some(data) = primitive_type(s) {
            self.check_endian(&data, scope, path)?;
            return Ok(data);
        }
        match s {
            "str" => return Ok(DataType::Str { zero_term: false }),
            "strz" => return Ok(DataType::Str { zero_term: true }),
            _ => {}
        }
        if is_plain_name(s) {
            let ty = self.resolve_type(scope, s, path)?;
            self.check_arity(ty, 0, s, path)?;
            return Ok(DataType::User { ty, args: Vec::new() });
        }
        // Parameterized invocation: `name(arg, ...)`.
        match expr_attr(s, path)? {
            Expr::Call { callee, args } => match *callee {
                Expr::Ident(name) => {
                    let ty = self.resolve_type(scope, &name, path)?;
                    self.check_arity(ty, args.len(), &name, path)?;
                    Ok(DataType::User { ty, args })
                }
                _ => Err(shape(path, &format!("malformed type designator `{s}`"))),
            },
            _ => Err(shape(path, &format!("malformed type designator `{s}`"))),
        }
    }

    fn lower_switch(&self, scope: usize, switch: &Mapping, path: &str) -> Result<DataType, Error> {
        let on_node = get(switch, "switch-on")
            .ok_or_else(|| shape(path, "switch type requires `switch-on`"))?;
        let on = yaml_expr(on_node, &join(path, "switch-on"))?;

        let cases_node = get(switch, "cases")
            .ok_or_else(|| shape(path, "switch type requires `cases`"))?;
        let cases_path = join(path, "cases");
        let cases_map = as_mapping(cases_node, &cases_path)?;

        let mut cases = Vec::new();
        let mut default = None;
        for (key, target_node) in cases_map {
            let Yaml::String(target) = target_node else {
                return Err(shape(&cases_path, "case targets must be type designators"));
            };
            let target = self.lower_designator(scope, target, &cases_path)?;
            match key {
                Yaml::String(s) if s == "_" => {
                    default = Some(Box::new(target));
                }
                other => {
                    let key_path = join(&cases_path, &key_display(other));
                    cases.push(SwitchCase {
                        key: yaml_expr(other, &key_path)?,
                        target,
                    });
                }
            }
        }

        Ok(DataType::Switch { on, cases, default })
    }

    fn check_arity(&self, ty: TypeId, given: usize, name: &str, path: &str) -> Result<(), Error> {
        let expected = self.scopes[ty].param_count;
        if expected != given {
            return Err(SchemaError::ParameterArity {
                path: display_path(path),
                name: name.to_string(),
                expected,
                given,
            }
            .into());
        }
        Ok(())
    }

    fn check_endian(&self, data: &DataType, scope: usize, path: &str) -> Result<(), Error> {
        let (width, endian) = match data {
            DataType::UInt { width, endian }
            | DataType::SInt { width, endian }
            | DataType::Float { width, endian } => (*width, *endian),
            _ => return Ok(()),
        };
        if width > 1 && endian.is_none() && self.scopes[scope].endian.is_none() {
            return Err(shape(
                path,
                "multi-byte primitive without endianness: add `meta.endian` or an `le`/`be` suffix",
            ));
        }
        Ok(())
    }

    fn validate_field(&self, field: &FieldDef, path: &str) -> Result<(), Error> {
        if field.value.is_some() {
            return Ok(());
        }
        match &field.data {
            DataType::None => {
                if field.size.is_none()
                    && !field.size_eos
                    && field.contents.is_none()
                    && field.terminator.is_none()
                {
                    return Err(shape(
                        path,
                        "field has no `type`; it needs `size`, `size-eos`, `terminator` or `contents`",
                    ));
                }
            }
            DataType::UInt { .. } | DataType::SInt { .. } | DataType::Float { .. } => {
                if field.size.is_some() || field.size_eos {
                    return Err(shape(path, "`size` is not applicable to fixed-width primitives"));
                }
            }
            DataType::Str { zero_term } => {
                if !zero_term
                    && field.size.is_none()
                    && !field.size_eos
                    && field.terminator.is_none()
                {
                    return Err(shape(path, "`str` needs `size`, `size-eos` or `terminator`"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn lower_meta(meta: &Mapping, opts: &CompileOptions) -> Result<Meta, Error> {
    for (key, _) in meta {
        let name = match key {
            Yaml::String(s) => s.clone(),
            other => format!("{other:?}"),
        };
        if opts.validate && !META_KEYS.contains(&name.as_str()) && !name.starts_with('-') {
            if opts.strict {
                return Err(shape("meta", &format!("unknown key `{name}`")));
            }
            warn!("meta: ignoring unknown key `{name}`");
        }
    }

    let id = match get(meta, "id") {
        Some(Yaml::String(s)) => s.clone(),
        Some(_) => return Err(shape("meta.id", "`id` must be a string")),
        None => return Err(shape("meta", "missing `id`")),
    };
    let endian = match get(meta, "endian") {
        Some(Yaml::String(s)) => match s.as_str() {
            "le" => Some(Endian::Le),
            "be" => Some(Endian::Be),
            other => return Err(shape("meta.endian", &format!("unknown endianness `{other}`"))),
        },
        Some(Yaml::Mapping(_)) => {
            return Err(shape("meta.endian", "switchable endianness is not supported"));
        }
        Some(_) => return Err(shape("meta.endian", "`endian` must be `le` or `be`")),
        None => None,
    };
    let encoding = get(meta, "encoding").and_then(Yaml::as_str).map(str::to_string);
    let title = get(meta, "title").and_then(Yaml::as_str).map(str::to_string);

    Ok(Meta {
        id,
        endian,
        encoding,
        title,
    })
}

fn lower_enums(
    mapping: &Mapping,
    path: &str,
) -> Result<HashMap<String, Arc<EnumDef>>, Error> {
    let mut out = HashMap::new();
    for (key, table_node) in mapping {
        let name = key_string(key, path)?;
        let table_path = join(path, &name);
        let table = as_mapping(table_node, &table_path)?;
        let mut by_value = HashMap::new();
        let mut by_label = HashMap::new();
        for (value_key, label_node) in table {
            let value = match value_key {
                Yaml::Number(n) => number_to_int(n)
                    .ok_or_else(|| shape(&table_path, "enum keys must be integers"))?,
                _ => return Err(shape(&table_path, "enum keys must be integers")),
            };
            let label = match label_node {
                Yaml::String(s) => s.clone(),
                // Verbose form: `0: {id: label, doc: ...}`.
                Yaml::Mapping(m) => match get(m, "id") {
                    Some(Yaml::String(s)) => s.clone(),
                    _ => return Err(shape(&table_path, "verbose enum values need an `id`")),
                },
                _ => return Err(shape(&table_path, "enum values must be names")),
            };
            by_value.insert(value, label.clone());
            by_label.insert(label, value);
        }
        out.insert(
            name.clone(),
            Arc::new(EnumDef {
                name,
                by_value,
                by_label,
            }),
        );
    }
    Ok(out)
}

/// `u2`, `s4be`, `f8le`, ... — fixed-width primitives with an optional
/// explicit byte-order suffix.
fn primitive_type(s: &str) -> Option<DataType> {
    let (base, endian) = match s {
        _ if s.len() >= 4 && s.ends_with("le") => (&s[..s.len() - 2], Some(Endian::Le)),
        _ if s.len() >= 4 && s.ends_with("be") => (&s[..s.len() - 2], Some(Endian::Be)),
        _ => (s, None),
    };
    let mut chars = base.chars();
    let kind = chars.next()?;
    let width: u8 = chars.as_str().parse().ok()?;
    match (kind, width) {
        ('u', 1 | 2 | 4 | 8) => Some(DataType::UInt { width, endian }),
        ('s', 1 | 2 | 4 | 8) => Some(DataType::SInt { width, endian }),
        ('f', 4 | 8) => Some(DataType::Float { width, endian }),
        _ => None,
    }
}

fn is_plain_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn normalize_contents(node: &Yaml, path: &str) -> Result<Vec<u8>, Error> {
    match node {
        Yaml::String(s) => Ok(s.as_bytes().to_vec()),
        Yaml::Number(n) => {
            let b = number_to_int(n)
                .filter(|v| (0..=255).contains(v))
                .ok_or_else(|| shape(path, "contents byte out of range"))?;
            Ok(vec![b as u8])
        }
        Yaml::Sequence(items) => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    Yaml::Number(n) => {
                        let b = number_to_int(n)
                            .filter(|v| (0..=255).contains(v))
                            .ok_or_else(|| shape(path, "contents byte out of range"))?;
                        out.push(b as u8);
                    }
                    Yaml::String(s) => out.extend_from_slice(s.as_bytes()),
                    _ => return Err(shape(path, "contents entries must be bytes or strings")),
                }
            }
            Ok(out)
        }
        _ => Err(shape(path, "`contents` must be a string, byte, or list")),
    }
}

fn yaml_expr(node: &Yaml, path: &str) -> Result<Expr, Error> {
    match node {
        Yaml::Bool(b) => Ok(Expr::BoolLit(*b)),
        Yaml::Number(n) => {
            if let Some(i) = number_to_int(n) {
                Ok(Expr::IntLit(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Expr::FloatLit(f))
            } else {
                Err(shape(path, "unrepresentable number"))
            }
        }
        Yaml::String(s) => expr_attr(s, path),
        _ => Err(shape(path, "expected an expression")),
    }
}

fn expr_attr(text: &str, path: &str) -> Result<Expr, Error> {
    parse_expression_source(text).map_err(|(offset, message)| {
        SchemaError::ExpressionSyntax {
            path: display_path(path),
            text: text.to_string(),
            offset,
            message,
        }
        .into()
    })
}

fn bool_attr(body: &Mapping, key: &str, path: &str, default: bool) -> Result<bool, Error> {
    match get(body, key) {
        Some(Yaml::Bool(b)) => Ok(*b),
        Some(_) => Err(shape(&join(path, key), &format!("`{key}` must be a boolean"))),
        None => Ok(default),
    }
}

fn byte_attr(node: &Yaml, path: &str) -> Result<u8, Error> {
    match node {
        Yaml::Number(n) => number_to_int(n)
            .filter(|v| (0..=255).contains(v))
            .map(|v| v as u8)
            .ok_or_else(|| shape(path, "byte value out of range")),
        _ => Err(shape(path, "expected a byte value")),
    }
}

fn number_to_int(n: &serde_yaml::Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        Some(i128::from(i))
    } else {
        n.as_u64().map(i128::from)
    }
}

fn get<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Yaml> {
    mapping.get(key)
}

fn as_mapping<'a>(node: &'a Yaml, path: &str) -> Result<&'a Mapping, Error> {
    node.as_mapping()
        .ok_or_else(|| shape(path, "expected a mapping"))
}

fn key_string(key: &Yaml, path: &str) -> Result<String, Error> {
    match key {
        Yaml::String(s) => Ok(s.clone()),
        _ => Err(shape(path, "keys must be strings")),
    }
}

fn key_display(key: &Yaml) -> String {
    match key {
        Yaml::String(s) => s.clone(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}

fn shape(path: &str, message: &str) -> Error {
    SchemaError::Shape {
        path: display_path(path),
        message: message.to_string(),
    }
    .into()
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}
