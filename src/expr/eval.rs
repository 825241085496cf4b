//! Dynamic evaluation of expression ASTs against a parse tree.
//!
//! Values are dispatched on variant pairs at runtime; there is no implicit
//! truthiness (only `boolean` drives `if`/`and`/`or`/`?:`), integer
//! division is floor division and `%` is the non-negative modulo, matching
//! the schema language rather than the host language.

use std::sync::Arc;

use crate::error::{Error, ExprError};
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::{EnumValue, ObjRef, Value};

/// Evaluation context: the object whose fields unqualified names resolve
/// against, plus the repetition bindings `_` and `_index`.
#[derive(Clone)]
pub struct EvalContext {
    pub obj: ObjRef,
    pub element: Option<Value>,
    pub index: Option<i128>,
}

impl EvalContext {
    pub fn new(obj: ObjRef) -> EvalContext {
        EvalContext {
            obj,
            element: None,
            index: None,
        }
    }

    pub fn with_index(obj: ObjRef, index: usize) -> EvalContext {
        EvalContext {
            obj,
            element: None,
            index: Some(index as i128),
        }
    }

    pub fn with_element(obj: ObjRef, element: Value, index: usize) -> EvalContext {
        EvalContext {
            obj,
            element: Some(element),
            index: Some(index as i128),
        }
    }
}

/// Evaluate an expression. A *terminal* access to an absent field yields
/// [`Value::Absent`]; an absent value consumed by any surrounding operation
/// raises [`ExprError::MissingValue`] instead.
pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, Error> {
    eval_at(expr, ctx, true)
}

fn eval_at(expr: &Expr, ctx: &EvalContext, allow_absent: bool) -> Result<Value, Error> {
    match expr {
        Expr::IntLit(n) => Ok(Value::Int(*n)),
        Expr::FloatLit(x) => Ok(Value::Float(*x)),
        Expr::StrLit(s) => Ok(Value::Str(s.clone())),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::Ident(name) => {
            let v = resolve_ident(name, ctx)?;
            guard_absent(v, name, allow_absent)
        }
        Expr::EnumConst { path, label } => resolve_enum_const(path, label, ctx),
        Expr::Member { recv, name } => {
            let recv = eval_at(recv, ctx, false)?;
            let v = member(&recv, name, ctx)?;
            guard_absent(v, name, allow_absent)
        }
        Expr::Index { recv, index } => {
            let recv = eval_at(recv, ctx, false)?;
            let index = eval_at(index, ctx, false)?;
            index_value(&recv, &index)
        }
        Expr::Call { callee, args } => call(callee, args, ctx),
        Expr::Unary { op, expr } => {
            let v = eval_at(expr, ctx, false)?;
            unary(*op, &v)
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, ctx),
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            // The branches stay terminal: a ternary is the guarding idiom
            // for conditionally-absent values.
            if eval_at(cond, ctx, false)?.as_bool()? {
                eval_at(then_expr, ctx, allow_absent)
            } else {
                eval_at(else_expr, ctx, allow_absent)
            }
        }
        Expr::Cast { expr, ty } => {
            let v = eval_at(expr, ctx, false)?;
            cast(&v, ty)
        }
    }
}

fn resolve_ident(name: &str, ctx: &EvalContext) -> Result<Value, Error> {
    match name {
        "_" => ctx
            .element
            .clone()
            .ok_or_else(|| ExprError::UnknownIdentifier("_".to_string()).into()),
        "_index" => ctx
            .index
            .map(Value::Int)
            .ok_or_else(|| ExprError::UnknownIdentifier("_index".to_string()).into()),
        _ => ctx.obj.get(name),
    }
}

fn guard_absent(v: Value, name: &str, allow_absent: bool) -> Result<Value, Error> {
    match v {
        Value::Absent if !allow_absent => Err(ExprError::MissingValue(name.to_string()).into()),
        other => Ok(other),
    }
}

fn resolve_enum_const(path: &[String], label: &str, ctx: &EvalContext) -> Result<Value, Error> {
    let full = || format!("{}::{}", path.join("::"), label);
    let def = if path.len() == 1 {
        ctx.obj.type_def().enum_scope.get(&path[0]).cloned()
    } else {
        // Qualified reference: `type_name::enum_name::label`. The defining
        // type is looked up by name across the schema.
        let type_name = &path[path.len() - 2];
        let enum_name = &path[path.len() - 1];
        ctx.obj
            .schema
            .types
            .iter()
            .find(|td| &td.name == type_name)
            .and_then(|td| td.enums.get(enum_name))
            .cloned()
    };
    let def = def.ok_or_else(|| Error::from(ExprError::UnknownIdentifier(full())))?;
    let value = *def
        .by_label
        .get(label)
        .ok_or_else(|| Error::from(ExprError::UnknownIdentifier(full())))?;
    Ok(Value::Enum(EnumValue {
        enum_name: Arc::from(def.name.as_str()),
        label: Some(Arc::from(label)),
        value,
    }))
}

fn member(recv: &Value, name: &str, _ctx: &EvalContext) -> Result<Value, Error> {
    match (recv, name) {
        (Value::Obj(obj), _) => obj.get(name),

        (Value::Str(s), "length") => Ok(Value::Int(s.chars().count() as i128)),
        (Value::Str(s), "reverse") => Ok(Value::Str(s.chars().rev().collect())),
        (Value::Str(s), "to_i") => s
            .trim()
            .parse::<i128>()
            .map(Value::Int)
            .map_err(|_| ExprError::TypeMismatch(format!("cannot parse {s:?} as integer")).into()),

        (Value::Bytes(b), "length" | "size") => Ok(Value::Int(b.len() as i128)),

        (Value::Array(items), "size" | "length") => Ok(Value::Int(items.len() as i128)),
        (Value::Array(items), "first") => items
            .first()
            .cloned()
            .ok_or_else(|| ExprError::TypeMismatch("first of empty array".to_string()).into()),
        (Value::Array(items), "last") => items
            .last()
            .cloned()
            .ok_or_else(|| ExprError::TypeMismatch("last of empty array".to_string()).into()),
        (Value::Array(items), "min") => fold_extremum(items, false),
        (Value::Array(items), "max") => fold_extremum(items, true),

        (Value::Stream(s), "size") => Ok(Value::Int(s.borrow().size() as i128)),
        (Value::Stream(s), "pos") => Ok(Value::Int(s.borrow().pos() as i128)),
        (Value::Stream(s), "eof") => Ok(Value::Bool(s.borrow().is_eof())),

        (Value::Int(n), "to_s") => Ok(Value::Str(n.to_string())),
        (Value::Float(x), "to_i") => Ok(Value::Int(*x as i128)),
        (Value::Bool(b), "to_i") => Ok(Value::Int(i128::from(*b))),
        (Value::Enum(e), "to_i") => Ok(Value::Int(e.value)),

        _ => Err(ExprError::TypeMismatch(format!(
            "no member `{name}` on {}",
            recv.kind()
        ))
        .into()),
    }
}

fn fold_extremum(items: &[Value], want_max: bool) -> Result<Value, Error> {
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item.clone(),
            Some(cur) => {
                let replace = compare(item, &cur)? == std::cmp::Ordering::Greater;
                if replace == want_max {
                    item.clone()
                } else {
                    cur
                }
            }
        });
    }
    best.ok_or_else(|| {
        ExprError::TypeMismatch("min/max of empty array".to_string()).into()
    })
}

fn call(callee: &Expr, args: &[Expr], ctx: &EvalContext) -> Result<Value, Error> {
    let Expr::Member { recv, name } = callee else {
        return Err(ExprError::TypeMismatch("expression is not callable".to_string()).into());
    };
    let recv = eval_at(recv, ctx, false)?;
    let args = args
        .iter()
        .map(|a| eval_at(a, ctx, false))
        .collect::<Result<Vec<_>, _>>()?;

    match (&recv, name.as_str(), args.as_slice()) {
        (Value::Str(s), "substring", [from, to]) => {
            let chars: Vec<char> = s.chars().collect();
            let from = from.as_usize()?.min(chars.len());
            let to = to.as_usize()?.min(chars.len());
            Ok(Value::Str(chars[from..to.max(from)].iter().collect()))
        }
        (Value::Str(s), "to_i", [radix]) => {
            let radix = u32::try_from(radix.as_int()?)
                .ok()
                .filter(|r| (2..=36).contains(r))
                .ok_or_else(|| {
                    Error::from(ExprError::TypeMismatch("radix out of range".to_string()))
                })?;
            i128::from_str_radix(s.trim(), radix)
                .map(Value::Int)
                .map_err(|_| {
                    ExprError::TypeMismatch(format!("cannot parse {s:?} as base-{radix} integer"))
                        .into()
                })
        }
        (Value::Bytes(b), "to_s", [encoding]) => {
            let Value::Str(encoding) = encoding else {
                return Err(ExprError::TypeMismatch("encoding must be a string".to_string()).into());
            };
            crate::interp::decode_bytes(b, encoding)
                .map(Value::Str)
                .map_err(|kind| {
                    ExprError::TypeMismatch(kind.to_string()).into()
                })
        }
        // Zero-argument call form of a property: `x.length()`.
        (_, _, []) => member(&recv, name, ctx),
        _ => Err(ExprError::TypeMismatch(format!(
            "no method `{name}`/{} on {}",
            args.len(),
            recv.kind()
        ))
        .into()),
    }
}

fn index_value(recv: &Value, index: &Value) -> Result<Value, Error> {
    let i = index.as_usize()?;
    match recv {
        Value::Array(items) => items.get(i).cloned().ok_or_else(|| {
            ExprError::TypeMismatch(format!("index {i} out of bounds (len {})", items.len())).into()
        }),
        Value::Bytes(b) => b.get(i).map(|&x| Value::Int(i128::from(x))).ok_or_else(|| {
            ExprError::TypeMismatch(format!("index {i} out of bounds (len {})", b.len())).into()
        }),
        other => Err(ExprError::TypeMismatch(format!("cannot index {}", other.kind())).into()),
    }
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, Error> {
    match (op, v) {
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::BitNot, Value::Int(n)) => Ok(Value::Int(!n)),
        _ => Err(ExprError::TypeMismatch(format!(
            "cannot apply unary operator to {}",
            v.kind()
        ))
        .into()),
    }
}

enum NumPair {
    Ints(i128, i128),
    Floats(f64, f64),
}

fn numeric_pair(l: &Value, r: &Value) -> Option<NumPair> {
    let as_num = |v: &Value| match v {
        Value::Int(n) => Some((Some(*n), *n as f64)),
        Value::Enum(e) => Some((Some(e.value), e.value as f64)),
        Value::Float(x) => Some((None, *x)),
        _ => None,
    };
    let (li, lf) = as_num(l)?;
    let (ri, rf) = as_num(r)?;
    match (li, ri) {
        (Some(a), Some(b)) => Some(NumPair::Ints(a, b)),
        _ => Some(NumPair::Floats(lf, rf)),
    }
}

/// Floor division: rounds toward negative infinity, like the schema
/// language (and unlike Rust's truncating `/`).
fn floor_div(a: i128, b: i128) -> i128 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod(a: i128, b: i128) -> i128 {
    a - floor_div(a, b) * b
}

fn compare(l: &Value, r: &Value) -> Result<std::cmp::Ordering, Error> {
    use std::cmp::Ordering;
    if let Some(pair) = numeric_pair(l, r) {
        return Ok(match pair {
            NumPair::Ints(a, b) => a.cmp(&b),
            NumPair::Floats(a, b) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        });
    }
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(a.as_ref().cmp(b.as_ref())),
        _ => Err(ExprError::TypeMismatch(format!(
            "cannot compare {} with {}",
            l.kind(),
            r.kind()
        ))
        .into()),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &EvalContext) -> Result<Value, Error> {
    // `and`/`or` short-circuit; everything else is strict.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let l = eval_at(left, ctx, false)?.as_bool()?;
        return match (op, l) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(eval_at(right, ctx, false)?.as_bool()?)),
        };
    }

    let l = eval_at(left, ctx, false)?;
    let r = eval_at(right, ctx, false)?;
    use std::cmp::Ordering;
    match op {
        BinaryOp::Add => match (&l, &r) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => arith(op, &l, &r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => arith(op, &l, &r),
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::NotEq => Ok(Value::Bool(l != r)),
        BinaryOp::Lt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Less)),
        BinaryOp::LtEq => Ok(Value::Bool(compare(&l, &r)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Greater)),
        BinaryOp::GtEq => Ok(Value::Bool(compare(&l, &r)? != Ordering::Less)),
        BinaryOp::BitAnd => Ok(Value::Int(l.as_int()? & r.as_int()?)),
        BinaryOp::BitOr => Ok(Value::Int(l.as_int()? | r.as_int()?)),
        BinaryOp::BitXor => Ok(Value::Int(l.as_int()? ^ r.as_int()?)),
        BinaryOp::Shl | BinaryOp::Shr => {
            let a = l.as_int()?;
            let b = u32::try_from(r.as_int()?)
                .ok()
                .filter(|s| *s < 127)
                .ok_or_else(|| {
                    Error::from(ExprError::TypeMismatch("shift amount out of range".to_string()))
                })?;
            Ok(Value::Int(if op == BinaryOp::Shl { a << b } else { a >> b }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, Error> {
    let pair = numeric_pair(l, r).ok_or_else(|| {
        Error::from(ExprError::TypeMismatch(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            l.kind(),
            r.kind()
        )))
    })?;
    match pair {
        NumPair::Ints(a, b) => match op {
            BinaryOp::Add => Ok(Value::Int(a + b)),
            BinaryOp::Sub => Ok(Value::Int(a - b)),
            BinaryOp::Mul => Ok(Value::Int(a * b)),
            BinaryOp::Div if b == 0 => Err(ExprError::DivideByZero.into()),
            BinaryOp::Div => Ok(Value::Int(floor_div(a, b))),
            BinaryOp::Mod if b == 0 => Err(ExprError::DivideByZero.into()),
            BinaryOp::Mod => Ok(Value::Int(floor_mod(a, b))),
            _ => unreachable!("non-arithmetic operator"),
        },
        NumPair::Floats(a, b) => match op {
            BinaryOp::Add => Ok(Value::Float(a + b)),
            BinaryOp::Sub => Ok(Value::Float(a - b)),
            BinaryOp::Mul => Ok(Value::Float(a * b)),
            BinaryOp::Div => Ok(Value::Float(a / b)),
            BinaryOp::Mod => Ok(Value::Float(a.rem_euclid(b))),
            _ => unreachable!("non-arithmetic operator"),
        },
    }
}

fn cast(v: &Value, ty: &str) -> Result<Value, Error> {
    match ty {
        "u1" | "u2" | "u4" | "u8" | "s1" | "s2" | "s4" | "s8" => match v {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Float(x) => Ok(Value::Int(*x as i128)),
            Value::Enum(e) => Ok(Value::Int(e.value)),
            other => Err(ExprError::TypeMismatch(format!(
                "cannot cast {} to {ty}",
                other.kind()
            ))
            .into()),
        },
        "f4" | "f8" => match v {
            Value::Int(n) => Ok(Value::Float(*n as f64)),
            Value::Float(x) => Ok(Value::Float(*x)),
            other => Err(ExprError::TypeMismatch(format!(
                "cannot cast {} to {ty}",
                other.kind()
            ))
            .into()),
        },
        "str" => match v {
            Value::Str(_) => Ok(v.clone()),
            other => Err(ExprError::TypeMismatch(format!(
                "cannot cast {} to str",
                other.kind()
            ))
            .into()),
        },
        "bytes" => match v {
            Value::Bytes(_) => Ok(v.clone()),
            other => Err(ExprError::TypeMismatch(format!(
                "cannot cast {} to bytes",
                other.kind()
            ))
            .into()),
        },
        // User-type casts are static-typing aids upstream; dynamically they
        // are pass-throughs.
        _ => Ok(v.clone()),
    }
}
