//! Recursive-descent grammar for the expression language.
//!
//! Precedence, lowest to highest: ternary `?:`, `or`, `and`, `|`, `^`, `&`,
//! `== !=`, `< <= > >=`, `<< >>`, `+ -`, `* / %`, unary `- ! ~ not`,
//! postfix `.member` / `[index]` / `(args)` / `.as<T>`.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{multispace0, satisfy};
use nom::combinator::{all_consuming, cut, map, not, recognize, value};
use nom::multi::{many1, separated_list0};
use nom::sequence::{pair, preceded, terminated, tuple};
use nom::Parser;
use nom_supreme::ParserExt;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::errors::{best_base, EResult};
use super::literal_parser::parse_literal;
use super::precedence::left_chain;

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> EResult<'a, O>
where
    F: Parser<&'a str, O, nom_supreme::error::ErrorTree<&'a str>>,
{
    preceded(multispace0, inner)
}

fn tok<'a>(t: &'static str) -> impl FnMut(&'a str) -> EResult<'a, &'a str> {
    ws(tag(t))
}

/// A keyword operator (`and`, `or`, `not`): the spelling must end at a word
/// boundary so identifiers like `android` stay identifiers.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> EResult<'a, &'a str> {
    ws(terminated(tag(kw), not(satisfy(is_ident_char))))
}

fn raw_identifier(input: &str) -> EResult<'_, String> {
    map(
        recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
        str::to_string,
    )(input)
}

fn identifier(input: &str) -> EResult<'_, String> {
    ws(raw_identifier).parse(input)
}

/// `a::b::c` — at least two segments; the final one is the enum label.
fn parse_enum_const(input: &str) -> EResult<'_, Expr> {
    map(
        pair(
            ws(raw_identifier),
            many1(preceded(ws(tag("::")), ws(raw_identifier))),
        ),
        |(head, mut tail)| match tail.pop() {
            Some(label) => {
                let mut path = vec![head];
                path.append(&mut tail);
                Expr::EnumConst { path, label }
            }
            // many1 guarantees at least one segment after `::`.
            None => Expr::Ident(head),
        },
    )
    .context("enum constant")
    .parse(input)
}

fn parse_paren(input: &str) -> EResult<'_, Expr> {
    preceded(
        tok("("),
        cut(terminated(parse_expression, tok(")"))),
    )
    .parse(input)
}

fn parse_primary(input: &str) -> EResult<'_, Expr> {
    alt((
        ws(parse_literal),
        parse_paren,
        parse_enum_const,
        map(identifier, Expr::Ident),
    ))
    .context("expression")
    .parse(input)
}

enum Postfix {
    Cast(String),
    Member(String),
    Index(Expr),
    Call(Vec<Expr>),
}

fn parse_cast_suffix(input: &str) -> EResult<'_, Postfix> {
    map(
        preceded(
            pair(tok("."), pair(keyword("as"), tok("<"))),
            cut(terminated(identifier, tok(">"))),
        ),
        Postfix::Cast,
    )(input)
}

fn parse_postfix_op(input: &str) -> EResult<'_, Postfix> {
    alt((
        parse_cast_suffix,
        map(preceded(tok("."), cut(identifier)), Postfix::Member),
        map(
            preceded(tok("["), cut(terminated(parse_expression, tok("]")))),
            Postfix::Index,
        ),
        map(
            preceded(
                tok("("),
                cut(terminated(
                    separated_list0(tok(","), parse_expression),
                    tok(")"),
                )),
            ),
            Postfix::Call,
        ),
    ))(input)
}

fn parse_postfix(input: &str) -> EResult<'_, Expr> {
    let (mut rest, mut expr) = parse_primary(input)?;
    loop {
        let (after, op) = match parse_postfix_op(rest) {
            Ok(step) => step,
            Err(e @ nom::Err::Failure(_)) => return Err(e),
            Err(_) => break,
        };
        expr = match op {
            Postfix::Cast(ty) => Expr::Cast {
                expr: Box::new(expr),
                ty,
            },
            Postfix::Member(name) => Expr::Member {
                recv: Box::new(expr),
                name,
            },
            Postfix::Index(index) => Expr::Index {
                recv: Box::new(expr),
                index: Box::new(index),
            },
            Postfix::Call(args) => Expr::Call {
                callee: Box::new(expr),
                args,
            },
        };
        rest = after;
    }
    Ok((rest, expr))
}

fn parse_unary(input: &str) -> EResult<'_, Expr> {
    let op = alt((
        value(UnaryOp::Neg, tok("-")),
        value(UnaryOp::Not, tok("!")),
        value(UnaryOp::Not, keyword("not")),
        value(UnaryOp::BitNot, tok("~")),
    ));
    alt((
        map(pair(op, cut(parse_unary)), |(op, expr)| Expr::Unary {
            op,
            expr: Box::new(expr),
        }),
        parse_postfix,
    ))(input)
}

fn parse_multiplicative(input: &str) -> EResult<'_, Expr> {
    left_chain(
        parse_unary,
        alt((
            value(BinaryOp::Mul, tok("*")),
            value(BinaryOp::Div, tok("/")),
            value(BinaryOp::Mod, tok("%")),
        )),
    )(input)
}

fn parse_additive(input: &str) -> EResult<'_, Expr> {
    left_chain(
        parse_multiplicative,
        alt((
            value(BinaryOp::Add, tok("+")),
            value(BinaryOp::Sub, tok("-")),
        )),
    )(input)
}

fn parse_shift(input: &str) -> EResult<'_, Expr> {
    left_chain(
        parse_additive,
        alt((
            value(BinaryOp::Shl, tok("<<")),
            value(BinaryOp::Shr, tok(">>")),
        )),
    )(input)
}

fn parse_relational(input: &str) -> EResult<'_, Expr> {
    left_chain(
        parse_shift,
        alt((
            value(BinaryOp::LtEq, tok("<=")),
            value(BinaryOp::GtEq, tok(">=")),
            value(BinaryOp::Lt, tok("<")),
            value(BinaryOp::Gt, tok(">")),
        )),
    )(input)
}

fn parse_equality(input: &str) -> EResult<'_, Expr> {
    left_chain(
        parse_relational,
        alt((
            value(BinaryOp::Eq, tok("==")),
            value(BinaryOp::NotEq, tok("!=")),
        )),
    )(input)
}

fn parse_bitand(input: &str) -> EResult<'_, Expr> {
    left_chain(parse_equality, value(BinaryOp::BitAnd, tok("&")))(input)
}

fn parse_bitxor(input: &str) -> EResult<'_, Expr> {
    left_chain(parse_bitand, value(BinaryOp::BitXor, tok("^")))(input)
}

fn parse_bitor(input: &str) -> EResult<'_, Expr> {
    left_chain(parse_bitxor, value(BinaryOp::BitOr, tok("|")))(input)
}

fn parse_and(input: &str) -> EResult<'_, Expr> {
    left_chain(parse_bitor, value(BinaryOp::And, keyword("and")))(input)
}

fn parse_or(input: &str) -> EResult<'_, Expr> {
    left_chain(parse_and, value(BinaryOp::Or, keyword("or")))(input)
}

pub fn parse_expression(input: &str) -> EResult<'_, Expr> {
    let (rest, cond) = parse_or(input)?;
    match tok("?")(rest) {
        Ok((after_q, _)) => {
            let (rest, (then_expr, _, else_expr)) = cut(tuple((
                parse_expression,
                tok(":"),
                parse_expression,
            )))
            .parse(after_q)?;
            Ok((
                rest,
                Expr::Ternary {
                    cond: Box::new(cond),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
            ))
        }
        Err(_) => Ok((rest, cond)),
    }
}

/// Parse a complete expression string. On failure, reports the byte offset
/// of the deepest error in `source` together with what was expected there.
pub fn parse_expression_source(source: &str) -> Result<Expr, (usize, String)> {
    match all_consuming(terminated(parse_expression, multispace0))(source) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(tree)) | Err(nom::Err::Failure(tree)) => {
            Err(best_base(source, &tree))
        }
        Err(nom::Err::Incomplete(_)) => Err((source.len(), "incomplete input".to_string())),
    }
}
