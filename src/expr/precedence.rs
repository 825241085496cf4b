//! Generic left-associative chain builder.

use nom::combinator::cut;
use nom::Parser;

use super::ast::{BinaryOp, Expr};
use super::errors::EResult;

/// `left_chain(next, op)` parses `next (op next)*` and folds
/// left-associatively.
///
/// - `next` parses the higher-precedence expression on both sides of the
///   operator.
/// - `op` parses exactly one operator occurrence.
///
/// Once an operator has been consumed the right operand is mandatory; a
/// missing operand is a hard failure rather than a silent backtrack.
pub fn left_chain<'a, FNext, FOp>(
    mut next: FNext,
    mut op: FOp,
) -> impl FnMut(&'a str) -> EResult<'a, Expr>
where
    FNext: FnMut(&'a str) -> EResult<'a, Expr>,
    FOp: FnMut(&'a str) -> EResult<'a, BinaryOp>,
{
    move |input: &'a str| {
        let (mut rest, mut left) = next(input)?;
        loop {
            match op(rest) {
                Ok((after_op, bop)) => {
                    let (after_rhs, right) = cut(|i| next(i)).parse(after_op)?;
                    left = Expr::Binary {
                        op: bop,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    rest = after_rhs;
                }
                Err(_) => break,
            }
        }
        Ok((rest, left))
    }
}
