//! Parser result alias and `ErrorTree` → diagnostic conversion.

use nom::IResult;
use nom_supreme::error::{BaseErrorKind, ErrorTree};

pub type EResult<'a, O> = IResult<&'a str, O, ErrorTree<&'a str>>;

/// Byte offset of `tail` within `whole`. `tail` must be a subslice of
/// `whole`, which holds for every location captured by the parser.
fn offset_of(whole: &str, tail: &str) -> usize {
    (tail.as_ptr() as usize).saturating_sub(whole.as_ptr() as usize)
}

/// Walk an `ErrorTree` and pick the deepest base error: the alternative that
/// progressed furthest into the input, which is almost always the most
/// informative one to report.
pub fn best_base(source: &str, tree: &ErrorTree<&str>) -> (usize, String) {
    match tree {
        ErrorTree::Base { location, kind } => {
            let msg = match kind {
                BaseErrorKind::Expected(expectation) => format!("expected {expectation}"),
                other => format!("{other}"),
            };
            (offset_of(source, location), msg)
        }
        ErrorTree::Stack { base, .. } => best_base(source, base),
        ErrorTree::Alt(alternatives) => alternatives
            .iter()
            .map(|alt| best_base(source, alt))
            .max_by_key(|(offset, _)| *offset)
            .unwrap_or((0, "syntax error".to_string())),
    }
}
