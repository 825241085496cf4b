//! Error taxonomy for schema compilation, parsing and expression evaluation.
//!
//! Parse-time failures always carry the *path* (sequence of field ids and
//! `[index]` steps from the root) and the byte offset in the stream that was
//! being read when the failure occurred. Expression failures that happen
//! while a field is being parsed are wrapped into a [`ParseError`] with the
//! surrounding field context; expression failures from the standalone
//! evaluation entry point surface as [`ExprError`] directly.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Parse(#[from] Box<ParseError>),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

impl Error {
    /// Attach field context to a bare expression error; errors that already
    /// carry a path are passed through unchanged.
    pub(crate) fn with_field_context(self, path: &str, offset: usize) -> Error {
        match self {
            Error::Expr(e) => Error::Parse(Box::new(ParseError {
                kind: ParseErrorKind::Expr(e),
                path: path.to_string(),
                offset,
            })),
            other => other,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error {
        Error::Parse(Box::new(e))
    }
}

/// Failures raised while compiling a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is not structurally valid YAML.
    #[error("schema syntax error: {0}")]
    Syntax(String),

    /// The document parses but violates the schema shape (missing `meta.id`,
    /// a `seq` entry without `id`, an unknown key under strict mode, ...).
    #[error("{path}: {message}")]
    Shape { path: String, message: String },

    /// A user-type reference did not resolve in any enclosing scope.
    #[error("{path}: unknown type `{name}`")]
    UnknownType { path: String, name: String },

    /// An expression-bearing attribute failed to parse.
    #[error("{path}: syntax error at offset {offset} in expression `{text}`: {message}")]
    ExpressionSyntax {
        path: String,
        text: String,
        offset: usize,
        message: String,
    },

    /// A parameterized type was referenced with the wrong number of
    /// arguments.
    #[error("{path}: type `{name}` takes {expected} parameter(s), {given} given")]
    ParameterArity {
        path: String,
        name: String,
        expected: usize,
        given: usize,
    },
}

/// A failure during interpretation of a compiled schema over a buffer.
#[derive(Debug, Error)]
#[error("{kind} (at `{path}`, offset {offset})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub path: String,
    pub offset: usize,
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("end of stream: needed {needed} byte(s), {available} available")]
    EndOfStream { needed: usize, available: usize },

    #[error("contents mismatch: expected {expected:02x?}, found {actual:02x?}")]
    ContentsMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("no switch case matched discriminant {discriminant}")]
    NoSwitchMatch { discriminant: String },

    #[error("cannot decode bytes as {encoding}")]
    Encoding { encoding: String },

    #[error("value {value} is not defined in enum `{enum_name}`")]
    InvalidEnumValue { enum_name: String, value: i128 },

    #[error("unknown process directive `{0}`")]
    UnknownProcess(String),

    #[error("invalid arguments to process `{name}`: {message}")]
    InvalidProcessArgs { name: String, message: String },

    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// Failures raised by the expression evaluator.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("value of `{0}` is absent")]
    MissingValue(String),

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("circular evaluation of instance `{0}`")]
    CircularInstance(String),
}
