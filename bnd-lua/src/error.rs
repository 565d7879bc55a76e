//! Typed errors for each pipeline stage.
//!
//! The parsers and the resolver report failures the caller may want to match
//! on (an unresolved name, a bad token at a known line).  Pipeline glue in
//! `lib.rs` wraps these in `anyhow` with file-level context.

use thiserror::Error;

/// Failure while splitting or parsing a C declarator spelling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclaratorError {
    /// A `)` or `]` without a matching opener, or an opener left unclosed.
    #[error("unbalanced delimiter in argument list `{input}`")]
    UnbalancedDelimiter { input: String },
}

/// Lexer or grammar failure in a declaration file.
///
/// There is no recovery: the first violation aborts the parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure while reducing declarations to a [`ModuleSpec`](crate::model::ModuleSpec).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A named type matched none of the resolution categories.
    #[error("unresolved type reference `{name}` in {context}")]
    UnresolvedReference { name: String, context: String },

    /// Two struct or opaque bindings share a native name.
    #[error("duplicate binding for native type `{name}`")]
    DuplicateType { name: String },

    /// Dependency slots must be 1-based, contiguous and unique per type.
    #[error("invalid dependency list on `{type_name}`: {detail}")]
    InvalidDependency { type_name: String, detail: String },

    /// An attribute value does not follow its mini-syntax.
    #[error("malformed attribute {attribute}=\"{value}\"")]
    InvalidAttribute { attribute: String, value: String },

    #[error(transparent)]
    Declarator(#[from] DeclaratorError),
}

/// Upstream invariant violation detected by the glue backend.
///
/// A spec produced by the resolvers never triggers these; hand-built specs
/// can.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error(
        "function `{func}` has callback parameter `{param}` without a bridge mode; \
         mark it Immediate or Persistent"
    )]
    UnboundCallback { func: String, param: String },

    #[error("function `{func}` has fixed-array parameter `{param}`, which cannot be passed by value")]
    FixedArrayParam { func: String, param: String },

    #[error("function `{func}` returns a callback, which has no script representation")]
    CallbackReturn { func: String },

    #[error("function `{func}` returns a fixed array, which C cannot return by value")]
    FixedArrayReturn { func: String },

    #[error("unsupported parameter type for `{param}` in `{func}`: {ty}")]
    UnsupportedParam {
        func: String,
        param: String,
        ty: String,
    },

    #[error("unsupported return type in `{func}`: {ty}")]
    UnsupportedReturn { func: String, ty: String },
}
