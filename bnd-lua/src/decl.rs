//! Declaration input form A: already-structured declarations.
//!
//! An external tool walks a header's AST and writes this JSON shape; every
//! field and parameter type arrives as a spelling parseable by
//! [`ctype::parse`](crate::ctype::parse).
//!
//! ```json
//! {
//!   "module": "sokol.app",
//!   "prefix": "sapp_",
//!   "dep_prefixes": ["slog_"],
//!   "decls": [
//!     { "kind": "struct", "name": "sapp_desc", "line": 12,
//!       "fields": [{ "name": "width", "type": "int" }] },
//!     { "kind": "func", "name": "sapp_width", "type": "int (void)", "params": [] },
//!     { "kind": "enum", "name": "sapp_event_type",
//!       "items": [{ "name": "SAPP_EVENTTYPE_INVALID" }, { "name": "X", "value": "5" }] }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DeclFile {
    pub module: String,
    pub prefix: String,
    #[serde(default)]
    pub dep_prefixes: Vec<String>,
    #[serde(default)]
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Decl {
    Struct(StructDecl),
    Func(FuncDecl),
    Enum(EnumDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Struct(s) => &s.name,
            Decl::Func(f) => &f.name,
            Decl::Enum(e) => &e.name,
        }
    }

    pub fn is_dep(&self) -> bool {
        match self {
            Decl::Struct(s) => s.is_dep,
            Decl::Func(f) => f.is_dep,
            Decl::Enum(e) => e.is_dep,
        }
    }
}

/// `name` + type spelling pair.
#[derive(Debug, Clone, Deserialize)]
pub struct TypedName {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<TypedName>,
    #[serde(default)]
    pub is_dep: bool,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    /// Full function type spelling, e.g. `"int (float, char)"`.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub params: Vec<TypedName>,
    #[serde(default)]
    pub is_dep: bool,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumItemDecl {
    pub name: String,
    /// Literal text of an explicit initializer, if any.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub items: Vec<EnumItemDecl>,
    #[serde(default)]
    pub is_dep: bool,
    #[serde(default)]
    pub line: Option<u32>,
}

/// Parse a form-A JSON document.
pub fn parse_decls(json: &str) -> Result<DeclFile> {
    serde_json::from_str(json).context("invalid declaration JSON")
}

/// Load a form-A JSON file.
pub fn load_decls(path: &Path) -> Result<DeclFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read declarations {}", path.display()))?;
    parse_decls(&content).with_context(|| format!("parsing {}", path.display()))
}
