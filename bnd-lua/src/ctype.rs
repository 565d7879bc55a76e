//! Parser for flattened C type spellings.
//!
//! Input is one declarator spelling as a header AST prints it
//! (`"const sapp_desc *"`, `"void (*)(int, float)"`, `"int[16]"`); output is
//! a [`CType`] tree.  Named types stay unresolved as [`CType::NamedRef`] until
//! the resolver looks them up.

use crate::error::DeclaratorError;

/// A parsed C type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Int,
    Int64,
    UInt32,
    UInt64,
    Size,
    UIntPtr,
    IntPtr,
    Float,
    Double,
    Bool,
    /// `char` / `const char`.  Reached in practice through `char*`; a bare
    /// `char` field maps here too (see the crate docs).
    String,
    Void,
    Ptr(Box<CType>),
    ConstPtr(Box<CType>),
    FuncPtr {
        params: Vec<CType>,
        ret: Box<CType>,
    },
    Array(Box<CType>, usize),
    NamedRef(String),
}

impl CType {
    /// `void *` and `const void *` both parse to this.
    pub fn void_ptr() -> Self {
        CType::Ptr(Box::new(CType::Void))
    }

    pub fn is_void_ptr(&self) -> bool {
        matches!(self, CType::Ptr(inner) if **inner == CType::Void)
    }
}

/// The fixed primitive vocabulary.
pub fn primitive(spelling: &str) -> Option<CType> {
    let ty = match spelling {
        "int" | "int8_t" | "int16_t" | "int32_t" => CType::Int,
        "int64_t" => CType::Int64,
        "uint8_t" | "uint16_t" | "uint32_t" => CType::UInt32,
        "uint64_t" => CType::UInt64,
        "size_t" => CType::Size,
        "uintptr_t" => CType::UIntPtr,
        "intptr_t" => CType::IntPtr,
        "float" => CType::Float,
        "double" => CType::Double,
        "bool" => CType::Bool,
        "char" | "const char" => CType::String,
        "void" => CType::Void,
        _ => return None,
    };
    Some(ty)
}

/// Parse one declarator spelling.
///
/// Forms are tried in a fixed order: function pointers first (no-arg,
/// void-returning, general), then `const T *`, `T *`, `T[N]`, the primitive
/// table, and finally an unresolved name.
pub fn parse(spelling: &str) -> Result<CType, DeclaratorError> {
    let s = spelling.trim();

    if let Some((ret, args)) = split_func_ptr(s) {
        let ret = if ret == "void" {
            CType::Void
        } else {
            parse(ret)?
        };
        let params = if args.trim() == "void" {
            Vec::new()
        } else {
            parse_params(args)?
        };
        return Ok(CType::FuncPtr {
            params,
            ret: Box::new(ret),
        });
    }

    if let Some(inner) = const_pointee(s) {
        if inner == "void" {
            return Ok(CType::void_ptr());
        }
        return Ok(CType::ConstPtr(Box::new(parse(inner)?)));
    }

    if let Some(inner) = s.strip_suffix('*') {
        let inner = inner.trim();
        if !inner.is_empty() {
            if inner == "void" {
                return Ok(CType::void_ptr());
            }
            return Ok(CType::Ptr(Box::new(parse(inner)?)));
        }
    }

    if let Some((inner, len)) = split_array(s) {
        return Ok(CType::Array(Box::new(parse(inner)?), len));
    }

    Ok(primitive(s).unwrap_or_else(|| CType::NamedRef(s.to_string())))
}

/// Parse a function-pointer argument list (without the parentheses).
///
/// An empty list or a lone `void` means no parameters.
pub fn parse_params(args: &str) -> Result<Vec<CType>, DeclaratorError> {
    let args = args.trim();
    if args.is_empty() || args == "void" {
        return Ok(Vec::new());
    }
    split_args(args)?.into_iter().map(parse).collect()
}

/// Split on top-level commas, tracking `()` and `[]` nesting.  Blank pieces
/// are dropped.
pub fn split_args(args: &str) -> Result<Vec<&str>, DeclaratorError> {
    let unbalanced = || DeclaratorError::UnbalancedDelimiter {
        input: args.to_string(),
    };
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.checked_sub(1).ok_or_else(unbalanced)?,
            ',' if depth == 0 => {
                pieces.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(unbalanced());
    }
    pieces.push(&args[start..]);
    Ok(pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect())
}

/// Return type of a function type spelling such as `"int (float, char)"`.
///
/// Everything before the first `(` is the return type; a spelling that
/// starts with `(` (or has none) returns `void`.
pub fn parse_return_type(func_type: &str) -> Result<CType, DeclaratorError> {
    match func_type.find('(') {
        Some(idx) if idx > 0 => parse(func_type[..idx].trim()),
        _ => Ok(CType::Void),
    }
}

/// `RET (*)(ARGS)` -> `(RET, ARGS)`.  `RET` is everything before the first
/// `(*)`, `ARGS` runs to the final `)`.
fn split_func_ptr(s: &str) -> Option<(&str, &str)> {
    let star = s.find("(*)")?;
    let ret = s[..star].trim_end();
    if ret.is_empty() {
        return None;
    }
    let rest = s[star + 3..].trim_start();
    let args = rest.strip_prefix('(')?.strip_suffix(')')?;
    if args.is_empty() {
        return None;
    }
    Some((ret, args))
}

/// `const T *` -> `T`.
fn const_pointee(s: &str) -> Option<&str> {
    let rest = s.strip_prefix("const")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let inner = rest.strip_suffix('*')?.trim();
    (!inner.is_empty()).then_some(inner)
}

/// `T [N]` -> `(T, N)`.
fn split_array(s: &str) -> Option<(&str, usize)> {
    let body = s.strip_suffix(']')?;
    let open = body.rfind('[')?;
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let inner = body[..open].trim();
    if inner.is_empty() {
        return None;
    }
    Some((inner, digits.parse().ok()?))
}
