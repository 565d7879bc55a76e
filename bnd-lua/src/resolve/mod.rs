//! Reduction from parsed declarations to a [`ModuleSpec`].
//!
//! Two front ends share this module: [`idl`] for declaration files and
//! [`header`] for form-A declarations.  Both resolve every named type through
//! a fixed sequence of categories and fail with
//! [`ResolveError::UnresolvedReference`] when none applies; there is no
//! numeric fallback.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::ResolveError;
use crate::model::{BindingType, EnumItemBinding, ModuleSpec};
use crate::naming::{strip_prefix, strip_type_suffix, to_pascal_case};

pub mod header;
pub mod idl;

pub use header::resolve_decls;
pub use idl::resolve_idl;

// ---------------------------------------------------------------------------
// Cross-module symbol table
// ---------------------------------------------------------------------------

/// Names owned by sibling modules, keyed by native prefix.
///
/// Populated from configuration and, during a multi-module run, from each
/// module resolved earlier in the same run.
#[derive(Debug, Clone, Default)]
pub struct ExternalTable {
    /// Native prefix -> script module id.
    prefixes: BTreeMap<String, String>,
    /// Native names known to be enums.
    enums: BTreeSet<String>,
    /// Exact entries that win over prefix inference.
    explicit: BTreeMap<String, BindingType>,
}

impl ExternalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_prefix(&mut self, prefix: impl Into<String>, module: impl Into<String>) {
        self.prefixes.insert(prefix.into(), module.into());
    }

    pub fn register_enum(&mut self, c_name: impl Into<String>) {
        self.enums.insert(c_name.into());
    }

    pub fn register_type(&mut self, c_name: impl Into<String>, ty: BindingType) {
        self.explicit.insert(c_name.into(), ty);
    }

    /// Make a resolved module visible to the modules that follow it.
    pub fn register_spec(&mut self, spec: &ModuleSpec) {
        if !spec.prefix.is_empty() {
            self.register_prefix(&spec.prefix, &spec.module_name);
        }
        for e in &spec.enums {
            self.register_type(
                &e.c_name,
                BindingType::enum_ref(&e.c_name, &e.script_name),
            );
        }
        for s in &spec.structs {
            self.register_type(&s.c_name, s.as_type());
        }
    }

    /// Resolve `c_name` by exact entry, then by the longest matching prefix.
    pub fn lookup(&self, c_name: &str) -> Option<BindingType> {
        if let Some(ty) = self.explicit.get(c_name) {
            return Some(ty.clone());
        }
        let (prefix, module) = self
            .prefixes
            .iter()
            .filter(|(prefix, _)| c_name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())?;
        let stripped = strip_prefix(c_name, prefix);
        if self.enums.contains(c_name) {
            let script = format!("{module}.{}", to_pascal_case(stripped));
            return Some(BindingType::enum_ref(c_name, script));
        }
        let class = format!("{module}.{}", to_pascal_case(strip_type_suffix(stripped)));
        Some(BindingType::struct_ref(c_name, &class, &class))
    }
}

// ---------------------------------------------------------------------------
// Shared naming and numbering
// ---------------------------------------------------------------------------

/// `(pascal_name, metatable)` for a struct or opaque type.
///
/// The `_t` suffix only affects these generated names; native code keeps
/// spelling `c_name` verbatim.
pub fn struct_names(module: &str, prefix: &str, c_name: &str) -> (String, String) {
    let pascal = to_pascal_case(strip_type_suffix(strip_prefix(c_name, prefix)));
    let metatable = format!("{module}.{pascal}");
    (pascal, metatable)
}

/// `(field_name, script_name)` for an enum.
pub fn enum_names(module: &str, prefix: &str, c_name: &str) -> (String, String) {
    let field = to_pascal_case(strip_prefix(c_name, prefix));
    let script = format!("{module}.{field}");
    (field, script)
}

/// Assign enum values: explicit literal wins, otherwise previous + 1
/// starting at 0.  Items whose native name starts with `_` are dropped
/// before numbering.
pub fn number_enum_items<I>(items: I, script_name: impl Fn(&str) -> String) -> Vec<EnumItemBinding>
where
    I: IntoIterator<Item = (String, Option<i64>)>,
{
    let mut next = 0i64;
    let mut out = Vec::new();
    for (name, explicit) in items {
        if name.starts_with('_') {
            debug!(item = %name, "dropping private enum item");
            continue;
        }
        let value = explicit.unwrap_or(next);
        next = value.wrapping_add(1);
        out.push(EnumItemBinding {
            script_name: script_name(&name),
            c_const: name,
            value,
        });
    }
    out
}

/// Integer literal as written in a header: decimal, `0x` hex, optional
/// sign and `u`/`l` suffixes.  Anything else (an expression) yields `None`.
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let t = text.trim().trim_end_matches(['u', 'U', 'l', 'L']);
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, t),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// `"a:b, c:d"` -> `[("a", "b"), ("c", "d")]`.
pub fn parse_pairs(attribute: &str, raw: &str) -> Result<Vec<(String, String)>, ResolveError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| ResolveError::InvalidAttribute {
                    attribute: attribute.to_string(),
                    value: raw.to_string(),
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Spec invariants
// ---------------------------------------------------------------------------

/// Check the invariants every backend relies on.
///
/// Native names must be unique across structs and opaque types (they key
/// every generated identifier), and each opaque type's dependency slots must
/// be 1-based, contiguous and unique.
pub fn validate_spec(spec: &ModuleSpec) -> Result<(), ResolveError> {
    let mut seen = BTreeSet::new();
    let names = spec
        .structs
        .iter()
        .map(|s| &s.c_name)
        .chain(spec.opaque_types.iter().map(|o| &o.c_name));
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ResolveError::DuplicateType { name: name.clone() });
        }
    }

    for ot in &spec.opaque_types {
        let mut slots: Vec<usize> = ot.dependencies.iter().map(|d| d.slot).collect();
        slots.sort_unstable();
        let contiguous = slots.iter().enumerate().all(|(i, &slot)| slot == i + 1);
        if !contiguous {
            return Err(ResolveError::InvalidDependency {
                type_name: ot.c_name.clone(),
                detail: format!("slots {slots:?} are not 1..={}", slots.len()),
            });
        }
        if let Some(dep) = ot.dependencies.iter().find(|d| d.ctor_arg == 0) {
            return Err(ResolveError::InvalidDependency {
                type_name: ot.c_name.clone(),
                detail: format!("constructor argument of `{}` must be 1-based", dep.name),
            });
        }
    }
    Ok(())
}
