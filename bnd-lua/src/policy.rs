//! Per-library resolution policy.
//!
//! Everything a library-specific generator needs to say about its API is
//! plain data here, plus a few name predicates.  Configuration files build a
//! [`Policy`]; tests build one directly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::model::{BindingType, ExtraReg};

/// A `Fn(&str) -> bool` over native names.
#[derive(Clone)]
pub struct NamePredicate(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl NamePredicate {
    pub fn new(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn always() -> Self {
        Self::new(|_| true)
    }

    pub fn never() -> Self {
        Self::new(|_| false)
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self::new(move |name| set.contains(name))
    }

    pub fn matches(&self, name: &str) -> bool {
        (self.0)(name)
    }
}

impl fmt::Debug for NamePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NamePredicate(..)")
    }
}

impl Default for NamePredicate {
    fn default() -> Self {
        Self::never()
    }
}

/// Caller-supplied decisions consulted by the resolvers.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Native names never bound (functions, structs, enums).
    pub ignore: BTreeSet<String>,
    /// Extra generation filter applied after `ignore`.
    pub exclude: NamePredicate,
    /// Structs that get live `__index` / `__newindex` / `__pairs`.
    pub live_fields: NamePredicate,
    /// `"struct.field"` -> script field name.
    pub rename_fields: BTreeMap<String, String>,
    /// Structs that are value-type handles (passed by value, compared by
    /// bytes).
    pub handles: BTreeSet<String>,
    /// When set, only these enums resolve as enums; any other declared enum
    /// is downgraded to a plain integer.
    pub allowed_enums: Option<BTreeSet<String>>,
    /// Escape-hatch types by native name (`BindingType::Custom`).
    pub custom_types: BTreeMap<String, BindingType>,
    /// Value-struct types by native name (`BindingType::ValueStruct`).
    pub value_structs: BTreeMap<String, BindingType>,
    /// Hand-written registrations appended to the module table.
    pub extra_regs: Vec<ExtraReg>,
}

impl Policy {
    /// Whether `name` should produce a binding at all.
    pub fn should_bind(&self, name: &str) -> bool {
        !self.ignore.contains(name) && !self.exclude.matches(name)
    }

    /// Whether a reference to the declared enum `name` keeps its enum type.
    pub fn enum_allowed(&self, name: &str) -> bool {
        self.allowed_enums
            .as_ref()
            .is_none_or(|allowed| allowed.contains(name))
    }

    pub fn field_rename(&self, struct_name: &str, field: &str) -> Option<&str> {
        self.rename_fields
            .get(&format!("{struct_name}.{field}"))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_allow_list() {
        let mut policy = Policy::default();
        assert!(policy.enum_allowed("anything"));
        policy.allowed_enums = Some(["sg_action".to_string()].into());
        assert!(policy.enum_allowed("sg_action"));
        assert!(!policy.enum_allowed("sg_other"));
    }

    #[test]
    fn ignore_and_exclude() {
        let policy = Policy {
            ignore: ["a".to_string()].into(),
            exclude: NamePredicate::new(|n| n.starts_with('_')),
            ..Policy::default()
        };
        assert!(!policy.should_bind("a"));
        assert!(!policy.should_bind("_private"));
        assert!(policy.should_bind("b"));
    }
}
