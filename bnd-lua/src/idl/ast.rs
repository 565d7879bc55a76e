//! Declaration tree produced by [`parse`](super::parse).

use std::collections::BTreeMap;

/// Bracketed attribute list.  Flag attributes store an empty value.
pub type Attributes = BTreeMap<String, String>;

/// A type reference such as `unsigned long long`, `sg_color` or `float[4]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdlType {
    pub name: String,
    pub array_len: Option<usize>,
}

impl IdlType {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            array_len: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: IdlType,
}

/// A namespace operation or interface method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub ret: IdlType,
    pub params: Vec<Param>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumItem {
    pub name: String,
    /// `None` when the item has no `= N`; numbered by the resolver.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enum {
    pub name: String,
    pub items: Vec<EnumItem>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: IdlType,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    pub name: String,
    pub fields: Vec<Field>,
    pub attrs: Attributes,
}

/// Opaque type with an implicit receiver on every method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub methods: Vec<Operation>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: IdlType,
    pub attrs: Attributes,
}

/// `Type fieldName = cAccessor;` inside an event array block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventField {
    pub name: String,
    pub c_accessor: String,
    pub ty: IdlType,
}

/// `luaField(cArray, cCount) { ... };`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventArray {
    pub name: String,
    pub c_array: String,
    pub c_count: String,
    pub fields: Vec<EventField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAdapter {
    pub name: String,
    pub params: Vec<Param>,
    pub c_return_type: String,
    pub arrays: Vec<EventArray>,
    pub attrs: Attributes,
}

/// One parsed declaration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdlFile {
    pub attrs: Attributes,
    pub namespace: Option<Namespace>,
    pub enums: Vec<Enum>,
    pub dictionaries: Vec<Dictionary>,
    pub interfaces: Vec<Interface>,
    pub callbacks: Vec<Callback>,
    pub events: Vec<EventAdapter>,
}

impl IdlFile {
    pub fn dictionary(&self, name: &str) -> Option<&Dictionary> {
        self.dictionaries.iter().find(|d| d.name == name)
    }
}
