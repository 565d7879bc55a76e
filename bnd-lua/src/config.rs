//! Configuration types for `bnd-lua.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::Deserialize;

use crate::model::{BindingType, CppOptions, CustomType, ExtraReg, ValueField, ValueStructType};
use crate::policy::{NamePredicate, Policy};
use crate::resolve::ExternalTable;

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    /// Modules in generation order; later modules may reference earlier ones.
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

/// Output file settings.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving `{module_id}.c` and `{module}.lua`, relative to the
    /// TOML file.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("gen")
}

/// One generated module.
#[derive(Debug, Deserialize)]
pub struct ModuleConfig {
    /// Script module id, e.g. `sokol.app`.
    pub name: String,
    /// Overrides the prefix declared by the input file.
    pub prefix: Option<String>,
    /// Declaration file (form B).
    pub idl: Option<PathBuf>,
    /// Structured declarations as JSON (form A).
    pub decls: Option<PathBuf>,
    /// Replaces the input's own include list when non-empty.
    #[serde(default)]
    pub includes: Vec<String>,
    /// File pasted verbatim into the glue output.
    pub extra_c: Option<PathBuf>,
    /// Base URL of the header, for `[source]` links (form A only).
    pub source_link: Option<String>,
    /// Prefixes of sibling libraries whose dependency declarations are
    /// accepted (form A only).
    #[serde(default)]
    pub dep_prefixes: Vec<String>,
    /// Switches the glue output to C++.
    pub cpp: Option<CppConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub custom_type: Vec<CustomTypeConfig>,
    #[serde(default)]
    pub value_struct: Vec<ValueStructConfig>,
    #[serde(default)]
    pub external: Vec<ExternalConfig>,
}

/// Which front end a module goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleInput<'a> {
    Idl(&'a Path),
    Decls(&'a Path),
}

impl ModuleConfig {
    /// Exactly one of `idl` / `decls` must be set.
    pub fn input(&self) -> anyhow::Result<ModuleInput<'_>> {
        match (&self.idl, &self.decls) {
            (Some(idl), None) => Ok(ModuleInput::Idl(idl)),
            (None, Some(decls)) => Ok(ModuleInput::Decls(decls)),
            (Some(_), Some(_)) => bail!(
                "module `{}` sets both `idl` and `decls`; choose one input",
                self.name
            ),
            (None, None) => bail!("module `{}` has no `idl` or `decls` input", self.name),
        }
    }

    /// Resolution policy assembled from `[module.policy]` and the type tables.
    pub fn policy(&self) -> Policy {
        let p = &self.policy;
        Policy {
            ignore: p.ignore.iter().cloned().collect(),
            exclude: NamePredicate::never(),
            live_fields: p.live_fields.predicate(),
            rename_fields: p.rename_fields.clone(),
            handles: p.handles.iter().cloned().collect(),
            allowed_enums: p
                .allowed_enums
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            custom_types: self
                .custom_type
                .iter()
                .map(|c| (c.c_type.clone(), c.binding()))
                .collect(),
            value_structs: self
                .value_struct
                .iter()
                .map(|v| (v.c_type.clone(), v.binding()))
                .collect(),
            extra_regs: p
                .extra_regs
                .iter()
                .map(|r| ExtraReg {
                    script_name: r.name.clone(),
                    c_func: r.cfunc.clone(),
                })
                .collect(),
        }
    }

    /// Add this module's `[[module.external]]` entries to `table`.
    pub fn register_externals(&self, table: &mut ExternalTable) {
        for ext in &self.external {
            let ty = match ext.kind {
                ExternalKind::Struct => BindingType::struct_ref(&ext.c_name, &ext.script, &ext.script),
                ExternalKind::Enum => BindingType::enum_ref(&ext.c_name, &ext.script),
            };
            table.register_type(&ext.c_name, ty);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CppConfig {
    pub entry_point: Option<String>,
    pub namespace: Option<String>,
}

impl From<&CppConfig> for CppOptions {
    fn from(c: &CppConfig) -> Self {
        CppOptions {
            entry_point: c.entry_point.clone(),
            namespace: c.namespace.clone(),
        }
    }
}

/// `[module.policy]`.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub live_fields: LiveFields,
    #[serde(default)]
    pub handles: Vec<String>,
    /// Absent means every declared enum keeps its enum type.
    pub allowed_enums: Option<Vec<String>>,
    /// `"struct.field" = "script_name"`.
    #[serde(default)]
    pub rename_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_regs: Vec<ExtraRegConfig>,
}

/// `live_fields = "*"` or `live_fields = ["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LiveFields {
    Pattern(String),
    Names(Vec<String>),
}

impl Default for LiveFields {
    fn default() -> Self {
        LiveFields::Names(Vec::new())
    }
}

impl LiveFields {
    pub fn predicate(&self) -> NamePredicate {
        match self {
            LiveFields::Pattern(p) if p == "*" => NamePredicate::always(),
            LiveFields::Pattern(name) => NamePredicate::from_names([name.clone()]),
            LiveFields::Names(names) => NamePredicate::from_names(names.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtraRegConfig {
    pub name: String,
    pub cfunc: String,
}

/// `[[module.custom_type]]`: hand-written marshalling snippets.
#[derive(Debug, Deserialize)]
pub struct CustomTypeConfig {
    pub c_type: String,
    pub stub: String,
    pub init: Option<String>,
    pub check: Option<String>,
    pub push: Option<String>,
    pub set: Option<String>,
}

impl CustomTypeConfig {
    pub fn binding(&self) -> BindingType {
        BindingType::Custom(CustomType {
            c_type: self.c_type.clone(),
            stub_type: self.stub.clone(),
            init: self.init.clone(),
            check: self.check.clone(),
            push: self.push.clone(),
            set: self.set.clone(),
        })
    }
}

/// `[[module.value_struct]]`.
#[derive(Debug, Deserialize)]
pub struct ValueStructConfig {
    pub c_type: String,
    #[serde(default = "default_value_stub")]
    pub stub: String,
    pub fields: Vec<ValueFieldConfig>,
    #[serde(default)]
    pub read_only: bool,
}

fn default_value_stub() -> String {
    "number[]".to_string()
}

/// `"x"` or `{ accessor = "col1", subs = ["x", "y"] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ValueFieldConfig {
    Scalar(String),
    Nested { accessor: String, subs: Vec<String> },
}

impl ValueStructConfig {
    pub fn binding(&self) -> BindingType {
        BindingType::ValueStruct(ValueStructType {
            c_type: self.c_type.clone(),
            stub_type: self.stub.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| match f {
                    ValueFieldConfig::Scalar(acc) => ValueField::Scalar(acc.clone()),
                    ValueFieldConfig::Nested { accessor, subs } => ValueField::Nested {
                        accessor: accessor.clone(),
                        subs: subs.clone(),
                    },
                })
                .collect(),
            settable: !self.read_only,
        })
    }
}

/// `[[module.external]]`: a type owned by a module generated elsewhere.
#[derive(Debug, Deserialize)]
pub struct ExternalConfig {
    pub c_name: String,
    pub kind: ExternalKind,
    /// Script class (struct) or enum name.
    pub script: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalKind {
    Struct,
    Enum,
}

/// Parse configuration text.
pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Load and parse a `bnd-lua.toml` configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}
