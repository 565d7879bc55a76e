//! bnd-lua — C declarations → Lua C API glue and LuaCATS stubs.
//!
//! Each module goes through the same pipeline: a front end (declaration
//! file or structured header JSON) is resolved against a policy into a
//! [`ModuleSpec`](model::ModuleSpec), a few transform passes run, and the
//! two backends render that `ModuleSpec` as C glue and as a stub file.
//!
//! # Quick start
//!
//! Generate every module of a config (suitable for `build.rs`):
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Reads config TOML, resolves each module, writes `.c` and `.lua` files.
//! bnd_lua::run(Path::new("bnd-lua.toml"), None).unwrap();
//! ```
//!
//! Or keep everything in memory:
//!
//! ```no_run
//! use std::path::Path;
//!
//! for module in bnd_lua::generate(Path::new("bnd-lua.toml")).unwrap() {
//!     println!("{}: {} bytes of glue", module.spec.module_name, module.glue.len());
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

pub mod config;
pub mod ctype;
pub mod decl;
pub mod emit;
pub mod error;
pub mod idl;
pub mod model;
pub mod naming;
pub mod policy;
pub mod resolve;
pub mod transform;

use config::{Config, ModuleConfig, ModuleInput};
use model::{CppOptions, ModuleSpec};
use resolve::ExternalTable;

/// One module's generated outputs.
#[derive(Debug, Clone)]
pub struct GeneratedModule {
    pub spec: ModuleSpec,
    pub glue: String,
    pub stubs: String,
}

impl GeneratedModule {
    /// `sokol_app.c` (or `.cpp` in C++ mode).
    pub fn glue_file_name(&self) -> String {
        let ext = if self.spec.cpp.is_some() { "cpp" } else { "c" };
        format!("{}.{ext}", naming::c_identifier(&self.spec.module_name))
    }

    /// `sokol.app.lua`.
    pub fn stub_file_name(&self) -> String {
        format!("{}.lua", self.spec.module_name)
    }

    /// Write both files into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        let glue_path = dir.join(self.glue_file_name());
        std::fs::write(&glue_path, &self.glue)
            .with_context(|| format!("writing glue to {}", glue_path.display()))?;
        info!(path = %glue_path.display(), size = self.glue.len(), "wrote glue");

        let stub_path = dir.join(self.stub_file_name());
        std::fs::write(&stub_path, &self.stubs)
            .with_context(|| format!("writing stubs to {}", stub_path.display()))?;
        info!(path = %stub_path.display(), size = self.stubs.len(), "wrote stubs");
        Ok((glue_path, stub_path))
    }
}

/// Run the full pipeline: load config, resolve every module, and write the
/// glue and stub files.
///
/// `output` optionally overrides `[output] dir` from the config.  Returns
/// the paths written, glue and stubs interleaved in module order.
pub fn run(config_path: &Path, output: Option<&Path>) -> Result<Vec<PathBuf>> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let modules = generate_from_config(&cfg, base_dir)?;

    let out_dir = match output {
        Some(p) => p.to_path_buf(),
        None => base_dir.join(&cfg.output.dir),
    };
    let mut written = Vec::with_capacity(modules.len() * 2);
    for module in &modules {
        let (glue, stubs) = module.write_to(&out_dir)?;
        written.push(glue);
        written.push(stubs);
    }
    Ok(written)
}

/// Load a config file and return every module's outputs without writing
/// to disk.
pub fn generate(config_path: &Path) -> Result<Vec<GeneratedModule>> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    generate_from_config(&cfg, base_dir)
}

/// Generate every module of an already-loaded [`Config`].
///
/// `base_dir` is the directory input paths are relative to (typically the
/// parent directory of the TOML file).  Modules are processed in order;
/// each one's structs and enums become visible to the modules after it.
pub fn generate_from_config(cfg: &Config, base_dir: &Path) -> Result<Vec<GeneratedModule>> {
    info!(modules = cfg.modules.len(), "loaded configuration");

    let mut externals = ExternalTable::new();
    let mut out = Vec::with_capacity(cfg.modules.len());
    for module in &cfg.modules {
        let spec = resolve_module(module, base_dir, &externals)
            .with_context(|| format!("resolving module `{}`", module.name))?;
        externals.register_spec(&spec);
        out.push(generate_module(spec)?);
    }
    Ok(out)
}

/// Resolve one configured module against the symbols of the modules
/// before it.
pub fn resolve_module(
    module: &ModuleConfig,
    base_dir: &Path,
    externals: &ExternalTable,
) -> Result<ModuleSpec> {
    let mut externals = externals.clone();
    module.register_externals(&mut externals);
    let policy = module.policy();

    let mut spec = match module.input()? {
        ModuleInput::Idl(path) => {
            let path = base_dir.join(path);
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read declaration file {}", path.display()))?;
            let mut file = idl::parse(&source)
                .with_context(|| format!("parsing {}", path.display()))?;
            if let Some(prefix) = &module.prefix {
                file.attrs.insert("Prefix".to_string(), prefix.clone());
            }
            resolve::resolve_idl(&file, &module.name, &policy, &externals)?
        }
        ModuleInput::Decls(path) => {
            let mut file = decl::load_decls(&base_dir.join(path))?;
            file.module = module.name.clone();
            if let Some(prefix) = &module.prefix {
                file.prefix = prefix.clone();
            }
            file.dep_prefixes.extend(module.dep_prefixes.iter().cloned());
            resolve::resolve_decls(&file, &policy, &externals, module.source_link.as_deref())?
        }
    };

    if !module.includes.is_empty() {
        spec.includes = module.includes.clone();
    }
    if let Some(extra) = &module.extra_c {
        let path = base_dir.join(extra);
        let code = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read extra C code {}", path.display()))?;
        spec.extra_c_code = Some(code);
    }
    spec.cpp = module.cpp.as_ref().map(CppOptions::from);

    debug!(module = %spec.module_name, "applying transforms");
    Ok(transform::apply_all(spec))
}

/// Render both backends for a resolved spec.
pub fn generate_module(spec: ModuleSpec) -> Result<GeneratedModule> {
    let glue = emit::glue::generate(&spec)
        .with_context(|| format!("generating glue for `{}`", spec.module_name))?;
    let stubs = emit::stubs::generate(&spec);
    info!(
        module = %spec.module_name,
        glue = glue.len(),
        stubs = stubs.len(),
        "generated module"
    );
    Ok(GeneratedModule { spec, glue, stubs })
}
