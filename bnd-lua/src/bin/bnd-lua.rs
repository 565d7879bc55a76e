//! CLI entry point for bnd-lua.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

/// bnd-lua — generate Lua C API glue and LuaCATS stubs.
#[derive(Parser, Debug)]
#[command(name = "bnd-lua", version, about)]
struct Cli {
    /// Path to the bnd-lua.toml configuration file.
    #[arg(default_value = "bnd-lua.toml")]
    config: PathBuf,

    /// Output directory (overrides config).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only write this module (all modules are still resolved, in order).
    #[arg(long)]
    module: Option<String>,

    /// Print the resolved module specs as JSON instead of writing files.
    #[arg(long)]
    dump_spec: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bnd_lua=info")),
        )
        .init();

    let cli = Cli::parse();

    let cfg = bnd_lua::config::load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let base_dir = cli.config.parent().unwrap_or_else(|| Path::new("."));

    let mut modules = bnd_lua::generate_from_config(&cfg, base_dir)?;
    if let Some(name) = &cli.module {
        modules.retain(|m| &m.spec.module_name == name);
        if modules.is_empty() {
            bail!("no module named `{name}` in {}", cli.config.display());
        }
    }

    if cli.dump_spec {
        let specs: Vec<_> = modules.iter().map(|m| &m.spec).collect();
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    let out_dir = match &cli.output {
        Some(p) => p.clone(),
        None => base_dir.join(&cfg.output.dir),
    };
    for module in &modules {
        module.write_to(&out_dir)?;
    }
    Ok(())
}
