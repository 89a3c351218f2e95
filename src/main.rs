use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use startup_accelerator::accelerator::injection_plan;
use startup_accelerator::bytecode::{Instruction, inject_after_marker};
use startup_accelerator::config::settings::default_config_dir;
use startup_accelerator::config::{ConfigEntry, HostProfile, Settings, Toggle};
use startup_accelerator::logging;
use startup_accelerator::patching::PassthroughSet;

/// A bootstrap method as an instruction listing.
#[derive(Debug, Deserialize)]
struct Listing {
    instructions: Vec<Instruction>,
}

fn main() -> Result<()> {
    let _guard = logging::init(&logging::default_log_dir())?;

    let config_dir = env::var_os("STARTUP_ACCELERATOR_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_dir);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => show_settings(&config_dir),
        [command, listing] if command == "inject" => inject(&config_dir, Path::new(listing)),
        _ => bail!("usage: startup-accelerator [inject <listing.toml>]"),
    }
}

fn show_settings(config_dir: &Path) -> Result<()> {
    let profile = HostProfile::load(config_dir)?;
    let settings = Settings::load(config_dir)?;

    println!("config: {}", settings.file().path().display());
    for toggle in [
        &settings.delay_patching,
        &settings.merge_localization,
        &settings.delay_config_save,
    ] {
        show_toggle(toggle);
    }

    let passthrough = PassthroughSet::resolve(
        &profile.passthrough,
        settings.merge_localization.value().is_on(),
        &settings.passthrough.value(),
    );
    println!("passthrough classes:");
    for name in passthrough.sorted() {
        println!("  {name}");
    }

    Ok(())
}

fn show_toggle(entry: &ConfigEntry<Toggle>) {
    println!("  {:<24}= {:?}", entry.key(), entry.value());
    println!("      {}", entry.description());
}

fn inject(config_dir: &Path, listing_path: &Path) -> Result<()> {
    let profile = HostProfile::load(config_dir)?;
    let raw = fs::read_to_string(listing_path)
        .with_context(|| format!("reading {}", listing_path.display()))?;
    let listing: Listing = toml::from_str(&raw)
        .with_context(|| format!("parsing {}", listing_path.display()))?;

    let plan = injection_plan(&profile.bootstrap);
    let injection = inject_after_marker(&listing.instructions, &plan)
        .context("bootstrap method does not match the expected shape")?;
    let inserted = plan.call.instructions().len();

    tracing::info!(sites = injection.sites.len(), "bootstrap listing rewritten");
    for (index, instruction) in injection.instructions.iter().enumerate() {
        let added = injection
            .sites
            .iter()
            .any(|&site| (site..site + inserted).contains(&index));
        let marker = if added { "+" } else { " " };
        println!("{marker}{index:4}  {instruction}");
    }

    Ok(())
}
