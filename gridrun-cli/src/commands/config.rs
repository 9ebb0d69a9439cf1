//! Configuration management commands

use anyhow::{Context, Result};
use gridrun_config::{ConfigLoader, GridrunConfig};
use std::path::Path;

/// Validate a configuration file, including environment overrides
pub fn handle_config_validate(config_file: &Path) -> Result<()> {
    ConfigLoader::new()
        .from_file(config_file)
        .with_context(|| format!("Invalid configuration in {:?}", config_file))?;
    println!("Configuration {:?} is valid", config_file);
    Ok(())
}

/// Write a sample configuration file
pub fn handle_config_generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{:?} already exists; use --force to overwrite it",
            output
        );
    }
    std::fs::write(output, GridrunConfig::generate_sample())
        .with_context(|| format!("Failed to write {:?}", output))?;
    println!("Wrote sample configuration to {:?}", output);
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &GridrunConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
