//! Print the effective configuration.

use anyhow::{Context, Result};

use crate::config::{default_config_path, Config};

/// Run the config command.
pub fn run(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;

    match default_config_path() {
        Some(path) => println!("# default path: {}", path.display()),
        None => println!("# default path: unavailable"),
    }
    print!("{rendered}");
    Ok(())
}
