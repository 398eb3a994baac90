//! Config file path resolution for gator.
//!
//! Provides a TOML-based config file at `~/.config/gator/config.toml` (or
//! `$XDG_CONFIG_HOME/gator/config.toml`), plus the `gator init` command that
//! writes a starter file. Actual layering (file -> env -> CLI overrides) is
//! `gator_core::config::Config::load`'s job; this module only resolves
//! *where* that file lives.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use gator_core::config::Config;

/// Return the gator config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/gator` or `~/.config/gator`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("gator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gator")
}

/// Return the path to the gator config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Execute the `gator init` command: write a starter config file with
/// every option at its default value.
pub fn cmd_init(force: bool) -> Result<()> {
    let path = config_path();

    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    Config::write_starter(&path)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    println!("Config written to {}", path.display());
    println!("Edit it to set maxWorkers, agents, checks, and escalation limits.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("gator/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
