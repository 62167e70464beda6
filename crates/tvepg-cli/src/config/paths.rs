//! Config file location.

use std::path::PathBuf;

use anyhow::{Result, bail};

/// Environment variable naming the config file directly.
pub const CONFIG_ENV: &str = "TVEPG_CONFIG";

/// File name looked up inside a config directory.
const CONFIG_FILE: &str = "config.toml";

/// Resolves the config file path from the process environment.
///
/// Lookup order: `--dir`, `$TVEPG_CONFIG`, `$XDG_CONFIG_HOME/tvepg`,
/// `$HOME/.config/tvepg`.
///
/// # Errors
///
/// Returns an error if none of the above is available.
pub fn resolve_config_path(dir: Option<&PathBuf>) -> Result<PathBuf> {
    locate(dir, |key| std::env::var(key).ok())
}

/// Lookup behind [`resolve_config_path`], with the environment injected.
fn locate(dir: Option<&PathBuf>, env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = dir {
        return Ok(dir.join(CONFIG_FILE));
    }
    if let Some(file) = var(CONFIG_ENV) {
        return Ok(PathBuf::from(file));
    }
    if let Some(base) = var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(base).join("tvepg").join(CONFIG_FILE));
    }
    if let Some(home) = var("HOME") {
        return Ok(PathBuf::from(home)
            .join(".config")
            .join("tvepg")
            .join(CONFIG_FILE));
    }
    bail!("cannot locate config: pass --dir or set {CONFIG_ENV} or HOME")
}
