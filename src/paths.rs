use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub fn database_file_path(cli_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_override {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os("WATCHTRACK_DB").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("watchtrack").join("watchtrack.db"))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("watchtrack").join("config.toml"))
}
