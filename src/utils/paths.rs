//! Cross-Platform Path Utilities
//!
//! Resolves the Marginalia data directory (`~/.marginalia/`) and the files in it.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Marginalia directory (~/.marginalia/)
pub fn marginalia_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".marginalia"))
}

/// Get the config file path (~/.marginalia/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(marginalia_dir()?.join("config.json"))
}

/// Get the database file path (~/.marginalia/data.db)
pub fn database_path() -> AppResult<PathBuf> {
    Ok(marginalia_dir()?.join("data.db"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the Marginalia directory, creating if it doesn't exist
pub fn ensure_marginalia_dir() -> AppResult<PathBuf> {
    let path = marginalia_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
