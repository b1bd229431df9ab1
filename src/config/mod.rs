pub mod deployment;
pub mod profiles;
pub mod settings;

pub use deployment::*;
pub use profiles::*;
pub use settings::*;

use crate::error::AppResult;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "dotnet-remote";

/// Get the dotnet-remote config directory
pub fn get_config_dir() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or_else(|| crate::error::AppError::Config("Could not find config directory".into()))?
        .join(APP_DIR_NAME);

    Ok(config_dir)
}

/// Get the download cache directory (installer scripts, offline payloads)
pub fn get_cache_dir() -> AppResult<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .map(|c| c.join(APP_DIR_NAME))
        .map(Ok)
        .unwrap_or_else(|| get_config_dir().map(|c| c.join("cache")))?;

    Ok(cache_dir)
}

/// Get the directory holding helper binaries staged onto remote hosts
pub fn get_tools_dir() -> AppResult<PathBuf> {
    Ok(get_config_dir()?.join("tools"))
}

/// Default private key used when neither a profile nor the options name one
pub fn default_private_key() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ssh").join("id_rsa"))
        .unwrap_or_else(|| PathBuf::from("id_rsa"))
}
