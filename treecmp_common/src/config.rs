use crate::{AppConfig, TreeCmpError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "treecmp.toml";

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
}

/// Load configuration.
///
/// Resolution order: `explicit` (must exist), a `treecmp.toml` next to the
/// executable, then the platform config directory. A missing file yields
/// defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, TreeCmpError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(TreeCmpError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return read_config(path.to_path_buf());
    }

    read_config(resolve_config_path()?)
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), TreeCmpError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| TreeCmpError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn read_config(path: PathBuf) -> Result<LoadedConfig, TreeCmpError> {
    let exists = path.exists();

    let config = if exists {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).map_err(|e| TreeCmpError::Config(e.to_string()))?
    } else {
        AppConfig::default()
    };

    if config.jobs == Some(0) {
        return Err(TreeCmpError::Config("jobs must be at least 1".to_string()));
    }

    Ok(LoadedConfig {
        config,
        path,
        exists,
    })
}

fn resolve_config_path() -> Result<PathBuf, TreeCmpError> {
    if let Some(portable_path) = portable_config_path() {
        if portable_path.exists() {
            return Ok(portable_path);
        }
    }

    let dirs = ProjectDirs::from("", "treecmp", "treecmp")
        .ok_or_else(|| TreeCmpError::Config("Unable to determine config directory".to_string()))?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
