//! Initialize the configuration directory: create ~/.relance, default config,
//! and the data directory for the database.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the `data` subdirectory for the database.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let data_dir = config_dir.join("data");
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        log::info!("created data directory at {}", data_dir.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_config_and_data_dir() {
        let dir = std::env::temp_dir().join(format!("relance-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        let created = init_config_dir(&config_path).expect("init");
        assert_eq!(created, dir);
        assert!(config_path.exists());
        assert!(dir.join("data").exists());
        assert_eq!(std::fs::read(&config_path).expect("read"), b"{}");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
