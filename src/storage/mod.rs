//! Storage Layer
//!
//! Resolves the application's data and configuration directories and the
//! single output path the camera overwrites on every capture.

use anyhow::Result;
use std::path::PathBuf;

use crate::config::OutputSettings;

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "meterreader", "MeterReader")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "meterreader", "MeterReader")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Path the captured photo is written to
pub fn photo_output_path(settings: &OutputSettings) -> Result<PathBuf> {
    let dir = match &settings.directory {
        Some(dir) => dir.clone(),
        None => get_data_dir()?.join("captures"),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(&settings.photo_filename))
}
