//! Application Configuration
//!
//! User settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::PermissionStatus;
use crate::vision::OnnxModelConfig;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera settings
    pub capture: CaptureSettings,
    /// OCR model settings
    pub model: ModelSettings,
    /// Output settings
    pub output: OutputSettings,
}

/// Camera-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Image file or directory of images the file camera photographs
    pub source: Option<PathBuf>,
    /// Permission status at startup
    pub initial_permission: PermissionStatus,
    /// Answer given when permission is requested
    pub grant_on_request: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: None,
            initial_permission: PermissionStatus::Granted,
            grant_on_request: true,
        }
    }
}

/// OCR model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Path to the ONNX meter model
    pub path: Option<PathBuf>,
    /// Characters the model emits, in class order
    pub charset: String,
    /// CTC blank class index
    pub blank_index: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let defaults = OnnxModelConfig::default();
        Self {
            path: None,
            charset: defaults.charset,
            blank_index: defaults.blank_index,
            intra_threads: defaults.intra_threads,
        }
    }
}

impl ModelSettings {
    /// Backend configuration for the ONNX model
    pub fn onnx_config(&self) -> OnnxModelConfig {
        OnnxModelConfig {
            charset: self.charset.clone(),
            blank_index: self.blank_index,
            intra_threads: self.intra_threads.max(1),
        }
    }
}

/// Where files are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory for the captured photo (defaults to the data directory)
    pub directory: Option<PathBuf>,
    /// File name of the captured photo, overwritten every capture
    pub photo_filename: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: None,
            photo_filename: "captured_image.jpg".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!(config.capture.source.is_none());
        assert_eq!(config.capture.initial_permission, PermissionStatus::Granted);
        assert!(config.capture.grant_on_request);

        assert!(config.model.path.is_none());
        assert_eq!(config.model.charset, "0123456789");
        assert_eq!(config.model.blank_index, 0);

        assert!(config.output.directory.is_none());
        assert_eq!(config.output.photo_filename, "captured_image.jpg");
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.capture.source = Some(PathBuf::from("/photos"));
        config.capture.initial_permission = PermissionStatus::Denied;
        config.model.path = Some(PathBuf::from("/models/meter.onnx"));
        config.model.blank_index = 10;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.capture.source, Some(PathBuf::from("/photos")));
        assert_eq!(parsed.capture.initial_permission, PermissionStatus::Denied);
        assert_eq!(parsed.model.path, Some(PathBuf::from("/models/meter.onnx")));
        assert_eq!(parsed.model.onnx_config().blank_index, 10);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [model]
            path = "meter.onnx"

            [capture]
            initial_permission = "not_determined"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.model.path, Some(PathBuf::from("meter.onnx")));
        assert_eq!(parsed.model.charset, "0123456789");
        assert_eq!(parsed.capture.initial_permission, PermissionStatus::NotDetermined);
        assert!(parsed.capture.grant_on_request);
        assert_eq!(parsed.output.photo_filename, "captured_image.jpg");
    }

    #[test]
    fn test_onnx_config_clamps_threads() {
        let mut settings = ModelSettings::default();
        settings.intra_threads = 0;
        assert_eq!(settings.onnx_config().intra_threads, 1);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.output.photo_filename = "meter.jpg".to_string();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.output.photo_filename, "meter.jpg");
        assert_eq!(loaded.capture.grant_on_request, config.capture.grant_on_request);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
