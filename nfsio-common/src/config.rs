use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NfsConfig {
    /// Mount context behaviour
    #[serde(default)]
    pub mount: MountOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options applied to a mount context and the files opened through it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    /// Permission bits passed when a file has to be created
    #[serde(default = "default_create_mode")]
    pub create_mode: u32,

    /// Codec used for text framing when none is given at open (None = raw)
    #[serde(default = "default_codec")]
    pub default_codec: Option<String>,

    /// Drop `.` and `..` from directory listings
    #[serde(default)]
    pub skip_dot_entries: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, plain)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include span and target information
    #[serde(default)]
    pub with_target: bool,
}

// Default value functions
fn default_create_mode() -> u32 { 0o664 }
fn default_codec() -> Option<String> { Some("utf-8".to_string()) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "plain".to_string() }

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            create_mode: default_create_mode(),
            default_codec: default_codec(),
            skip_dot_entries: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            with_target: false,
        }
    }
}

/// Load configuration from file
pub fn load_config<T, P>(config_path: P) -> crate::error::Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let config_path = config_path.as_ref();
    let content = std::fs::read_to_string(config_path)
        .map_err(|e| crate::error::NfsError::Configuration(
            format!("Failed to read config file {}: {}", config_path.display(), e)
        ))?;

    toml::from_str(&content)
        .map_err(|e| crate::error::NfsError::Configuration(
            format!("Failed to parse config file {}: {}", config_path.display(), e)
        ))
}

/// Save configuration to file
pub fn save_config<T, P>(config: &T, config_path: P) -> crate::error::Result<()>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    let config_path = config_path.as_ref();
    let content = toml::to_string_pretty(config)
        .map_err(|e| crate::error::NfsError::Configuration(
            format!("Failed to serialize config: {}", e)
        ))?;

    // Create parent directory if it doesn't exist
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| crate::error::NfsError::Configuration(
                format!("Failed to create config directory {}: {}", parent.display(), e)
            ))?;
    }

    std::fs::write(config_path, content)
        .map_err(|e| crate::error::NfsError::Configuration(
            format!("Failed to write config file {}: {}", config_path.display(), e)
        ))?;

    Ok(())
}

/// Load `config_path`, or defaults when the file does not exist
pub fn load_config_or_default<P: AsRef<Path>>(config_path: P) -> crate::error::Result<NfsConfig> {
    let config_path = config_path.as_ref();
    if config_path.exists() {
        load_config(config_path)
    } else {
        Ok(NfsConfig::default())
    }
}

/// Load the configuration from the default location, falling back to defaults
/// when no file exists
pub fn load_default_config() -> crate::error::Result<NfsConfig> {
    load_config_or_default(crate::defaults::config_path())
}
