//! nfsio Common Library
//!
//! Shared functionality used by the nfsio crates:
//! - Error taxonomy and conversions
//! - Text codecs for non-binary file framing
//! - NFS URL and path utilities
//! - Configuration structures and handling
//! - Logging setup

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

// Re-export commonly used types
pub use codec::Codec;
pub use config::{
    load_config, load_config_or_default, load_default_config, save_config, LoggingConfig,
    MountOptions, NfsConfig,
};
pub use error::{NfsError, Result};
pub use utils::url::NfsUrl;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Default configuration paths
pub mod defaults {
    use std::path::PathBuf;

    /// Get default configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nfsio")
    }

    /// Get default config file path
    pub fn config_path() -> PathBuf {
        config_dir().join("nfsio.toml")
    }
}
