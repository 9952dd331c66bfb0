//! flushfs configuration.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushFsConfig {
  /// Name of the single file in the root directory.
  #[serde(default = "FlushFsConfig::default_file_name")]
  pub file_name: String,
  /// Permission bits reported for the file.
  #[serde(default = "FlushFsConfig::default_file_perm")]
  pub file_perm: u16,
  /// Permission bits reported for the root directory.
  #[serde(default = "FlushFsConfig::default_dir_perm")]
  pub dir_perm: u16,
  /// FUSE mount settings.
  #[serde(default)]
  pub mount_options: FuseMountOptions,
  /// Logging settings.
  #[serde(default)]
  pub logging: LoggingConfig
}

impl FlushFsConfig {
  fn default_file_name() -> String {
    "foo".to_string()
  }

  const fn default_file_perm() -> u16 {
    0o777
  }

  const fn default_dir_perm() -> u16 {
    0o777
  }

  /// Parse a TOML document.
  ///
  /// # Errors
  ///
  /// Returns an error if the document is not valid TOML for this schema or
  /// names an unusable file.
  pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
    let config: Self = toml::from_str(text).context("invalid flushfs config")?;
    config.validate()?;
    Ok(config)
  }

  /// Load a TOML configuration file.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be read or parsed.
  pub fn from_file(path: &Path) -> anyhow::Result<Self> {
    let text = std::fs::read_to_string(path)
      .with_context(|| format!("reading config {}", path.display()))?;
    Self::from_toml_str(&text).with_context(|| format!("loading config {}", path.display()))
  }

  /// Check that the file name is a single non-empty path component.
  ///
  /// # Errors
  ///
  /// Returns an error describing the offending name.
  pub fn validate(&self) -> anyhow::Result<()> {
    let name = self.file_name.as_str();
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
      anyhow::bail!("file_name {name:?} must be a single path component");
    }
    Ok(())
  }
}

impl Default for FlushFsConfig {
  fn default() -> Self {
    Self {
      file_name: Self::default_file_name(),
      file_perm: Self::default_file_perm(),
      dir_perm: Self::default_dir_perm(),
      mount_options: FuseMountOptions::default(),
      logging: LoggingConfig::default()
    }
  }
}

/// FUSE mount settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuseMountOptions {
  /// Filesystem name.
  #[serde(default = "FuseMountOptions::default_fs_name")]
  pub fs_name: String,
  /// Allow access by other users.
  #[serde(default)]
  pub allow_other: bool
}

impl FuseMountOptions {
  fn default_fs_name() -> String {
    "flushfs".to_string()
  }
}

impl Default for FuseMountOptions {
  fn default() -> Self {
    Self {
      fs_name: Self::default_fs_name(),
      allow_other: false
    }
  }
}

impl From<&FuseMountOptions> for flushfs_fuse::MountOptions {
  fn from(options: &FuseMountOptions) -> Self {
    Self {
      fs_name: options.fs_name.clone(),
      allow_other: options.allow_other,
      read_only: false
    }
  }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  /// Default log filter when `RUST_LOG` is unset.
  #[serde(default = "LoggingConfig::default_level")]
  pub level: String
}

impl LoggingConfig {
  fn default_level() -> String {
    "info".to_string()
  }
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: Self::default_level()
    }
  }
}
