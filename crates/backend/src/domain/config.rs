//! Configuration for the vault index.
//!
//! Config priority: explicit file (--config) > user (~/.config/vaultindex/config.toml) > defaults.
//! Environment overrides (`VAULTINDEX_MODEL`, `VAULTINDEX_POLLING`) are applied on top of
//! whichever file was loaded; command-line flags are applied last by the caller.

use std::{
  collections::BTreeMap,
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{dirs, embedding::models};

/// Environment variable selecting the embedding model by short name
pub const MODEL_ENV: &str = "VAULTINDEX_MODEL";
/// Environment variable forcing the polling watcher (`1` or `true`)
pub const POLLING_ENV: &str = "VAULTINDEX_POLLING";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Unsupported model '{name}'. Supported models: {supported}")]
  UnsupportedModel { name: String, supported: String },
  #[error("Invalid role '{0}'. Expected one of: auto, primary, reader")]
  InvalidRole(String),
  #[error("Invalid vault '{0}': expected PATH or NAME=PATH")]
  InvalidVault(String),
  #[error("Duplicate vault name '{0}'")]
  DuplicateVault(String),
}

// ============================================================================
// Coordination
// ============================================================================

/// How this process participates in writer election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  /// Negotiate the writer role through the shared lock row
  #[default]
  Auto,
  /// Always write, never coordinate
  Primary,
  /// Never write, never coordinate
  Reader,
}

impl FromStr for Role {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(Role::Auto),
      "primary" => Ok(Role::Primary),
      "reader" => Ok(Role::Reader),
      _ => Err(ConfigError::InvalidRole(s.to_string())),
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Role::Auto => "auto",
      Role::Primary => "primary",
      Role::Reader => "reader",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoordinationConfig {
  /// Writer election mode: "auto", "primary" or "reader" (default: auto)
  pub role: Role,
}

// ============================================================================
// Embedding Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// Short model name from the supported model table (default: "all-minilm")
  pub model: String,

  /// Ollama server URL
  pub ollama_url: String,

  /// Number of documents per embedding call when indexing (default: 16)
  pub batch_size: usize,

  /// Concurrent sub-batch requests sent to Ollama (default: 4)
  pub max_concurrent: usize,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      model: models::DEFAULT_MODEL.to_string(),
      ollama_url: "http://localhost:11434".to_string(),
      batch_size: 16,
      max_concurrent: 4,
    }
  }
}

// ============================================================================
// Index Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Maximum files drained from the work queue per indexing pass (default: 8)
  pub batch_size: usize,

  /// Enqueue every note on startup (default: true)
  pub reindex: bool,

  /// Watch vaults for changes (default: true)
  pub watch: bool,

  /// Note file extension, without the dot (default: "md")
  pub extension: String,

  /// File watcher debounce in milliseconds (default: 300)
  pub watcher_debounce_ms: u64,

  /// Use the polling watcher instead of native events (default: false)
  /// Needed for network shares and some container mounts.
  pub watcher_polling: bool,

  /// Poll interval for the polling watcher in seconds (default: 2)
  pub watcher_poll_secs: u64,

  /// How often a non-primary instance checks for a stale primary (default: 5)
  pub housekeeping_interval_secs: u64,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      batch_size: 8,
      reindex: true,
      watch: true,
      extension: "md".to_string(),
      watcher_debounce_ms: 300,
      watcher_polling: false,
      watcher_poll_secs: 2,
      housekeeping_interval_secs: 5,
    }
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub level: String,

  /// Log file rotation when running in the background: "daily", "hourly", "never"
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
  /// Vector store file (default: <data dir>/vaultindex.db)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub database: Option<PathBuf>,

  /// Vault name -> root directory
  #[serde(default)]
  pub vaults: BTreeMap<String, PathBuf>,

  #[serde(default)]
  pub embedding: EmbeddingConfig,

  #[serde(default)]
  pub index: IndexConfig,

  #[serde(default)]
  pub coordination: CoordinationConfig,

  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Load configuration from an explicit file, or the user config if present.
  ///
  /// An explicit file that cannot be read or parsed is an error. A missing user
  /// config falls back to defaults. Environment overrides are applied in both cases.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match explicit {
      Some(path) => Self::from_file(path)?,
      None => match Self::user_config_path() {
        Some(path) if path.exists() => Self::from_file(&path)?,
        _ => Self::default(),
      },
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Apply `VAULTINDEX_*` overrides using the given variable lookup
  pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(model) = lookup(MODEL_ENV).filter(|m| !m.trim().is_empty()) {
      self.embedding.model = model.trim().to_string();
    }
    if let Some(polling) = lookup(POLLING_ENV) {
      let polling = polling.trim().to_ascii_lowercase();
      self.index.watcher_polling = polling == "1" || polling == "true";
    }
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if std::env::var("CONFIG_DIR").is_ok() || std::env::var("XDG_CONFIG_HOME").is_ok() {
      return Some(dirs::default_config_dir().join("config.toml"));
    }

    ::dirs::config_dir().map(|p| p.join("vaultindex").join("config.toml"))
  }

  /// Resolved vector store location
  pub fn database_path(&self) -> PathBuf {
    self.database.clone().unwrap_or_else(dirs::default_database_path)
  }

  /// Add a vault from a command-line argument: either `PATH` (named after its
  /// final directory component) or `NAME=PATH`.
  pub fn add_vault_arg(&mut self, arg: &str) -> Result<(), ConfigError> {
    let (name, path) = match arg.split_once('=') {
      Some((name, path)) if !name.is_empty() && !path.is_empty() => (name.to_string(), PathBuf::from(path)),
      Some(_) => return Err(ConfigError::InvalidVault(arg.to_string())),
      None => {
        let path = PathBuf::from(arg);
        let name = path
          .file_name()
          .and_then(|n| n.to_str())
          .map(str::to_string)
          .ok_or_else(|| ConfigError::InvalidVault(arg.to_string()))?;
        (name, path)
      }
    };

    if self.vaults.contains_key(&name) {
      return Err(ConfigError::DuplicateVault(name));
    }
    self.vaults.insert(name, path);
    Ok(())
  }
}
