/// Service configuration loader - parses wxprob.toml
///
/// Keeps the endpoint, cache location, threshold resolution and the batch
/// case list out of the code. Every section is optional; an absent file or
/// section falls back to the defaults below.
///
/// Environment overrides (a `.env` file is honoured by the binary):
/// - `WXPROB_CONFIG` — path of the configuration file
/// - `WXPROB_CACHE`  — path of the cache file

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::analysis::probability::DEFAULT_THRESHOLD_STEPS;
use crate::catalog::{CatalogError, Model, Variable};

pub const DEFAULT_CONFIG_PATH: &str = "wxprob.toml";
pub const CONFIG_ENV: &str = "WXPROB_CONFIG";
pub const CACHE_ENV: &str = "WXPROB_CACHE";

/// Configuration problems are fatal: the binary reports them and exits
/// before doing any work.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub convert: ConvertConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cache.json"),
        }
    }
}

/// Upstream endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://meteologix.com/uk/ajax/ensemble".to_string(),
            user_agent: "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:108.0) Gecko/20100101 Firefox/108.0"
                .to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Number of thresholds between the minimum and the 99th percentile.
    pub threshold_steps: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            threshold_steps: DEFAULT_THRESHOLD_STEPS,
        }
    }
}

/// A named upstream location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationConfig {
    pub id: u64,
    pub name: String,
}

/// Offline batch settings. Empty `variables`/`models` lists mean "all".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub plots_dir: PathBuf,
    pub workers: usize,
    pub locations: Vec<LocationConfig>,
    pub variables: Vec<String>,
    pub models: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            plots_dir: PathBuf::from("plots"),
            workers: 4,
            locations: Vec::new(),
            variables: Vec::new(),
            models: Vec::new(),
        }
    }
}

impl BatchConfig {
    /// Resolves the variable list against the catalog.
    pub fn variables(&self) -> Result<Vec<Variable>, CatalogError> {
        if self.variables.is_empty() {
            return Ok(Variable::ALL.to_vec());
        }
        self.variables.iter().map(|v| v.parse()).collect()
    }

    /// Resolves the model list against the catalog.
    pub fn models(&self) -> Result<Vec<Model>, CatalogError> {
        if self.models.is_empty() {
            return Ok(Model::ALL.to_vec());
        }
        self.models.iter().map(|m| m.parse()).collect()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Parses configuration text and validates it.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and that every batch name exists in the catalog.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.convert.threshold_steps == 0 {
            return Err(ConfigError::Invalid("convert.threshold_steps must be at least 1".into()));
        }
        if self.batch.workers == 0 {
            return Err(ConfigError::Invalid("batch.workers must be at least 1".into()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be at least 1".into()));
        }
        self.batch.variables()?;
        self.batch.models()?;
        Ok(())
    }
}

/// Loads configuration from an explicit path. The file must exist.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = AppConfig::from_toml(&text, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Loads `$WXPROB_CONFIG` or `wxprob.toml`.
///
/// A missing default file is not an error; built-in defaults are used.
pub fn load_default_config() -> Result<AppConfig, ConfigError> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return load_config(Path::new(&path));
    }
    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.exists() {
        return load_config(path);
    }
    info!("no {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
    let mut config = AppConfig::default();
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(path) = env::var(CACHE_ENV) {
        config.cache.path = PathBuf::from(path);
    }
}
