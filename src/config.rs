use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MetaError;

pub const DEFAULT_CONFIG_FILE: &str = "anndata-meta.json";
pub const DEFAULT_REGION: &str = "us-east-1";

/// On-disk configuration file. Every field is optional; environment and
/// command-line values are layered on top.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: Option<bool>,
    #[serde(default)]
    pub anonymous: Option<bool>,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub anonymous: bool,
}

/// Everything the object store needs to connect. Secrets are not held here;
/// they are looked up from the environment or the named shared-credentials
/// profile when the store is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub anonymous: bool,
    pub profile: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            force_path_style: false,
            anonymous: false,
            profile: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<StorageConfig, MetaError> {
        let config = match path {
            Some(path) => Self::read(Path::new(path))?,
            None => Self::load_first(&Self::default_paths())?,
        };
        Ok(Self::resolve_config(config, overrides, |name| {
            std::env::var(name).ok()
        }))
    }

    /// `./anndata-meta.json`, then `<config dir>/anndata-meta/anndata-meta.json`.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(dirs) = BaseDirs::new() {
            paths.push(
                dirs.config_dir()
                    .join("anndata-meta")
                    .join(DEFAULT_CONFIG_FILE),
            );
        }
        paths
    }

    /// Reads the first candidate that exists. No candidate at all yields the
    /// empty config.
    pub fn load_first(candidates: &[PathBuf]) -> Result<Config, MetaError> {
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                Self::read(path)
            }
            None => Ok(Config::default()),
        }
    }

    fn read(path: &Path) -> Result<Config, MetaError> {
        let content =
            fs::read_to_string(path).map_err(|_| MetaError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| MetaError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config<E>(config: Config, overrides: ConfigOverrides, env: E) -> StorageConfig
    where
        E: Fn(&str) -> Option<String>,
    {
        let env_value = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let region = overrides
            .region
            .or_else(|| env_value("AWS_REGION"))
            .or_else(|| env_value("AWS_DEFAULT_REGION"))
            .or(config.region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let endpoint_url = overrides
            .endpoint_url
            .or_else(|| env_value("AWS_ENDPOINT_URL_S3"))
            .or_else(|| env_value("AWS_ENDPOINT_URL"))
            .or(config.endpoint_url)
            .map(|url| url.trim_end_matches('/').to_string());

        StorageConfig {
            region,
            endpoint_url,
            force_path_style: config.force_path_style.unwrap_or(false),
            anonymous: overrides.anonymous || config.anonymous.unwrap_or(false),
            profile: env_value("AWS_PROFILE").or(config.profile),
        }
    }
}
