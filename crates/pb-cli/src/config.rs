use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pb_ai::SchemaConfiguration;
use serde::{Deserialize, Serialize};

use crate::SourceArgs;

const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Defaults read from `config.toml`. Flags and environment variables win.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Schema settings applied to every tool.
    #[serde(default)]
    pub schema: SchemaConfiguration,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    pub reflection_url: Option<String>,
    #[serde(default)]
    pub descriptor_sets: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
    pub ttl_secs: Option<u64>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("could not determine config directory")?
            .join("protobridge");
        Ok(dir.join("config.toml"))
    }

    /// Reads `path`, or the default location when none is given. Only a
    /// missing default file is tolerated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Flags merged over the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub reflection_url: Option<String>,
    pub descriptor_sets: Vec<String>,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub timeout: Option<Duration>,
    pub schema: SchemaConfiguration,
}

impl Settings {
    pub fn load(args: &SourceArgs) -> Result<Self> {
        let config = Config::load(args.config.as_deref())?;
        Ok(Self::merge(args, config))
    }

    fn merge(args: &SourceArgs, config: Config) -> Self {
        let mut schema = config.schema;
        if let Some(max_depth) = args.max_depth {
            schema.max_depth = max_depth;
        }
        let descriptor_sets = if args.descriptor_sets.is_empty() {
            config.source.descriptor_sets
        } else {
            args.descriptor_sets.clone()
        };

        Self {
            reflection_url: args.reflection_url.clone().or(config.source.reflection_url),
            descriptor_sets,
            cache_dir: args.cache_dir.clone().or(config.cache.dir),
            cache_ttl: Duration::from_secs(
                args.cache_ttl_secs
                    .or(config.cache.ttl_secs)
                    .unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
            timeout: args.timeout_secs.or(config.timeout_secs).map(Duration::from_secs),
            schema,
        }
    }
}
