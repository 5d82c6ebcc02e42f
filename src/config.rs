use crate::invalidation::DEFAULT_CHANNEL;
use crate::statements::Dialect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BATCH_SAVE_SIZE: usize = 100_000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

/// Where the rows live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    /// Single-file store
    Embedded { path: PathBuf },
    /// Networked server, reached through an external provider
    Network {
        address: String,
        port: u16,
        database: String,
        username: String,
        #[serde(default)]
        password: String,
    },
}

impl Backend {
    pub fn dialect(&self) -> Dialect {
        match self {
            Backend::Embedded { .. } => Dialect::Embedded,
            Backend::Network { .. } => Dialect::Network,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Embedded {
            path: default_database_path_in(Path::new(".")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrmConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Rows per commit during a batch save
    #[serde(default = "default_batch_save_size")]
    pub batch_save_size: usize,
    /// Delay before an invalidation is applied
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl OrmConfig {
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Embedded { path: path.into() },
            ..Self::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            batch_save_size: DEFAULT_BATCH_SAVE_SIZE,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            channel: default_channel(),
        }
    }
}

fn default_batch_save_size() -> usize {
    DEFAULT_BATCH_SAVE_SIZE
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("rowcache.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".rowcache").join("rowcache.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<OrmConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: OrmConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &OrmConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
