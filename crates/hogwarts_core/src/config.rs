//! Store connection configuration.
//!
//! # Responsibility
//! - Describe the connection parameters of every store role.
//! - Load that description from JSON, or derive a local all-SQLite layout.
//!
//! # Invariants
//! - Passwords never appear in `Debug` output.
//! - Partition keys are house names; validation happens when the registry is built.

use crate::model::student::House;
use crate::store::registry::EngineDialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};

const AUTHORITATIVE_FILE: &str = "hogwarts.sqlite3";
const BACKUP_FILE: &str = "local.sqlite3";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid store config: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Connection parameters for one store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dialect: EngineDialect,
}

impl StoreConfig {
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            url: path.as_ref().to_string_lossy().into_owned(),
            user: None,
            password: None,
            dialect: EngineDialect::Sqlite,
        }
    }
}

impl Debug for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dialect", &self.dialect)
            .finish()
    }
}

/// Full store layout: one authoritative, one backup, one store per house.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub authoritative: StoreConfig,
    pub backup: StoreConfig,
    /// Keyed by house name (case-insensitive).
    pub partitions: BTreeMap<String, StoreConfig>,
}

impl RegistryConfig {
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Six SQLite files under `dir`; the files are created on first open.
    pub fn local_layout(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let partitions = House::ALL
            .into_iter()
            .map(|house| {
                let file = format!("{}.sqlite3", house.name().to_ascii_lowercase());
                (house.name().to_string(), StoreConfig::sqlite(dir.join(file)))
            })
            .collect();

        Self {
            authoritative: StoreConfig::sqlite(dir.join(AUTHORITATIVE_FILE)),
            backup: StoreConfig::sqlite(dir.join(BACKUP_FILE)),
            partitions,
        }
    }
}
