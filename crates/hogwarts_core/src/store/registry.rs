//! Store roles, descriptors and the partition registry.
//!
//! # Responsibility
//! - Map each house to its partition store descriptor.
//! - Expose the single authoritative and backup descriptors.
//!
//! # Invariants
//! - A registry always holds exactly one descriptor per role and per house.
//! - Lookups are pure; nothing here touches a database.

use crate::config::{RegistryConfig, StoreConfig};
use crate::model::student::House;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// House key does not map to a registered partition store.
    UnknownPartition(String),
    /// A house has no configured partition store.
    MissingPartition(House),
    /// Two configured keys normalize to the same house.
    DuplicatePartition(House),
    /// Store selector text matches no role.
    UnknownStore(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPartition(value) => write!(f, "unknown partition: `{value}`"),
            Self::MissingPartition(house) => {
                write!(f, "no partition store configured for {house}")
            }
            Self::DuplicatePartition(house) => {
                write!(f, "partition store configured twice for {house}")
            }
            Self::UnknownStore(value) => write!(f, "unknown store selector: `{value}`"),
        }
    }
}

impl Error for RegistryError {}

/// Engine behind a store, as named in the registry config.
///
/// # Limitations
/// - Only `Sqlite` has a connector. The other dialects parse, but
///   `SqliteConnector::acquire` rejects them with
///   `ConnectError::UnsupportedDialect`; reaching them needs another
///   `StoreConnector` implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineDialect {
    #[default]
    Sqlite,
    MariaDb,
    Derby,
    HsqlDb,
    Oracle,
    H2,
}

/// Logical role of a store. Doubles as the selector accepted by listing and resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreRole {
    Authoritative,
    Backup,
    Partition(House),
}

/// Selector used by the read-only listing and single-store resync entry points.
pub type StoreSelector = StoreRole;

impl StoreRole {
    pub fn is_partition(self) -> bool {
        matches!(self, Self::Partition(_))
    }
}

impl Display for StoreRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authoritative => f.write_str("authoritative"),
            Self::Backup => f.write_str("backup"),
            Self::Partition(house) => {
                write!(f, "partition:{}", house.name().to_ascii_lowercase())
            }
        }
    }
}

impl FromStr for StoreRole {
    type Err = RegistryError;

    /// Accepts `authoritative`/`hogwarts`, `backup`/`local`, a house name, or
    /// the `partition:<house>` form produced by `Display`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "authoritative" | "hogwarts" | "master" => Ok(Self::Authoritative),
            "backup" | "local" => Ok(Self::Backup),
            other => {
                let house_key = other.strip_prefix("partition:").unwrap_or(other);
                House::parse(house_key)
                    .map(Self::Partition)
                    .ok_or_else(|| RegistryError::UnknownStore(value.to_string()))
            }
        }
    }
}

/// Connection parameters as resolved for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Everything needed to reach one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    pub role: StoreRole,
    pub params: ConnectionParams,
    pub dialect: EngineDialect,
}

impl StoreDescriptor {
    pub fn new(role: StoreRole, config: &StoreConfig) -> Self {
        Self {
            role,
            params: ConnectionParams {
                url: config.url.clone(),
                user: config.user.clone(),
                password: config.password.clone(),
            },
            dialect: config.dialect,
        }
    }
}

/// Immutable role/partition to descriptor mapping, built once at startup.
#[derive(Debug, Clone)]
pub struct PartitionRegistry {
    authoritative: StoreDescriptor,
    backup: StoreDescriptor,
    partitions: BTreeMap<House, StoreDescriptor>,
}

impl PartitionRegistry {
    /// Builds the registry, requiring a descriptor for every house.
    pub fn from_config(config: &RegistryConfig) -> RegistryResult<Self> {
        let mut partitions = BTreeMap::new();
        for (key, store) in &config.partitions {
            let house =
                House::parse(key).ok_or_else(|| RegistryError::UnknownPartition(key.clone()))?;
            let descriptor = StoreDescriptor::new(StoreRole::Partition(house), store);
            if partitions.insert(house, descriptor).is_some() {
                return Err(RegistryError::DuplicatePartition(house));
            }
        }

        if let Some(missing) = House::ALL
            .into_iter()
            .find(|house| !partitions.contains_key(house))
        {
            return Err(RegistryError::MissingPartition(missing));
        }

        Ok(Self {
            authoritative: StoreDescriptor::new(StoreRole::Authoritative, &config.authoritative),
            backup: StoreDescriptor::new(StoreRole::Backup, &config.backup),
            partitions,
        })
    }

    /// Resolves a raw house key (case-insensitive, trimmed) to its partition store.
    pub fn resolve_partition(&self, house: &str) -> RegistryResult<&StoreDescriptor> {
        House::parse(house)
            .map(|house| self.partition_store(house))
            .ok_or_else(|| RegistryError::UnknownPartition(house.to_string()))
    }

    pub fn partition_store(&self, house: House) -> &StoreDescriptor {
        // `from_config` guarantees every house is present.
        &self.partitions[&house]
    }

    pub fn authoritative_store(&self) -> &StoreDescriptor {
        &self.authoritative
    }

    pub fn backup_store(&self) -> &StoreDescriptor {
        &self.backup
    }

    pub fn select(&self, selector: StoreSelector) -> &StoreDescriptor {
        match selector {
            StoreRole::Authoritative => self.authoritative_store(),
            StoreRole::Backup => self.backup_store(),
            StoreRole::Partition(house) => self.partition_store(house),
        }
    }

    /// Every store that mirrors the authoritative one: four partitions, then backup.
    pub fn slaves(&self) -> impl Iterator<Item = &StoreDescriptor> {
        self.partitions.values().chain(std::iter::once(&self.backup))
    }
}
