//! Scoped store handles.
//!
//! # Responsibility
//! - Turn a `StoreDescriptor` into a live connection for a single operation.
//! - Release that connection on every exit path.
//!
//! # Invariants
//! - A `StoreHandle` owns its connection; dropping the handle closes it.
//! - No pooling: every `acquire` opens a fresh physical connection.

use crate::db::{open_store, DbError};
use crate::store::registry::{EngineDialect, StoreDescriptor, StoreRole};
use log::{debug, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type ConnectResult<T> = Result<T, ConnectError>;

/// Store is unreachable or cannot be bootstrapped. Transient; safe to retry.
#[derive(Debug)]
pub enum ConnectError {
    Open { role: StoreRole, source: DbError },
    UnsupportedDialect { role: StoreRole, dialect: EngineDialect },
    EmptyUrl(StoreRole),
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { role, source } => write!(f, "cannot connect to {role} store: {source}"),
            Self::UnsupportedDialect { role, dialect } => {
                write!(f, "no connector for {dialect:?} ({role} store)")
            }
            Self::EmptyUrl(role) => write!(f, "{role} store has an empty connection url"),
        }
    }
}

impl Error for ConnectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Acquires short-lived handles for store descriptors.
pub trait StoreConnector: Send + Sync {
    fn acquire(&self, descriptor: &StoreDescriptor) -> ConnectResult<StoreHandle>;
}

/// Exclusive, scoped ownership of one store connection.
pub struct StoreHandle {
    role: StoreRole,
    conn: Connection,
    acquired_at: Instant,
}

impl StoreHandle {
    pub fn new(role: StoreRole, conn: Connection) -> Self {
        Self {
            role,
            conn,
            acquired_at: Instant::now(),
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        debug!(
            "event=store_release module=store status=ok store={} held_ms={}",
            self.role,
            self.acquired_at.elapsed().as_millis()
        );
    }
}

/// Connector for `EngineDialect::Sqlite` descriptors.
///
/// Accepts bare paths, `sqlite:` / `sqlite://` prefixed paths, `jdbc:sqlite:`
/// urls, and `file:` URIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl SqliteConnector {
    pub fn new() -> Self {
        Self
    }
}

impl StoreConnector for SqliteConnector {
    fn acquire(&self, descriptor: &StoreDescriptor) -> ConnectResult<StoreHandle> {
        let role = descriptor.role;
        if descriptor.dialect != EngineDialect::Sqlite {
            warn!(
                "event=store_acquire module=store status=error store={role} error_code=unsupported_dialect"
            );
            return Err(ConnectError::UnsupportedDialect {
                role,
                dialect: descriptor.dialect,
            });
        }

        let path = sqlite_path(&descriptor.params.url);
        if path.is_empty() {
            return Err(ConnectError::EmptyUrl(role));
        }

        let conn = open_store(path).map_err(|source| {
            warn!(
                "event=store_acquire module=store status=error store={role} error_code=open_failed error={source}"
            );
            ConnectError::Open { role, source }
        })?;
        debug!("event=store_acquire module=store status=ok store={role}");
        Ok(StoreHandle::new(role, conn))
    }
}

fn sqlite_path(url: &str) -> &str {
    let trimmed = url.trim();
    ["jdbc:sqlite:", "sqlite://", "sqlite:"]
        .into_iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
}
