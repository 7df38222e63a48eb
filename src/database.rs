//! Embedded SQLite relational store
//!
//! The relational store owns entities, reachability state, and alert
//! history; counters and rate samples belong to the time-series store.
//! Everything in the monitoring schema keys timestamps as epoch seconds,
//! so the column conversion helpers live here next to the connection.
//!
//! Tuning notes: WAL journaling lets ping batches commit row updates while
//! list queries read, and the 30-second busy timeout matches the deadline
//! the concurrency model gives relational calls. Foreign keys are always
//! on; interface and summary rows cascade from their device.

use crate::domain_types::ConnectionPoolSize;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Pool, Sqlite, SqlitePool, migrate::Migrator};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Static migrator for embedded `SQLite` migrations
static MIGRATOR: Migrator = sqlx::migrate!();

/// Database-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database error from `SQLx`
    #[error("Database error: {message}")]
    Database {
        /// Error message from database operation
        message: String,
    },

    /// File system I/O error
    #[error("File system error: {message}")]
    FileSystem {
        /// Error message from file system operation
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the configuration field that was invalid
        field: String,
        /// Reason why the configuration was invalid
        reason: String,
    },

    /// Migration error
    #[error("Migration failed: {message}")]
    Migration {
        /// Error message from migration operation
        message: String,
    },

    /// A row holds a value the domain refuses to represent
    #[error("Row mapping error: {column} - {reason}")]
    RowMapping {
        /// Column that failed to map
        column: String,
        /// Reason the value was rejected
        reason: String,
    },
}

/// Database error types, including raw `SQLx` failures
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error from `SQLx`
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DatabaseError {
    /// True when the failure is a uniqueness violation
    ///
    /// The alert dedup insert relies on this: losing the conditional-insert
    /// race surfaces as a unique constraint error that callers treat as
    /// "already exists".
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Database result type
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Storage result type for pure functions
pub type StorageResult<T> = Result<T, StorageError>;

/// Converts a domain timestamp to the epoch-seconds column form
#[must_use]
pub fn to_epoch(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

/// Converts an epoch-seconds column value back to a domain timestamp;
/// out-of-range values degrade to the epoch rather than poisoning a row
#[must_use]
pub fn from_epoch(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Where the relational store lives and how it is opened
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    path: PathBuf,
    pool_size: ConnectionPoolSize,
    wal_mode: bool,
}

impl DatabaseConfig {
    /// Production settings: WAL journaling, default pool
    ///
    /// # Errors
    ///
    /// Returns an error when the path is empty or lacks the `.db`
    /// extension; catching a swapped argument here beats creating a stray
    /// file named after a community string at startup.
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path = Self::validated(path)?;
        Ok(Self {
            path,
            pool_size: ConnectionPoolSize::default(),
            wal_mode: true,
        })
    }

    /// Test settings: single connection, rollback journaling
    ///
    /// # Errors
    ///
    /// Returns an error when the path fails validation.
    pub fn for_testing<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path = Self::validated(path)?;
        Ok(Self {
            path,
            pool_size: ConnectionPoolSize::try_new(1)
                .expect("pool size 1 should be valid (range: 1-100)"),
            wal_mode: false,
        })
    }

    fn validated<P: AsRef<Path>>(path: P) -> DatabaseResult<PathBuf> {
        let path = path.as_ref();
        let valid = !path.as_os_str().is_empty()
            && path.extension().is_some_and(|ext| ext == "db");
        if valid {
            Ok(path.to_path_buf())
        } else {
            Err(DatabaseError::Storage(StorageError::Configuration {
                field: "database_path".to_string(),
                reason: format!("not a .db file: {}", path.display()),
            }))
        }
    }

    /// Overrides the connection pool size
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: ConnectionPoolSize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// The store location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The connection pool size
    #[must_use]
    pub fn pool_size(&self) -> ConnectionPoolSize {
        self.pool_size
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let mut options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .pragma("foreign_keys", "ON");
        if self.wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }
        options.disable_statement_logging()
    }
}

/// Tuning pragmas applied once per pool: crash-safe-but-fast sync, a
/// generous page cache for the list queries, and a busy timeout matching
/// the 30s relational deadline
const TUNING_PRAGMAS: &[&str] = &[
    "PRAGMA synchronous = NORMAL",
    "PRAGMA cache_size = -65536",
    "PRAGMA temp_store = MEMORY",
    "PRAGMA busy_timeout = 30000",
];

/// Database connection with managed pool
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

impl DatabaseConnection {
    /// Opens the store: parent directory, pool, tuning pragmas, migrations
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be opened or migrated; both
    /// are fatal startup conditions.
    pub async fn initialize(config: DatabaseConfig) -> DatabaseResult<Self> {
        if let Some(parent) = config.path().parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DatabaseError::Storage(StorageError::FileSystem {
                    message: format!("Failed to create directory {}: {}", parent.display(), e),
                })
            })?;
        }

        let pool = SqlitePool::connect_with(config.connect_options())
            .await
            .map_err(|e| {
                DatabaseError::Storage(StorageError::Database {
                    message: format!("Failed to open {}: {e}", config.path().display()),
                })
            })?;

        for pragma in TUNING_PRAGMAS {
            sqlx::query(pragma).execute(&pool).await.map_err(|e| {
                DatabaseError::Storage(StorageError::Database {
                    message: format!("Failed to apply {pragma}: {e}"),
                })
            })?;
        }

        info!(path = %config.path().display(), "running relational store migrations");
        if let Err(e) = MIGRATOR.run(&pool).await {
            warn!("relational store migration failed: {}", e);
            return Err(DatabaseError::Storage(StorageError::Migration {
                message: format!("Schema migration execution failed: {e}"),
            }));
        }

        Ok(Self { pool, config })
    }

    /// Tests the connection; the engine health check calls this
    ///
    /// # Errors
    ///
    /// Returns an error if the connection test fails
    pub async fn test_connection(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::Storage(StorageError::Database {
                    message: format!("Connection test failed: {e}"),
                })
            })?;
        Ok(())
    }

    /// The connection pool the stores execute against
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// The configuration this connection was opened with
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}
