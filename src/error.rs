//! Error types for the back office.

use std::path::PathBuf;

use rust_decimal::Decimal;
use uuid::Uuid;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read settings file {path:?}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Failed to parse settings file {path:?}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Record is locked: {0}")]
    Locked(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A billing rule failed against the row read inside the transaction.
    #[error(transparent)]
    Rejected(Box<BillingError>),
}

impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        let msg = e.to_string();
        if msg.contains("UNIQUE constraint failed")
            || msg.contains("FOREIGN KEY constraint failed")
            || msg.contains("CHECK constraint failed")
        {
            DatabaseError::Constraint(msg)
        } else {
            DatabaseError::Query(msg)
        }
    }
}

/// Invoicing and payment errors.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("Matter {0} not found")]
    MatterNotFound(Uuid),

    #[error("Nothing to invoice: no unbilled billable time, expenses or fee lines")]
    NothingToInvoice,

    #[error("Invoice is '{status}', expected {expected}")]
    InvalidStatus {
        status: &'static str,
        expected: &'static str,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {requested} exceeds the remaining {remaining}")]
    ExceedsRemaining {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for BillingError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Rejected(inner) => *inner,
            other => BillingError::Database(other),
        }
    }
}

/// Document storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid file name '{0}'")]
    InvalidName(String),

    #[error("Stored file missing at {0:?}")]
    Missing(PathBuf),

    #[error("I/O error on {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// CSV export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Unknown export '{0}'")]
    UnknownKind(String),

    #[error("CSV write failed: {0}")]
    Csv(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Authentication and tenant-resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or malformed bearer token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing or invalid X-Tenant-Id header")]
    MissingTenant,

    #[error("Not a member of tenant {0}")]
    NotMember(Uuid),

    #[error("Role '{role}' is not allowed to {action}")]
    Forbidden { role: &'static str, action: &'static str },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// HTTP server startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind {
        addr: std::net::SocketAddr,
        reason: String,
    },

    #[error("Invalid CORS origin '{0}'")]
    InvalidOrigin(String),
}

/// Audit trail verification errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to read audit log {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Audit log line {line} is not a valid event: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Audit chain broken at line {line}: {reason}")]
    Broken { line: usize, reason: String },
}
