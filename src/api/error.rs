//! Mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{AuthError, BillingError, DatabaseError, ExportError, StorageError};

/// Error body is always `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(entity: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{entity} not found"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    fn internal(context: &str, err: &dyn std::fmt::Display) -> Self {
        tracing::error!("{}: {}", context, err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<(StatusCode, String)> for ApiError {
    fn from((status, message): (StatusCode, String)) -> Self {
        Self::new(status, message)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, .. } => Self::not_found(&entity),
            DatabaseError::Constraint(msg) => {
                tracing::debug!("Constraint violation: {}", msg);
                Self::conflict(constraint_message(&msg))
            }
            DatabaseError::Locked(msg) => Self::conflict(msg),
            DatabaseError::Serialization(msg) => Self::bad_request(msg),
            DatabaseError::Rejected(inner) => (*inner).into(),
            other => Self::internal("Database error", &other),
        }
    }
}

/// Turn a raw SQLite constraint message into something a client can act on.
fn constraint_message(raw: &str) -> String {
    if raw.contains("FOREIGN KEY") {
        "Referenced record does not exist in this tenant, or the record is still in use".to_string()
    } else if raw.contains("UNIQUE") {
        "A record with the same unique value already exists".to_string()
    } else {
        "Value violates a data constraint".to_string()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvoiceNotFound(_) => Self::not_found("Invoice"),
            BillingError::MatterNotFound(_) => Self::not_found("Matter"),
            BillingError::InvalidStatus { .. } => Self::conflict(err.to_string()),
            BillingError::NothingToInvoice
            | BillingError::InvalidAmount(_)
            | BillingError::ExceedsRemaining { .. } => Self::bad_request(err.to_string()),
            BillingError::Database(e) => e.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken => {
                Self::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            AuthError::MissingTenant => Self::bad_request(err.to_string()),
            AuthError::NotMember(_) | AuthError::Forbidden { .. } => {
                Self::new(StatusCode::FORBIDDEN, err.to_string())
            }
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            StorageError::InvalidName(_) => Self::bad_request(err.to_string()),
            StorageError::Missing(_) => Self::not_found("Stored file"),
            StorageError::Io { .. } => Self::internal("Document storage error", &err),
            StorageError::Database(e) => e.into(),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::UnknownKind(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            ExportError::Csv(_) => Self::internal("CSV export failed", &err),
            ExportError::Database(e) => e.into(),
        }
    }
}
