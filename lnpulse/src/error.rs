//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate {entity_type}: {key}")]
    Duplicate { entity_type: String, key: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// Retryable delivery failure (network, timeout, 429, 5xx).
    #[error("Transient delivery error: {message}")]
    TransientDelivery {
        status: Option<u16>,
        message: String,
        /// Server-provided hint from a `Retry-After` header.
        retry_after: Option<std::time::Duration>,
    },

    /// Non-retryable delivery failure (4xx other than 429).
    #[error("Permanent delivery error: {message}")]
    PermanentDelivery { status: Option<u16>, message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// HTTP status attached to a delivery error, if any.
    pub fn delivery_status(&self) -> Option<u16> {
        match self {
            Self::TransientDelivery { status, .. } | Self::PermanentDelivery { status, .. } => {
                *status
            }
            _ => None,
        }
    }

    /// Whether a failed delivery should be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PermanentDelivery { .. })
    }

    /// Whether this error is a SQLite unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::DatabaseSqlx(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let transient = Error::TransientDelivery {
            status: Some(503),
            message: "HTTP 503".to_string(),
            retry_after: None,
        };
        let permanent = Error::PermanentDelivery {
            status: Some(404),
            message: "HTTP 404".to_string(),
        };

        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert_eq!(transient.delivery_status(), Some(503));
        assert_eq!(permanent.delivery_status(), Some(404));
        assert_eq!(Error::validation("x").delivery_status(), None);
    }

    #[test]
    fn test_display() {
        let err = Error::duplicate("Event", "acct-1/inv-1");
        assert_eq!(err.to_string(), "Duplicate Event: acct-1/inv-1");
    }
}
