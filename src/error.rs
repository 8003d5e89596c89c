//! Error types for the partner directory.
//!
//! Every layer below the directory service returns [`DirectoryResult`]. The
//! service itself logs these errors and presents a uniform absent result to
//! its callers, so a failed lookup looks exactly like an unknown user.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Configuration rejected: {message}")]
    Configuration { message: String, suggestion: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Directory '{deployment_id}' is not configured")]
    NotConfigured { deployment_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Operation not supported by this directory: {operation}")]
    Unsupported { operation: String },
}

impl DirectoryError {
    /// Create a configuration error with a helpful suggestion.
    pub fn configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    pub fn not_configured(deployment_id: impl Into<String>) -> Self {
        Self::NotConfigured {
            deployment_id: deployment_id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an error for write-back operations the external store does not accept.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration { suggestion, .. } => Some(suggestion),
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convert sqlx errors to DirectoryError.
impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DirectoryError::configuration(
                msg.to_string(),
                "Check the connection URL format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DirectoryError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DirectoryError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => DirectoryError::connection(
                "Timed out acquiring a pooled connection",
                "Increase connect_timeout_ms or max_size, or check the directory server load",
            ),
            sqlx::Error::PoolClosed => DirectoryError::connection(
                "Connection pool is closed",
                "Reconfigure the deployment to open a new pool",
            ),
            sqlx::Error::Io(io_err) => DirectoryError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DirectoryError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DirectoryError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility with the selected dialect",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DirectoryError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DirectoryError::decode(
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DirectoryError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DirectoryError::decode(source.to_string()),
            sqlx::Error::AnyDriverError(err) => DirectoryError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            _ => DirectoryError::database(format!("Unexpected database error: {}", err), None),
        }
    }
}

/// Result type alias for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DirectoryError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));

        let err = DirectoryError::not_configured("openspp");
        assert_eq!(err.to_string(), "Directory 'openspp' is not configured");
    }

    #[test]
    fn test_error_suggestion() {
        let err = DirectoryError::configuration("Unknown dialect 'Oracle'", "Pick a listed dialect");
        assert_eq!(err.suggestion(), Some("Pick a listed dialect"));
        assert_eq!(DirectoryError::database("boom", None).suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DirectoryError::connection("err", "sugg").is_retryable());
        assert!(!DirectoryError::unsupported("update_credentials").is_retryable());
        assert!(!DirectoryError::configuration("bad", "fix").is_retryable());
    }

    #[test]
    fn test_pool_timeout_maps_to_connection() {
        let err: DirectoryError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DirectoryError::Connection { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: DirectoryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DirectoryError::Database { sql_state: None, .. }));
    }

    #[test]
    fn test_unsupported_names_operation() {
        let err = DirectoryError::unsupported("remove_user");
        assert!(err.to_string().contains("remove_user"));
    }
}
