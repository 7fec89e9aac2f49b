//! Error types for the warpath coordinator.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WarpathError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Payload already claimed")]
    AlreadyClaimed,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("RDS error: {0}")]
    RdsError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
}

impl From<sqlx::Error> for WarpathError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => WarpathError::NotFound("row not found".to_string()),
            other => WarpathError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WarpathError {
    fn from(err: serde_json::Error) -> Self {
        WarpathError::ValidationError(format!("JSON serialization error: {err}"))
    }
}

impl From<reqwest::Error> for WarpathError {
    fn from(err: reqwest::Error) -> Self {
        WarpathError::RdsError(err.to_string())
    }
}

impl From<redis::RedisError> for WarpathError {
    fn from(err: redis::RedisError) -> Self {
        WarpathError::CacheError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WarpathError>;

/// Error codes surfaced to Edge in `error` reply envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    PayloadTypeError,
    InvalidNode,
    InternalError,
    NoSource,
    ClaimFailed,
    NoPayload,
    MissingPickup,
    NoStorage,
    RdsFailed,
    UnknownType,
    RedirectFailed,
    NodeError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayloadTypeError => "payload_type_error",
            Self::InvalidNode => "invalid_node",
            Self::InternalError => "internal_error",
            Self::NoSource => "no_source",
            Self::ClaimFailed => "claim_failed",
            Self::NoPayload => "no_payload",
            Self::MissingPickup => "missing_pickup",
            Self::NoStorage => "no_storage",
            Self::RdsFailed => "rds_failed",
            Self::UnknownType => "unknown_type",
            Self::RedirectFailed => "redirect_failed",
            Self::NodeError => "node_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_strings() {
        assert_eq!(ErrorCode::PayloadTypeError.to_string(), "payload_type_error");
        assert_eq!(ErrorCode::ClaimFailed.to_string(), "claim_failed");
        assert_eq!(ErrorCode::RdsFailed.to_string(), "rds_failed");
        assert_eq!(ErrorCode::RedirectFailed.to_string(), "redirect_failed");
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: WarpathError = sqlx::Error::RowNotFound.into();
        assert_eq!(err, WarpathError::NotFound("row not found".to_string()));
    }
}
