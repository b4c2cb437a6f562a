use thiserror::Error;

use crate::index::IndexError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    Uniqueness(String),

    #[error("{0}")]
    DeleteConflict(String),

    #[error("Search index error: {0}")]
    Upstream(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ApiError {
    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::Permission(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Uniqueness(_) | ApiError::DeleteConflict(_) => 409,
            ApiError::Upstream(_) => 502,
            ApiError::Storage(_)
            | ApiError::Config(_)
            | ApiError::Io(_)
            | ApiError::Json(_)
            | ApiError::Yaml(_) => 500,
        }
    }

    /// True for errors the caller caused (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexErrorKind;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Validation("x".into()).status_code(), 400);
        assert_eq!(ApiError::Permission("x".into()).status_code(), 403);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ApiError::Uniqueness("x".into()).status_code(), 409);
        assert_eq!(ApiError::DeleteConflict("x".into()).status_code(), 409);
        assert_eq!(ApiError::Storage("x".into()).status_code(), 500);
    }

    #[test]
    fn test_upstream_from_index_error() {
        let err: ApiError = IndexError::new(IndexErrorKind::Transport, "connection refused").into();
        assert_eq!(err.status_code(), 502);
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("connection refused"));
    }
}
