//! Xelon API errors

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single Xelon API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success status code.
    #[error("xelon api returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The request never produced a response.
    #[error("xelon api request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The response body could not be decoded.
    #[error("invalid xelon api response: {0}")]
    Decode(#[source] reqwest::Error),

    /// The client could not be constructed.
    #[error("invalid xelon api client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// HTTP status of the response, if one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the API reported the addressed resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Status {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_404_is_not_found() {
        assert!(ApiError::not_found("gone").is_not_found());

        let err = ApiError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(!ApiError::Config("bad".to_string()).is_not_found());
    }
}
