//! Backend API errors.

use thiserror::Error;

use crate::FieldError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request never produced a response (connect, TLS, reset, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an error status or `success: false`.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String, fields: Vec<FieldError> },

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// The configured API root cannot be turned into a request url.
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into(), fields: Vec::new() }
    }

    /// Backend-supplied message that is safe to show, if any.
    pub fn public_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}
