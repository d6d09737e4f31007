//! AWS pipeline error types
//!
//! [`AwsError`] is what actually went wrong inside one request/response
//! cycle. It never leaves the crate unclassified: see [`crate::classify`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Endpoint resolution failed: {0}")]
    Endpoint(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error envelope returned by the vendor
    #[error("{code}: {message} (status {status}, request id {request_id})")]
    Service {
        status: u16,
        code: String,
        message: String,
        request_id: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Action {0} refused: account is read-only")]
    ReadOnly(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AwsError {
    /// HTTP status, when the error came with a response
    pub fn status(&self) -> Option<u16> {
        match self {
            AwsError::Service { status, .. } => Some(*status),
            AwsError::Decode(e) => Some(e.status()),
            AwsError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Failure to turn a response body into a typed result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to read response body (status {status}, request id {request_id}): {message}")]
    Read {
        status: u16,
        request_id: String,
        message: String,
    },

    #[error("malformed response (status {status}, request id {request_id}): {message}")]
    Malformed {
        status: u16,
        request_id: String,
        message: String,
    },

    #[error("element <{element}> not found in response (status {status}, request id {request_id})")]
    ResultElementMissing {
        status: u16,
        request_id: String,
        element: String,
    },
}

impl DecodeError {
    pub fn status(&self) -> u16 {
        match self {
            DecodeError::Read { status, .. }
            | DecodeError::Malformed { status, .. }
            | DecodeError::ResultElementMissing { status, .. } => *status,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            DecodeError::Read { request_id, .. }
            | DecodeError::Malformed { request_id, .. }
            | DecodeError::ResultElementMissing { request_id, .. } => request_id,
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
