//! Cloud provider error taxonomy
//!
//! Every vendor crate classifies its raw failures into [`CloudError`] before
//! handing them to callers, so resource code never matches vendor error text.

use thiserror::Error;

/// Classified cloud error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Network failures, timeouts, throttling and cancellation. Safe to retry.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Fieldless discriminant of [`CloudError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateId,
    NotSupported,
    NotImplemented,
    Transient,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::DuplicateId => write!(f, "duplicate-id"),
            ErrorKind::NotSupported => write!(f, "not-supported"),
            ErrorKind::NotImplemented => write!(f, "not-implemented"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl CloudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::NotFound(_) => ErrorKind::NotFound,
            CloudError::DuplicateId(_) => ErrorKind::DuplicateId,
            CloudError::NotSupported(_) => ErrorKind::NotSupported,
            CloudError::NotImplemented(_) => ErrorKind::NotImplemented,
            CloudError::Transient(_) => ErrorKind::Transient,
            CloudError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// The original diagnostic message, without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            CloudError::NotFound(m)
            | CloudError::DuplicateId(m)
            | CloudError::NotSupported(m)
            | CloudError::NotImplemented(m)
            | CloudError::Transient(m)
            | CloudError::Unknown(m) => m,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
