//! ErrorClassifier
//!
//! Maps raw pipeline failures onto the closed [`CloudError`] taxonomy so
//! callers never match vendor error codes or message text.

use crate::error::{AwsError, DecodeError};
use skyport_cloud::CloudError;

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottled",
    "RequestThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "PriorRequestNotComplete",
    "SlowDown",
    "EC2ThrottledException",
];

const SERVER_FAULT_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "InternalServerError",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "Unavailable",
    "RequestTimeout",
    "RequestTimeoutException",
    "RequestExpired",
];

const NOT_IMPLEMENTED_CODES: &[&str] = &[
    "InvalidAction",
    "NotImplemented",
    "UnknownOperationException",
];

fn is_duplicate(code: &str) -> bool {
    code.ends_with("Duplicate") || code.contains("AlreadyExists")
}

fn is_not_found(code: &str, message: &str) -> bool {
    code.contains("NotFound")
        || code.starts_with("NoSuch")
        || code == "ResourceNotFoundException"
        || message.contains("does not exist")
        || message.contains("not found")
}

fn is_not_supported(code: &str) -> bool {
    code.starts_with("Unsupported") || code.contains("NotSupported")
}

fn classify_service(status: u16, code: &str, message: &str, description: String) -> CloudError {
    if is_duplicate(code) {
        CloudError::DuplicateId(description)
    } else if is_not_found(code, message) || (code.is_empty() && status == 404) {
        CloudError::NotFound(description)
    } else if NOT_IMPLEMENTED_CODES.contains(&code) {
        CloudError::NotImplemented(description)
    } else if is_not_supported(code) {
        CloudError::NotSupported(description)
    } else if THROTTLING_CODES.contains(&code)
        || SERVER_FAULT_CODES.contains(&code)
        || status == 429
        || status >= 500
    {
        CloudError::Transient(description)
    } else {
        CloudError::Unknown(description)
    }
}

/// Classify a pipeline error
pub fn classify(err: AwsError) -> CloudError {
    let description = err.to_string();
    match &err {
        AwsError::Service {
            status,
            code,
            message,
            ..
        } => classify_service(*status, code, message, description),
        AwsError::Http(e) => {
            if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                CloudError::Transient(description)
            } else if let Some(status) = e.status() {
                classify_service(status.as_u16(), "", "", description)
            } else {
                CloudError::Unknown(description)
            }
        }
        AwsError::Decode(DecodeError::Read { .. }) => CloudError::Transient(description),
        AwsError::Decode(_) => CloudError::Unknown(description),
        AwsError::Cancelled(_) => CloudError::Transient(description),
        AwsError::ReadOnly(_) => CloudError::NotSupported(description),
        AwsError::Config(_) | AwsError::Endpoint(_) | AwsError::Signing(_) | AwsError::Internal(_) => {
            CloudError::Unknown(description)
        }
    }
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        classify(err)
    }
}
