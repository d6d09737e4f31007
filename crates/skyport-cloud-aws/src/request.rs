//! RequestBuilder
//!
//! Serializes an operation and its parameters into an unsigned HTTP request:
//! a form-encoded POST, or a GET with the same encoding in the query string
//! for presigned URLs.

use crate::error::{AwsError, Result};
use crate::params::ParameterMap;
use crate::service::{Operation, ServiceTarget};
use http::header::CONTENT_TYPE;
use url::Url;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

const RESERVED_KEYS: [&str; 2] = ["Action", "Version"];

/// An encoded request, ready for the signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignableRequest {
    pub method: http::Method,
    pub url: Url,
    pub content_type: Option<&'static str>,
    pub body: String,
}

impl SignableRequest {
    pub fn into_http(self) -> Result<http::Request<String>> {
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(self.url.as_str());
        if let Some(content_type) = self.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder
            .body(self.body)
            .map_err(|e| AwsError::Endpoint(e.to_string()))
    }
}

pub struct RequestBuilder<'a> {
    target: &'a ServiceTarget,
    debug: bool,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(target: &'a ServiceTarget) -> Self {
        Self {
            target,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Form-encoded POST
    pub fn build(&self, op: &Operation, params: &ParameterMap) -> Result<SignableRequest> {
        let body = self.encode(op, params);
        Ok(SignableRequest {
            method: http::Method::POST,
            url: self.url_for(op)?,
            content_type: Some(FORM_CONTENT_TYPE),
            body,
        })
    }

    /// GET with the encoded parameters in the query string
    pub fn presign(&self, op: &Operation, params: &ParameterMap) -> Result<SignableRequest> {
        let query = self.encode(op, params);
        let mut url = self.url_for(op)?;
        url.set_query(Some(&query));
        Ok(SignableRequest {
            method: http::Method::GET,
            url,
            content_type: None,
            body: String::new(),
        })
    }

    fn url_for(&self, op: &Operation) -> Result<Url> {
        self.target
            .endpoint
            .join(&op.service_path)
            .map_err(|e| AwsError::Endpoint(format!("{}{}: {}", self.target.endpoint, op.service_path, e)))
    }

    fn encode(&self, op: &Operation, params: &ParameterMap) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("Action", &op.name);
        form.append_pair("Version", &self.target.api_version);
        for (key, value) in params.iter() {
            if RESERVED_KEYS.contains(&key) {
                tracing::warn!("Ignoring reserved parameter {}={} for {}", key, value, op.name);
                continue;
            }
            form.append_pair(key, value);
        }
        let encoded = form.finish();

        if self.debug {
            tracing::debug!("[{}] {} params: {}", self.target.service_name, op.name, encoded);
        }
        encoded
    }
}
