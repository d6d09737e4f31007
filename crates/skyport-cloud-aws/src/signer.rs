//! Request signing
//!
//! SigV4 via `aws-sigv4`. Standard calls are signed in headers, presigned
//! URLs carry the signature in the query string.

use crate::error::{AwsError, Result};
use crate::service::ServiceTarget;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SignatureLocation, SigningParams, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use std::time::{Duration, SystemTime};

/// Attaches authentication to an encoded request
pub trait RequestSigner: Send + Sync {
    fn sign(&self, target: &ServiceTarget, request: &mut http::Request<String>) -> Result<()>;

    fn presign(
        &self,
        target: &ServiceTarget,
        request: &mut http::Request<String>,
        expires_in: Duration,
    ) -> Result<()>;
}

pub struct SigV4Signer {
    credentials: Credentials,
}

impl SigV4Signer {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn sign_with(
        &self,
        target: &ServiceTarget,
        request: &mut http::Request<String>,
        settings: SigningSettings,
    ) -> Result<()> {
        let identity: Identity = self.credentials.clone().into();
        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&target.signing_region)
            .name(&target.service_name)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| AwsError::Signing(e.to_string()))?
            .into();

        let uri = request.uri().to_string();
        let headers: Vec<(&str, &str)> = request
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect();
        let signable = SignableRequest::new(
            request.method().as_str(),
            uri.as_str(),
            headers.into_iter(),
            SignableBody::Bytes(request.body().as_bytes()),
        )
        .map_err(|e| AwsError::Signing(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| AwsError::Signing(e.to_string()))?
            .into_parts();
        instructions.apply_to_request_http1x(request);
        Ok(())
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(&self, target: &ServiceTarget, request: &mut http::Request<String>) -> Result<()> {
        self.sign_with(target, request, SigningSettings::default())
    }

    fn presign(
        &self,
        target: &ServiceTarget,
        request: &mut http::Request<String>,
        expires_in: Duration,
    ) -> Result<()> {
        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(expires_in);
        self.sign_with(target, request, settings)
    }
}
