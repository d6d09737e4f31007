//! Dispatcher
//!
//! One request/response cycle per call: build, sign, send, decode, classify.
//! Per-(family, region) clients are created on first use and cached for the
//! lifetime of the dispatcher.

use crate::classify::classify;
use crate::config::AwsClientConfig;
use crate::decoder;
use crate::error::AwsError;
use crate::params::ParameterMap;
use crate::request::RequestBuilder;
use crate::service::{Operation, ServiceFamily, ServiceTarget};
use crate::signer::{RequestSigner, SigV4Signer};
use crate::transport::{HttpTransport, Transport};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use skyport_cloud::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cached per-(family, region) client. Immutable once published.
pub struct ServiceClient {
    pub target: ServiceTarget,
    transport: Arc<dyn Transport>,
}

pub struct Dispatcher {
    config: AwsClientConfig,
    signer: Arc<dyn RequestSigner>,
    shared_transport: Option<Arc<dyn Transport>>,
    clients: DashMap<(ServiceFamily, String), Arc<ServiceClient>>,
}

impl Dispatcher {
    pub fn new(config: AwsClientConfig) -> Self {
        let signer = Arc::new(SigV4Signer::new(config.credentials()));
        Self {
            config,
            signer,
            shared_transport: None,
            clients: DashMap::new(),
        }
    }

    /// Route every family and region through one transport
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.shared_transport = Some(transport);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn config(&self) -> &AwsClientConfig {
        &self.config
    }

    /// Number of clients created so far
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }

    /// Client for `(family, region)`, created on first use. Failed creations
    /// are not cached.
    pub fn client(&self, family: ServiceFamily, region: &str) -> std::result::Result<Arc<ServiceClient>, AwsError> {
        let region = self.config.resolve_region(region);
        let key = (family, region.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(Arc::clone(client.value()));
        }

        let entry = self
            .clients
            .entry(key)
            .or_try_insert_with(|| self.connect(family, region))?;
        Ok(Arc::clone(entry.value()))
    }

    fn connect(&self, family: ServiceFamily, region: &str) -> std::result::Result<Arc<ServiceClient>, AwsError> {
        let target = ServiceTarget::resolve(family, region, self.config.endpoint_url.as_deref())?;
        let transport: Arc<dyn Transport> = match &self.shared_transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        tracing::debug!("Created {} client for {} at {}", family, region, target.endpoint);
        Ok(Arc::new(ServiceClient { target, transport }))
    }

    fn check_read_only(&self, op: &Operation) -> std::result::Result<(), AwsError> {
        if self.config.permits(&op.name) {
            Ok(())
        } else {
            Err(AwsError::ReadOnly(op.name.clone()))
        }
    }

    /// Issue `op` and decode its result into `T`
    pub async fn call<T>(
        &self,
        family: ServiceFamily,
        region: &str,
        op: impl Into<Operation>,
        params: ParameterMap,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.call_with_cancel(family, region, op, params, &CancellationToken::new())
            .await
    }

    /// As [`Dispatcher::call`], abandoning the exchange when `cancel` fires.
    /// The in-flight response body is dropped, which closes the connection.
    pub async fn call_with_cancel<T>(
        &self,
        family: ServiceFamily,
        region: &str,
        op: impl Into<Operation>,
        params: ParameterMap,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let op = op.into();
        // Fires on caller cancellation and when this call is dropped, so a
        // decode still running on the blocking pool lets go of the body.
        let exchange_cancel = cancel.child_token();
        let _release = exchange_cancel.clone().drop_guard();
        let result = tokio::select! {
            result = self.exchange::<T>(family, region, &op, params, &exchange_cancel) => result,
            _ = cancel.cancelled() => Err(AwsError::Cancelled(op.name.clone())),
        };
        result.map_err(|err| {
            tracing::debug!("{} {} failed: {}", family, op.name, err);
            classify(err)
        })
    }

    async fn exchange<T>(
        &self,
        family: ServiceFamily,
        region: &str,
        op: &Operation,
        params: ParameterMap,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, AwsError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.check_read_only(op)?;
        let client = self.client(family, region)?;
        let target = &client.target;

        let mut request = RequestBuilder::new(target)
            .with_debug(self.config.debug)
            .build(op, &params)?
            .into_http()?;
        self.signer.sign(target, &mut request)?;

        let raw = client
            .transport
            .execute(target, request, cancel)
            .await?
            .abort_on(cancel.clone());
        let dialect = target.dialect();
        let debug = self.config.debug;
        let decode_op = op.clone();
        let result = tokio::task::spawn_blocking(move || {
            decoder::decode_response::<T>(raw, &decode_op, dialect, debug)
        })
        .await
        .map_err(|e| AwsError::Internal(format!("decode task failed: {}", e)))?;

        if let Err(AwsError::Service { status: 403, .. }) = &result {
            tracing::warn!("Permission denied for {}:{}", target.service_name, op.name);
            if let Some(hook) = &self.config.forbidden_hook {
                hook(&target.service_name, &op.name);
            }
        }
        result
    }

    /// Presigned GET URL for `op`, valid for `expires_in`
    pub fn presign(
        &self,
        family: ServiceFamily,
        region: &str,
        op: impl Into<Operation>,
        params: &ParameterMap,
        expires_in: Duration,
    ) -> Result<String> {
        let op = op.into();
        let presigned = || -> std::result::Result<String, AwsError> {
            self.check_read_only(&op)?;
            let client = self.client(family, region)?;
            let mut request = RequestBuilder::new(&client.target)
                .with_debug(self.config.debug)
                .presign(&op, params)?
                .into_http()?;
            self.signer.presign(&client.target, &mut request, expires_in)?;
            Ok(request.uri().to_string())
        };
        presigned().map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessEnv;

    fn dispatcher(config: AwsClientConfig) -> Dispatcher {
        Dispatcher::new(config)
    }

    #[test]
    fn test_client_cache_reuses_clients() {
        let d = dispatcher(AwsClientConfig::new(AccessEnv::Global, "AKID", "SECRET"));
        let a = d.client(ServiceFamily::Ec2, "us-east-1").unwrap();
        let b = d.client(ServiceFamily::Ec2, "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        d.client(ServiceFamily::Rds, "us-east-1").unwrap();
        d.client(ServiceFamily::Ec2, "eu-west-1").unwrap();
        assert_eq!(d.cached_clients(), 3);
    }

    #[test]
    fn test_empty_region_uses_default() {
        let d = dispatcher(AwsClientConfig::new(AccessEnv::China, "AKID", "SECRET"));
        let client = d.client(ServiceFamily::Ec2, "").unwrap();
        assert_eq!(client.target.signing_region, "cn-north-1");
        assert!(Arc::ptr_eq(&client, &d.client(ServiceFamily::Ec2, "cn-north-1").unwrap()));
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let d = dispatcher(AwsClientConfig::new(AccessEnv::Global, "AKID", "SECRET"));
        assert!(d.client(ServiceFamily::Ec2, "Not A Region").is_err());
        assert_eq!(d.cached_clients(), 0);
    }

    #[test]
    fn test_presign_returns_signed_url() {
        let d = dispatcher(AwsClientConfig::new(AccessEnv::Global, "AKID", "SECRET"));
        let url = d
            .presign(
                ServiceFamily::Sts,
                "us-east-1",
                "GetCallerIdentity",
                &ParameterMap::new(),
                Duration::from_secs(60),
            )
            .unwrap();
        assert!(url.starts_with("https://sts.us-east-1.amazonaws.com/?"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_presign_respects_read_only() {
        let d = dispatcher(
            AwsClientConfig::new(AccessEnv::Global, "AKID", "SECRET").with_read_only(true),
        );
        let err = d
            .presign(
                ServiceFamily::Sts,
                "us-east-1",
                "AssumeRole",
                &ParameterMap::new(),
                Duration::from_secs(60),
            )
            .unwrap_err();
        assert_eq!(err.kind(), skyport_cloud::ErrorKind::NotSupported);
    }
}
