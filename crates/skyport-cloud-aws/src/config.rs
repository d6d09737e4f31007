//! Per-account client configuration

use crate::error::{AwsError, Result};
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Called with `(service name, action)` whenever the vendor answers 403
pub type ForbiddenHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Partition the account lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessEnv {
    #[default]
    Global,
    China,
}

impl AccessEnv {
    /// Region used when a caller passes an empty region id
    pub fn default_region(&self) -> &'static str {
        match self {
            AccessEnv::Global => "us-west-1",
            AccessEnv::China => "cn-north-1",
        }
    }

    pub fn domain_suffix(&self) -> &'static str {
        match self {
            AccessEnv::Global => "amazonaws.com",
            AccessEnv::China => "amazonaws.com.cn",
        }
    }

    /// Partition implied by a region id
    pub fn for_region(region: &str) -> Self {
        if region.starts_with("cn-") {
            AccessEnv::China
        } else {
            AccessEnv::Global
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "global" | "internationalcloud" | "aws" => Some(AccessEnv::Global),
            "china" | "chinacloud" | "aws-cn" => Some(AccessEnv::China),
            _ => None,
        }
    }
}

impl fmt::Display for AccessEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessEnv::Global => write!(f, "global"),
            AccessEnv::China => write!(f, "china"),
        }
    }
}

/// Everything a [`crate::Dispatcher`] needs to talk to one account
#[derive(Clone)]
pub struct AwsClientConfig {
    pub access_env: AccessEnv,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub account_id: Option<String>,
    /// Log encoded parameters and raw response bodies
    pub debug: bool,
    /// Refuse every action that is not a Get/List/Describe call
    pub read_only: bool,
    pub timeout: Duration,
    /// Replaces the catalogue endpoint for every service (emulators, tests)
    pub endpoint_url: Option<String>,
    pub forbidden_hook: Option<ForbiddenHook>,
}

impl AwsClientConfig {
    pub fn new(
        access_env: AccessEnv,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            access_env,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            account_id: None,
            debug: false,
            read_only: false,
            timeout: DEFAULT_TIMEOUT,
            endpoint_url: None,
            forbidden_hook: None,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| AwsError::Config("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| AwsError::Config("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;

        let access_env = match std::env::var("SKYPORT_ACCESS_ENV") {
            Ok(value) => AccessEnv::parse(&value).ok_or_else(|| {
                AwsError::Config(format!("unknown SKYPORT_ACCESS_ENV '{}'", value))
            })?,
            Err(_) => AccessEnv::Global,
        };

        let mut config = Self::new(access_env, access_key_id, secret_access_key);
        config.session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        config.endpoint_url = std::env::var("AWS_ENDPOINT_URL")
            .ok()
            .filter(|u| !u.is_empty());
        config.debug = std::env::var("SKYPORT_DEBUG")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(config)
    }

    /// Resolve credentials through the standard AWS provider chain
    /// (environment, profile files, SSO, IMDS…)
    pub async fn from_default_chain(access_env: AccessEnv) -> Result<Self> {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| AwsError::Config("no credentials provider configured".to_string()))?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| AwsError::Config(format!("failed to load credentials: {}", e)))?;

        let mut config = Self::new(
            access_env,
            credentials.access_key_id(),
            credentials.secret_access_key(),
        );
        config.session_token = credentials.session_token().map(str::to_string);
        config.endpoint_url = sdk_config.endpoint_url().map(str::to_string);
        tracing::debug!("Loaded credentials from default chain for {}", access_env);
        Ok(config)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_forbidden_hook(mut self, hook: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.forbidden_hook = Some(Arc::new(hook));
        self
    }

    /// Region to use for a caller-supplied region id
    pub fn resolve_region<'a>(&self, region: &'a str) -> &'a str {
        if region.is_empty() {
            self.access_env.default_region()
        } else {
            region
        }
    }

    /// Whether `action` may be issued under the read-only policy
    pub fn permits(&self, action: &str) -> bool {
        !self.read_only
            || ["Get", "List", "Describe"]
                .iter()
                .any(|prefix| action.starts_with(prefix))
    }

    pub(crate) fn credentials(&self) -> Credentials {
        Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            self.session_token.clone(),
            None,
            "skyport",
        )
    }
}

impl fmt::Debug for AwsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsClientConfig")
            .field("access_env", &self.access_env)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .field("account_id", &self.account_id)
            .field("debug", &self.debug)
            .field("read_only", &self.read_only)
            .field("timeout", &self.timeout)
            .field("endpoint_url", &self.endpoint_url)
            .field("forbidden_hook", &self.forbidden_hook.is_some())
            .finish()
    }
}
