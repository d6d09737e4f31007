//! AWS client core for Skyport
//!
//! The signed request/response pipeline every AWS call funnels through,
//! for the Query-protocol service families (EC2, IAM, STS, RDS,
//! ElastiCache, ELBv2, CloudWatch).
//!
//! # Features
//!
//! - Form-encoded request building and SigV4 signing (headers or presigned URL)
//! - Decoding of both response envelopes (EC2-style root, `<OpResult>` wrapper)
//! - Lazily created per-(family, region) clients shared across tasks
//! - Cursor pagination with per-family field names
//! - Error classification into [`skyport_cloud::CloudError`]
//! - Security group rule translation and sync
//!
//! # Example
//!
//! ```ignore
//! use skyport_cloud_aws::{AccessEnv, AwsClientConfig, Dispatcher, account};
//!
//! let config = AwsClientConfig::from_env()?;
//! let dispatcher = Dispatcher::new(config);
//!
//! let regions = account::describe_regions(&dispatcher, "us-east-1").await?;
//! let me = account::get_caller_identity(&dispatcher, "").await?;
//! ```
//!
//! # Security groups
//!
//! ```ignore
//! use skyport_cloud_aws::SecurityGroupRules;
//!
//! let rules = vec![
//!     "in:deny 10.1.0.0/16 tcp 22".parse()?,
//!     "in:allow 10.0.0.0/8 tcp 22".parse()?,
//! ];
//! SecurityGroupRules::new(&dispatcher, "us-east-1")
//!     .sync("sg-0123456789abcdef0", &rules)
//!     .await?;
//! ```

pub mod account;
pub mod classify;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod pagination;
pub mod params;
pub mod portrange;
pub mod request;
pub mod secgroup;
pub mod service;
pub mod shape;
pub mod signer;
pub mod transport;

pub use account::{CallerIdentity, RegionInfo, RegionsResult};
pub use classify::classify;
pub use config::{AccessEnv, AwsClientConfig, ForbiddenHook};
pub use decoder::RawResponse;
pub use dispatcher::{Dispatcher, ServiceClient};
pub use error::{AwsError, DecodeError, Result};
pub use pagination::{Cursor, Paged, Paginator};
pub use params::ParameterMap;
pub use request::{RequestBuilder, SignableRequest};
pub use secgroup::{CidrRange, SecurityGroupRules, SyncSummary, VendorPermission, from_vendor, to_vendor};
pub use service::{Dialect, Operation, ServiceFamily, ServiceTarget};
pub use shape::{ItemSet, MemberList};
pub use signer::{RequestSigner, SigV4Signer};
pub use transport::{HttpTransport, Transport};
