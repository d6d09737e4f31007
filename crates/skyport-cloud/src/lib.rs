//! Skyport Cloud Core
//!
//! Vendor-neutral building blocks shared by the Skyport vendor clients:
//! the closed error taxonomy, the generic security rule model and
//! allow-flattening for vendors that cannot express deny rules.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           Resource code (instances, SGs…)        │
//! └─────────────────┬───────────────────────────────┘
//!                   │  CloudError / GenericSecurityRule
//! ┌─────────────────▼───────────────────────────────┐
//! │                 skyport-cloud                    │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │  CloudError  │  │  GenericSecurityRule      │ │
//! │  │  taxonomy    │  │  + flatten_to_allow       │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  retry_transient (caller-side backoff)    │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────────┐
//! │ skyport-cloud-aws │
//! │ (Query/EC2 APIs)  │
//! └───────────────────┘
//! ```

pub mod error;
pub mod flatten;
pub mod retry;
pub mod secrule;

// Re-exports
pub use error::{CloudError, ErrorKind, Result};
pub use flatten::flatten_to_allow;
pub use retry::{RetryConfig, retry_transient};
pub use secrule::{
    Direction, GenericSecurityRule, HIGHEST_PRECEDENCE, LOWEST_PRECEDENCE, PortSpec, Protocol,
    RuleAction, RuleParseError,
};
