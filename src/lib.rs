//! `flagstream` is a client for remote feature flag servers: it fetches feature definitions,
//! evaluates their activation rules locally, and keeps a cache in sync either by polling or
//! over a server-sent-event stream.
//!
//! The building blocks:
//! - [`FlagClient`] is the entry point, built from a [`ConnectionInfo`] and a [`CacheConfig`].
//! - [`FeatureRequest`] describes a query: feature ids, user, context, and per-query or
//!   per-feature overrides for caching and error handling.
//! - [`FlagResults`] holds one outcome per requested feature; reads go through the resolved
//!   [`ErrorStrategy`] so a failure for one feature never poisons the others.
//! - [`services::FeatureService`] is the synchronization seam, with a polling implementation
//!   ([`services::FetchFeatureService`]) and a streaming one ([`services::SseFeatureService`]).
//!
//! ```no_run
//! # async fn example() -> flagstream::Result<()> {
//! use flagstream::{ConnectionInfo, CacheConfig, FeatureRequest, FlagClient};
//!
//! let client = FlagClient::builder(ConnectionInfo::new(
//!     "https://flags.example.com/api",
//!     "my-client-id",
//!     "my-client-secret",
//! ))
//! .with_cache(CacheConfig::new().enabled(true))
//! .build();
//!
//! let enabled = client
//!     .boolean_value("my-feature", FeatureRequest::new().with_user("alice"))
//!     .await?;
//! if enabled.unwrap_or(false) {
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```
pub mod cache;
mod client;
pub mod codec;
mod config;
mod error;
mod error_strategy;
pub mod features;
pub mod http;
mod requests;
mod results;
pub mod services;
pub mod sse;
mod values;

pub use client::{FlagClient, FlagClientBuilder};
pub use config::{CacheConfig, ClientConfig, ConnectionInfo};
pub use error::{Error, Result};
pub use error_strategy::{ErrorStrategy, ErrorStrategyCallback};
pub use requests::{FeatureRequest, SpecificFeatureRequest};
pub use results::{FlagResult, FlagResults};
pub use values::{BooleanCastStrategy, FlagKind, FlagValue};
