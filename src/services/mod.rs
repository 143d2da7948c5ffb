//! Synchronization services answering feature queries from the cache and the remote server.
use async_trait::async_trait;

use crate::requests::FeatureRequest;
use crate::results::FlagResults;

mod fetch;
mod sse;

pub use fetch::FetchFeatureService;
pub use sse::SseFeatureService;

/// A strategy for answering feature queries. Implementations never fail as a whole: every
/// requested feature gets an entry in the returned [`FlagResults`], errors included.
#[async_trait]
pub trait FeatureService: Send + Sync {
    async fn feature_values(&self, request: FeatureRequest) -> FlagResults;

    /// Release background resources (refresh task, streaming connection).
    fn shutdown(&self) {}
}
