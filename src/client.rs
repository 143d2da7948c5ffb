//! User-facing client facade.
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use crate::config::{CacheConfig, ClientConfig, ConnectionInfo};
use crate::error_strategy::ErrorStrategy;
use crate::http::{HttpTransport, Transport};
use crate::requests::FeatureRequest;
use crate::results::FlagResults;
use crate::services::{FeatureService, FetchFeatureService, SseFeatureService};
use crate::values::BooleanCastStrategy;
use crate::Result;

/// Entry point for feature queries.
///
/// Built through [`FlagClient::builder`]; owns a synchronization service chosen from the cache
/// configuration (polling, or push over server-sent events).
pub struct FlagClient {
    service: Arc<dyn FeatureService>,
    preloaded: Option<Shared<BoxFuture<'static, ()>>>,
}

impl FlagClient {
    pub fn builder(connection: ConnectionInfo) -> FlagClientBuilder {
        FlagClientBuilder {
            config: ClientConfig::new(connection),
            transport: None,
            preload: Vec::new(),
        }
    }

    /// Answer a multi-feature query.
    pub async fn feature_values(&self, request: FeatureRequest) -> FlagResults {
        self.service.feature_values(request).await
    }

    /// Query a single feature and read it as a boolean. The `request` carries user, context and
    /// strategy overrides; its feature list is ignored.
    pub async fn boolean_value(
        &self,
        feature: impl Into<String>,
        request: FeatureRequest,
    ) -> Result<Option<bool>> {
        let feature = feature.into();
        let results = self
            .feature_values(request.with_feature(feature.clone()))
            .await;
        results.boolean(&feature).await
    }

    /// Query a single feature and read it as a string.
    pub async fn string_value(
        &self,
        feature: impl Into<String>,
        request: FeatureRequest,
    ) -> Result<Option<String>> {
        let feature = feature.into();
        let results = self
            .feature_values(request.with_feature(feature.clone()))
            .await;
        results.string(&feature).await
    }

    /// Query a single feature and read it as a number.
    pub async fn number_value(
        &self,
        feature: impl Into<String>,
        request: FeatureRequest,
    ) -> Result<Option<Decimal>> {
        let feature = feature.into();
        let results = self
            .feature_values(request.with_feature(feature.clone()))
            .await;
        results.number(&feature).await
    }

    /// Wait until the features given to [`FlagClientBuilder::preload`] have been fetched once.
    /// Resolves immediately when nothing was preloaded.
    pub async fn wait_until_loaded(&self) {
        if let Some(preloaded) = &self.preloaded {
            preloaded.clone().await;
        }
    }

    /// Stop background synchronization. Queries keep working against the remote server.
    pub fn close(&self) {
        self.service.shutdown();
    }
}

/// Builder for [`FlagClient`].
pub struct FlagClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    preload: Vec<String>,
}

impl FlagClientBuilder {
    pub fn with_cache(mut self, cache: CacheConfig) -> FlagClientBuilder {
        self.config = self.config.with_cache(cache);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> FlagClientBuilder {
        self.config = self.config.with_call_timeout(timeout);
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> FlagClientBuilder {
        self.config = self.config.with_error_strategy(strategy);
        self
    }

    pub fn with_cast_strategy(mut self, strategy: BooleanCastStrategy) -> FlagClientBuilder {
        self.config = self.config.with_cast_strategy(strategy);
        self
    }

    /// Substitute the network transport. Mainly useful for tests.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> FlagClientBuilder {
        self.transport = Some(transport);
        self
    }

    /// Features to fetch eagerly right after the client is built.
    pub fn preload<I, S>(mut self, features: I) -> FlagClientBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload.extend(features.into_iter().map(Into::into));
        self
    }

    /// Build the client and start background synchronization.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> FlagClient {
        let config = Arc::new(self.config);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));

        let service: Arc<dyn FeatureService> = if config.cache.use_server_sent_events {
            Arc::new(SseFeatureService::new(config, transport))
        } else {
            Arc::new(FetchFeatureService::new(config, transport))
        };

        let preloaded = if self.preload.is_empty() {
            None
        } else {
            let (sender, receiver) = oneshot::channel();
            let service = Arc::clone(&service);
            let features = self.preload;
            tokio::spawn(async move {
                service
                    .feature_values(FeatureRequest::new().with_features(features))
                    .await;
                let _ = sender.send(());
            });
            Some(receiver.map(|_| ()).boxed().shared())
        };

        FlagClient { service, preloaded }
    }
}
