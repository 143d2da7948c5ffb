//! Poll-based synchronization service.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::cache::FeatureCache;
use crate::config::ClientConfig;
use crate::features::LocalResolution;
use crate::http::{fetch_features, Transport};
use crate::requests::FeatureRequest;
use crate::results::{FlagResult, FlagResults};
use crate::services::FeatureService;
use crate::{Error, Result};

/// Answers queries from the cache when allowed, fetches the rest from the batch endpoint, and
/// keeps cached entries fresh with a periodic background refresh.
pub struct FetchFeatureService {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    cache: Arc<FeatureCache>,
    refresh_task: Option<tokio::task::JoinHandle<()>>,
}

impl FetchFeatureService {
    pub fn new(config: Arc<ClientConfig>, transport: Arc<dyn Transport>) -> FetchFeatureService {
        FetchFeatureService::with_cache(config, transport, Arc::new(FeatureCache::new()))
    }

    /// Build the service around an externally owned cache. The refresh task is only started in
    /// poll mode; in push mode the streaming connection keeps the cache fresh.
    pub(crate) fn with_cache(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        cache: Arc<FeatureCache>,
    ) -> FetchFeatureService {
        let refresh_task = if config.cache.enabled && !config.cache.use_server_sent_events {
            Some(tokio::spawn(Self::refresh_loop(
                Arc::clone(&config),
                Arc::clone(&transport),
                Arc::clone(&cache),
            )))
        } else {
            None
        };
        FetchFeatureService {
            config,
            transport,
            cache,
            refresh_task,
        }
    }

    /// Periodically re-fetches everything the cache has seen. On failure the previous entries
    /// stay in place so callers keep getting the last known state.
    async fn refresh_loop(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        cache: Arc<FeatureCache>,
    ) {
        loop {
            tokio::time::sleep(config.cache.refresh_interval).await;
            let ids = cache.ids();
            if ids.is_empty() {
                continue;
            }
            let request = FeatureRequest::new().with_features(ids);
            match fetch_features(transport.as_ref(), &config, &request).await {
                Ok(features) => {
                    log::debug!(target: "flagstream", "refreshed {} cached features", features.len());
                    cache.replace_all(features.into_values());
                }
                Err(err) => {
                    log::error!(target: "flagstream", "background refresh failed, keeping cached state: {err}");
                }
            }
        }
    }

    /// Resolve one feature against the cache. `Ok(None)` means the cache cannot answer and a
    /// remote call is needed.
    fn resolve_cached(
        &self,
        id: &str,
        request: &FeatureRequest,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<FlagResult>> {
        let bypass = request
            .cache_ignored_for(id)
            .unwrap_or(!self.config.cache.enabled);
        if bypass {
            return Ok(None);
        }
        let Some(feature) = self.cache.get(id) else {
            return Ok(None);
        };
        match feature.resolve(request.context(), request.user(), now)? {
            LocalResolution::Resolved(value) => Ok(Some(FlagResult::Success {
                value,
                cast: request.cast_strategy_for(id, self.config.cast_strategy),
            })),
            LocalResolution::RequiresRemote => Ok(None),
        }
    }

    /// Error outcome for one feature, falling back to the last known cached value when the
    /// resolved strategy allows it.
    fn fallback(
        &self,
        id: &str,
        request: &FeatureRequest,
        error: Error,
        now: chrono::DateTime<Utc>,
    ) -> FlagResult {
        let strategy = request.error_strategy_for(id, &self.config.error_strategy);
        if strategy.last_known_fallback_allowed {
            if let Some(feature) = self.cache.get(id) {
                if let Ok(LocalResolution::Resolved(value)) =
                    feature.resolve(request.context(), request.user(), now)
                {
                    log::debug!(target: "flagstream", "serving last known value of `{id}` after: {error}");
                    return FlagResult::Success {
                        value,
                        cast: request.cast_strategy_for(id, self.config.cast_strategy),
                    };
                }
            }
        }
        FlagResult::Error { strategy, error }
    }
}

#[async_trait]
impl FeatureService for FetchFeatureService {
    async fn feature_values(&self, request: FeatureRequest) -> FlagResults {
        let default_strategy = request
            .error_strategy
            .clone()
            .unwrap_or_else(|| self.config.error_strategy.clone());
        let now = Utc::now();

        let mut results: HashMap<String, FlagResult> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for id in request.feature_ids() {
            match self.resolve_cached(id, &request, now) {
                Ok(Some(result)) => {
                    results.insert(id.to_owned(), result);
                }
                Ok(None) => missing.push(id.to_owned()),
                Err(err) => {
                    results.insert(
                        id.to_owned(),
                        FlagResult::Error {
                            strategy: request.error_strategy_for(id, &self.config.error_strategy),
                            error: err,
                        },
                    );
                }
            }
        }

        if !missing.is_empty() {
            let remote = request.restricted_to(&missing);
            match fetch_features(self.transport.as_ref(), &self.config, &remote).await {
                Ok(features) => {
                    for id in &missing {
                        match features.get(id) {
                            Some(feature) => {
                                self.cache.put(feature.clone());
                                results.insert(
                                    id.clone(),
                                    FlagResult::Success {
                                        value: feature.base_value.clone(),
                                        cast: request
                                            .cast_strategy_for(id, self.config.cast_strategy),
                                    },
                                );
                            }
                            None => {
                                let result = self.fallback(
                                    id,
                                    &request,
                                    Error::FeatureNotFound(id.clone()),
                                    now,
                                );
                                results.insert(id.clone(), result);
                            }
                        }
                    }
                }
                Err(err) => {
                    for id in &missing {
                        let result = self.fallback(id, &request, err.clone(), now);
                        results.insert(id.clone(), result);
                    }
                }
            }
        }

        FlagResults::new(results, default_strategy)
    }

    fn shutdown(&self) {
        if let Some(task) = &self.refresh_task {
            task.abort();
        }
    }
}

impl Drop for FetchFeatureService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
