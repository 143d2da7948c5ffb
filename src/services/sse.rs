//! Push-based synchronization service.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::cache::FeatureCache;
use crate::config::ClientConfig;
use crate::features::LocalResolution;
use crate::http::Transport;
use crate::requests::FeatureRequest;
use crate::results::{FlagResult, FlagResults};
use crate::services::{FeatureService, FetchFeatureService};
use crate::sse::{FeatureEvent, SseClient};
use crate::{Error, Result};

/// Keeps the cache in sync over a streaming connection.
///
/// The subscription scope is the union of every feature ever requested. A query for features
/// outside the current scope widens the scope and reconnects; the query then waits for the new
/// connection's initial snapshot before answering. Script-backed features cannot be evaluated
/// locally and are delegated to the batch endpoint on every query.
pub struct SseFeatureService {
    config: Arc<ClientConfig>,
    cache: Arc<FeatureCache>,
    sse_client: SseClient,
    underlying: FetchFeatureService,
    scope: Mutex<FeatureRequest>,
}

impl SseFeatureService {
    pub fn new(config: Arc<ClientConfig>, transport: Arc<dyn Transport>) -> SseFeatureService {
        let cache = Arc::new(FeatureCache::new());
        let sse_client = SseClient::new(
            (*config).clone(),
            Arc::clone(&transport),
            Arc::new({
                let cache = Arc::clone(&cache);
                move |event: &FeatureEvent| apply_event(&cache, event)
            }),
        );
        let underlying =
            FetchFeatureService::with_cache(Arc::clone(&config), transport, Arc::clone(&cache));
        SseFeatureService {
            config,
            cache,
            sse_client,
            underlying,
            scope: Mutex::new(FeatureRequest::new()),
        }
    }

    fn resolve_cached(
        &self,
        id: &str,
        request: &FeatureRequest,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<LocalResolution>> {
        match self.cache.get(id) {
            Some(feature) => feature
                .resolve(request.context(), request.user(), now)
                .map(Some),
            None => Ok(None),
        }
    }

    fn in_scope(&self, id: &str) -> bool {
        self.scope
            .lock()
            .expect("thread holding scope lock should not panic")
            .features
            .contains_key(id)
    }
}

fn apply_event(cache: &FeatureCache, event: &FeatureEvent) {
    match event {
        FeatureEvent::FeatureStates(snapshot) => {
            cache.replace_all(snapshot.values().cloned());
        }
        FeatureEvent::FeatureCreated(feature) | FeatureEvent::FeatureUpdated(feature) => {
            cache.put(feature.clone());
        }
        FeatureEvent::FeatureDeleted(id) => {
            cache.remove(id);
        }
    }
}

#[async_trait]
impl FeatureService for SseFeatureService {
    async fn feature_values(&self, request: FeatureRequest) -> FlagResults {
        let default_strategy = request
            .error_strategy
            .clone()
            .unwrap_or_else(|| self.config.error_strategy.clone());
        let now = Utc::now();

        let mut results: HashMap<String, FlagResult> = HashMap::new();
        let mut unscoped: Vec<String> = Vec::new();
        let mut scripted: Vec<String> = Vec::new();
        for id in request.feature_ids() {
            match self.resolve_cached(id, &request, now) {
                Ok(Some(LocalResolution::Resolved(value))) => {
                    results.insert(
                        id.to_owned(),
                        FlagResult::Success {
                            value,
                            cast: request.cast_strategy_for(id, self.config.cast_strategy),
                        },
                    );
                }
                Ok(Some(LocalResolution::RequiresRemote)) => scripted.push(id.to_owned()),
                Ok(None) if !self.in_scope(id) => unscoped.push(id.to_owned()),
                // In scope but absent from the snapshot: the feature does not exist server-side.
                Ok(None) => {}
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

        let timeout = request.call_timeout().unwrap_or(self.config.call_timeout);
        let snapshot_future = async {
            if unscoped.is_empty() {
                return None;
            }
            let receiver = {
                let mut scope = self
                    .scope
                    .lock()
                    .expect("thread holding scope lock should not panic");
                scope.widen_with(&request);
                self.sse_client.reconnect_with(scope.clone())
            };
            match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(snapshot)) => Some(snapshot),
                Ok(Err(_)) => {
                    log::warn!(target: "flagstream", "streaming subscription was superseded before its snapshot arrived");
                    None
                }
                Err(_) => {
                    log::warn!(target: "flagstream", "no snapshot within {timeout:?} after rescoping the streaming connection");
                    None
                }
            }
        };
        let script_future = async {
            if scripted.is_empty() {
                return None;
            }
            Some(
                self.underlying
                    .feature_values(request.restricted_to(&scripted))
                    .await,
            )
        };
        let (snapshot, script_results) = tokio::join!(snapshot_future, script_future);

        if let Some(snapshot) = snapshot {
            for id in &unscoped {
                if let Some(feature) = snapshot.get(id) {
                    results.insert(
                        id.clone(),
                        FlagResult::Success {
                            value: feature.base_value.clone(),
                            cast: request.cast_strategy_for(id, self.config.cast_strategy),
                        },
                    );
                }
            }
        }
        if let Some(script_results) = script_results {
            results.extend(script_results.results);
        }

        // Anything still unanswered does not exist in the subscribed state.
        for id in request.feature_ids() {
            if !results.contains_key(id) {
                results.insert(
                    id.to_owned(),
                    FlagResult::Error {
                        strategy: request.error_strategy_for(id, &self.config.error_strategy),
                        error: Error::FeatureNotFound(id.to_owned()),
                    },
                );
            }
        }

        FlagResults::new(results, default_strategy)
    }

    fn shutdown(&self) {
        self.sse_client.close();
        self.underlying.shutdown();
    }
}
