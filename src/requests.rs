//! Query builders for feature requests.
use std::collections::HashMap;
use std::time::Duration;

use crate::error_strategy::ErrorStrategy;
use crate::values::BooleanCastStrategy;

/// A query for one or more features, with optional per-query overrides.
#[derive(Debug, Clone, Default)]
pub struct FeatureRequest {
    pub(crate) features: HashMap<String, SpecificFeatureRequest>,
    pub(crate) error_strategy: Option<ErrorStrategy>,
    pub(crate) cast_strategy: Option<BooleanCastStrategy>,
    pub(crate) ignore_cache: Option<bool>,
    pub(crate) context: Option<String>,
    pub(crate) user: String,
    pub(crate) call_timeout: Option<Duration>,
    pub(crate) payload: Option<String>,
}

impl FeatureRequest {
    pub fn new() -> FeatureRequest {
        FeatureRequest::default()
    }

    /// Add a feature id to this request. A feature already present keeps its per-feature
    /// overrides; use [`FeatureRequest::with_specific_feature`] to replace them.
    pub fn with_feature(self, feature: impl Into<String>) -> FeatureRequest {
        let feature = feature.into();
        if self.features.contains_key(&feature) {
            return self;
        }
        self.with_specific_feature(SpecificFeatureRequest::feature(feature))
    }

    /// Add several feature ids to this request.
    pub fn with_features<I, S>(mut self, features: I) -> FeatureRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for feature in features {
            self = self.with_feature(feature);
        }
        self
    }

    /// Add a feature with its own cache/error/cast overrides.
    pub fn with_specific_feature(mut self, feature: SpecificFeatureRequest) -> FeatureRequest {
        self.features.insert(feature.feature.clone(), feature);
        self
    }

    /// User to evaluate rules against.
    pub fn with_user(mut self, user: impl Into<String>) -> FeatureRequest {
        self.user = user.into();
        self
    }

    /// Hierarchical context used for prefix-based overload selection.
    pub fn with_context(mut self, context: impl Into<String>) -> FeatureRequest {
        self.context = Some(context.into());
        self
    }

    /// Error strategy for this request, overriding the client default.
    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> FeatureRequest {
        self.error_strategy = Some(strategy);
        self
    }

    /// Boolean cast strategy for this request, overriding the client default.
    pub fn with_cast_strategy(mut self, strategy: BooleanCastStrategy) -> FeatureRequest {
        self.cast_strategy = Some(strategy);
        self
    }

    /// Whether this request should bypass the cache.
    pub fn ignore_cache(mut self, ignore: bool) -> FeatureRequest {
        self.ignore_cache = Some(ignore);
        self
    }

    /// Remote call timeout for this request, overriding the client default.
    pub fn with_call_timeout(mut self, timeout: Duration) -> FeatureRequest {
        self.call_timeout = Some(timeout);
        self
    }

    /// Opaque payload forwarded to the server; a non-empty payload switches remote calls to POST.
    pub fn with_payload(mut self, payload: impl Into<String>) -> FeatureRequest {
        self.payload = Some(payload.into());
        self
    }

    /// Feature ids of this request.
    pub fn feature_ids(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(|s| s.as_str())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout.as_ref().copied()
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Error strategy for one feature: per-feature override, then per-query, then `default`.
    pub(crate) fn error_strategy_for(&self, feature: &str, default: &ErrorStrategy) -> ErrorStrategy {
        self.features
            .get(feature)
            .and_then(|f| f.error_strategy.clone())
            .or_else(|| self.error_strategy.clone())
            .unwrap_or_else(|| default.clone())
    }

    /// Cast strategy for one feature: per-feature override, then per-query, then `default`.
    pub(crate) fn cast_strategy_for(
        &self,
        feature: &str,
        default: BooleanCastStrategy,
    ) -> BooleanCastStrategy {
        self.features
            .get(feature)
            .and_then(|f| f.cast_strategy)
            .or(self.cast_strategy)
            .unwrap_or(default)
    }

    /// Cache-bypass decision for one feature: per-feature override, then per-query. `None` means
    /// neither level expressed a preference and the client cache configuration decides.
    pub(crate) fn cache_ignored_for(&self, feature: &str) -> Option<bool> {
        self.features
            .get(feature)
            .and_then(|f| f.ignore_cache)
            .or(self.ignore_cache)
    }

    /// Copy of this request restricted to the given feature ids, keeping their per-feature
    /// overrides.
    pub(crate) fn restricted_to(&self, ids: &[String]) -> FeatureRequest {
        let mut request = self.clone();
        request.features.retain(|id, _| ids.contains(id));
        request
    }

    /// Widen this request (used as a streaming subscription scope) with another request's
    /// features, context, user and payload.
    pub(crate) fn widen_with(&mut self, other: &FeatureRequest) {
        for (id, spec) in &other.features {
            self.features.insert(id.clone(), spec.clone());
        }
        self.context = other.context.clone();
        self.user = other.user.clone();
        self.payload = other.payload.clone();
    }
}

/// Per-feature overrides within a [`FeatureRequest`].
#[derive(Debug, Clone)]
pub struct SpecificFeatureRequest {
    pub(crate) feature: String,
    pub(crate) ignore_cache: Option<bool>,
    pub(crate) error_strategy: Option<ErrorStrategy>,
    pub(crate) cast_strategy: Option<BooleanCastStrategy>,
}

impl SpecificFeatureRequest {
    pub fn feature(feature: impl Into<String>) -> SpecificFeatureRequest {
        SpecificFeatureRequest {
            feature: feature.into(),
            ignore_cache: None,
            error_strategy: None,
            cast_strategy: None,
        }
    }

    /// Whether the cache should be bypassed for this feature, overriding the query setting.
    pub fn ignore_cache(mut self, ignore: bool) -> SpecificFeatureRequest {
        self.ignore_cache = Some(ignore);
        self
    }

    /// Error strategy for this feature, overriding query and client settings.
    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> SpecificFeatureRequest {
        self.error_strategy = Some(strategy);
        self
    }

    /// Cast strategy for this feature, overriding query and client settings.
    pub fn with_cast_strategy(mut self, strategy: BooleanCastStrategy) -> SpecificFeatureRequest {
        self.cast_strategy = Some(strategy);
        self
    }
}
