//! Per-feature outcomes of a synchronization call.
use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error_strategy::ErrorStrategy;
use crate::values::{BooleanCastStrategy, FlagValue};
use crate::{Error, Result};

/// Outcome for one requested feature.
///
/// Errors are resolved lazily: the error strategy only runs when the caller reads the value, so
/// a `Fail` strategy for one feature does not poison the other features of the same request.
#[derive(Debug, Clone)]
pub enum FlagResult {
    /// The feature resolved to a value, to be read under the given cast strategy.
    Success {
        value: FlagValue,
        cast: BooleanCastStrategy,
    },
    /// The feature could not be resolved; reads go through the strategy.
    Error {
        strategy: ErrorStrategy,
        error: Error,
    },
}

/// Result map of a synchronization call. Contains an entry for every requested feature id.
#[derive(Debug, Clone)]
pub struct FlagResults {
    pub(crate) results: HashMap<String, FlagResult>,
    pub(crate) default_strategy: ErrorStrategy,
}

impl FlagResults {
    pub(crate) fn new(
        results: HashMap<String, FlagResult>,
        default_strategy: ErrorStrategy,
    ) -> FlagResults {
        FlagResults {
            results,
            default_strategy,
        }
    }

    /// Raw outcome for a feature, if it was part of the request.
    pub fn result(&self, feature: &str) -> Option<&FlagResult> {
        self.results.get(feature)
    }

    /// Ids present in this result map.
    pub fn feature_ids(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(|s| s.as_str())
    }

    /// Read a feature's value as a boolean.
    pub async fn boolean(&self, feature: &str) -> Result<Option<bool>> {
        match self.results.get(feature) {
            Some(FlagResult::Success { value, cast }) => value.as_boolean(*cast).map(Some),
            Some(FlagResult::Error { strategy, error }) => strategy.handle_boolean(error).await,
            None => {
                self.default_strategy
                    .handle_boolean(&Error::NotRequested(feature.to_owned()))
                    .await
            }
        }
    }

    /// Read a feature's value as a string.
    pub async fn string(&self, feature: &str) -> Result<Option<String>> {
        match self.results.get(feature) {
            Some(FlagResult::Success { value, .. }) => value.as_string(),
            Some(FlagResult::Error { strategy, error }) => strategy.handle_string(error).await,
            None => {
                self.default_strategy
                    .handle_string(&Error::NotRequested(feature.to_owned()))
                    .await
            }
        }
    }

    /// Read a feature's value as a number.
    pub async fn number(&self, feature: &str) -> Result<Option<Decimal>> {
        match self.results.get(feature) {
            Some(FlagResult::Success { value, .. }) => value.as_number(),
            Some(FlagResult::Error { strategy, error }) => strategy.handle_number(error).await,
            None => {
                self.default_strategy
                    .handle_number(&Error::NotRequested(feature.to_owned()))
                    .await
            }
        }
    }
}
