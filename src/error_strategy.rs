//! Strategies applied when a feature's value can't be fetched or computed locally.
//!
//! Failures are handled in two steps. First, if the strategy allows it, the synchronization
//! service tries to compute the value from the last cached version of the feature (even when the
//! cache was being bypassed for the call). Only when nothing cached is usable does the strategy
//! itself run.
//!
//! A strategy can be set at the client, query and query-feature levels; the priority is
//! feature > query > client.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{Error, Result};

/// Caller-supplied asynchronous fallback, one method per value type.
#[async_trait]
pub trait ErrorStrategyCallback: Send + Sync {
    async fn boolean_value(&self, error: &Error) -> Result<Option<bool>>;
    async fn string_value(&self, error: &Error) -> Result<Option<String>>;
    async fn number_value(&self, error: &Error) -> Result<Option<Decimal>>;
}

/// What to return when a feature's value cannot be resolved.
#[derive(Clone)]
pub struct ErrorStrategy {
    kind: ErrorStrategyKind,
    /// Whether the client may use the last fetched feature state to compute the value locally
    /// before running this strategy. Defaults to `true`.
    pub last_known_fallback_allowed: bool,
}

#[derive(Clone)]
enum ErrorStrategyKind {
    NullValue,
    Fail,
    DefaultValue {
        boolean: bool,
        string: String,
        number: Decimal,
    },
    Callback(Arc<dyn ErrorStrategyCallback>),
}

impl ErrorStrategy {
    /// Value errors as "no value" for every type.
    pub fn null_value() -> ErrorStrategy {
        ErrorStrategy::new(ErrorStrategyKind::NullValue)
    }

    /// Surface errors as [`Error::StrategyFailed`] carrying the failure message.
    pub fn fail() -> ErrorStrategy {
        ErrorStrategy::new(ErrorStrategyKind::Fail)
    }

    /// Return a fixed, per-type default value.
    pub fn default_value(
        boolean: bool,
        string: impl Into<String>,
        number: Decimal,
    ) -> ErrorStrategy {
        ErrorStrategy::new(ErrorStrategyKind::DefaultValue {
            boolean,
            string: string.into(),
            number,
        })
    }

    /// Invoke a caller-supplied asynchronous callback to compute the value.
    pub fn callback(callback: impl ErrorStrategyCallback + 'static) -> ErrorStrategy {
        ErrorStrategy::new(ErrorStrategyKind::Callback(Arc::new(callback)))
    }

    fn new(kind: ErrorStrategyKind) -> ErrorStrategy {
        ErrorStrategy {
            kind,
            last_known_fallback_allowed: true,
        }
    }

    /// Control whether the last fetched feature state may be used to compute the value before
    /// this strategy runs. Default is `true`.
    pub fn with_last_known_fallback(mut self, allowed: bool) -> ErrorStrategy {
        self.last_known_fallback_allowed = allowed;
        self
    }

    pub(crate) async fn handle_boolean(&self, error: &Error) -> Result<Option<bool>> {
        match &self.kind {
            ErrorStrategyKind::NullValue => Ok(None),
            ErrorStrategyKind::Fail => Err(Error::StrategyFailed(error.to_string())),
            ErrorStrategyKind::DefaultValue { boolean, .. } => Ok(Some(*boolean)),
            ErrorStrategyKind::Callback(callback) => callback.boolean_value(error).await,
        }
    }

    pub(crate) async fn handle_string(&self, error: &Error) -> Result<Option<String>> {
        match &self.kind {
            ErrorStrategyKind::NullValue => Ok(None),
            ErrorStrategyKind::Fail => Err(Error::StrategyFailed(error.to_string())),
            ErrorStrategyKind::DefaultValue { string, .. } => Ok(Some(string.clone())),
            ErrorStrategyKind::Callback(callback) => callback.string_value(error).await,
        }
    }

    pub(crate) async fn handle_number(&self, error: &Error) -> Result<Option<Decimal>> {
        match &self.kind {
            ErrorStrategyKind::NullValue => Ok(None),
            ErrorStrategyKind::Fail => Err(Error::StrategyFailed(error.to_string())),
            ErrorStrategyKind::DefaultValue { number, .. } => Ok(Some(*number)),
            ErrorStrategyKind::Callback(callback) => callback.number_value(error).await,
        }
    }
}

impl Default for ErrorStrategy {
    fn default() -> ErrorStrategy {
        ErrorStrategy::null_value()
    }
}

impl fmt::Debug for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ErrorStrategyKind::NullValue => "NullValue",
            ErrorStrategyKind::Fail => "Fail",
            ErrorStrategyKind::DefaultValue { .. } => "DefaultValue",
            ErrorStrategyKind::Callback(_) => "Callback",
        };
        f.debug_struct("ErrorStrategy")
            .field("kind", &kind)
            .field(
                "last_known_fallback_allowed",
                &self.last_known_fallback_allowed,
            )
            .finish()
    }
}
