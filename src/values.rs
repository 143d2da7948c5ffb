//! Tagged flag values and the boolean cast policy.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Value type of a feature flag.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Boolean,
    String,
    Number,
}

/// Policy applied when reading a non-boolean flag value as a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BooleanCastStrategy {
    /// Non-empty strings and non-zero numbers convert to `true`.
    #[default]
    Lax,
    /// Any cross-type conversion is a [`Error::TypeMismatch`].
    Strict,
}

/// A single flag value as served by the remote.
///
/// `Null` is a genuine value (e.g. a valued overload that is disabled), distinct from "the
/// feature was not found".
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    Number(Decimal),
    Null,
}

impl FlagValue {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            FlagValue::Boolean(_) => "boolean",
            FlagValue::String(_) => "string",
            FlagValue::Number(_) => "number",
            FlagValue::Null => "null",
        }
    }

    /// Read this value as a boolean under the given cast strategy.
    ///
    /// `Null` reads as `false` regardless of strategy.
    pub fn as_boolean(&self, cast: BooleanCastStrategy) -> Result<bool> {
        match (self, cast) {
            (FlagValue::Boolean(value), _) => Ok(*value),
            (FlagValue::Null, _) => Ok(false),
            (FlagValue::String(value), BooleanCastStrategy::Lax) => Ok(!value.is_empty()),
            (FlagValue::Number(value), BooleanCastStrategy::Lax) => Ok(!value.is_zero()),
            (value, BooleanCastStrategy::Strict) => Err(Error::TypeMismatch {
                requested: "boolean",
                actual: value.kind_name(),
            }),
        }
    }

    /// Read this value as a string. Cross-type conversions are an error.
    pub fn as_string(&self) -> Result<Option<String>> {
        match self {
            FlagValue::String(value) => Ok(Some(value.clone())),
            FlagValue::Null => Ok(None),
            value => Err(Error::TypeMismatch {
                requested: "string",
                actual: value.kind_name(),
            }),
        }
    }

    /// Read this value as a number. Cross-type conversions are an error.
    pub fn as_number(&self) -> Result<Option<Decimal>> {
        match self {
            FlagValue::Number(value) => Ok(Some(*value)),
            FlagValue::Null => Ok(None),
            value => Err(Error::TypeMismatch {
                requested: "number",
                actual: value.kind_name(),
            }),
        }
    }
}
