//! Data model for features, their context overloads and activation rules.
//!
//! A [`Feature`] carries a base value (the value the server computed at fetch time) plus a map
//! from *context prefix* to [`Overload`]. The server contract guarantees the map always contains
//! the empty-string key as the universal fallback context.
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::values::{FlagKind, FlagValue};

/// A feature flag as served by the remote.
///
/// Features are created when fetched or decoded from a push event and replaced wholesale on
/// refresh; they are never partially mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub project: String,
    /// Value type of this feature.
    pub kind: FlagKind,
    /// Value computed by the server for the requesting user/context at fetch time.
    pub base_value: FlagValue,
    /// Context prefix -> overload. Always contains the `""` key.
    pub overloads: HashMap<String, Overload>,
}

/// A context-specific override of a feature's activation/value logic.
#[derive(Debug, Clone, PartialEq)]
pub enum Overload {
    /// Boolean feature: active iff any condition is active.
    Classical {
        enabled: bool,
        conditions: Vec<ActivationCondition>,
    },
    /// String/number feature: first active condition's value wins, else the fallback value.
    ///
    /// Condition order encodes author-defined priority and must be preserved.
    Valued {
        enabled: bool,
        conditions: Vec<ActivationCondition>,
        value: FlagValue,
    },
    /// The value requires remote script execution; never resolvable locally.
    Script { enabled: bool, script: String },
}

/// A period+rule pair (plus optional value) gating an overload.
///
/// An absent period or rule is vacuously active.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivationCondition {
    pub period: Option<FeaturePeriod>,
    pub rule: Option<ActivationRule>,
    /// Attached value for valued overloads; `None` for boolean conditions.
    pub value: Option<FlagValue>,
}

/// Time window restricting a condition, evaluated in its own timezone.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeaturePeriod {
    #[serde(default)]
    pub begin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Any-match semantics; empty means no hour restriction.
    #[serde(default)]
    pub hour_periods: Vec<HourPeriod>,
    #[serde(default)]
    pub activation_days: Option<ActivationDays>,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl Default for FeaturePeriod {
    fn default() -> Self {
        FeaturePeriod {
            begin: None,
            end: None,
            hour_periods: Vec::new(),
            activation_days: None,
            timezone: default_timezone(),
        }
    }
}

/// A daily time-of-day window.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourPeriod {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Days of the week a condition is active on.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActivationDays {
    pub days: HashSet<DayOfWeek>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<DayOfWeek> for Weekday {
    fn from(value: DayOfWeek) -> Weekday {
        match value {
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
            DayOfWeek::Sunday => Weekday::Sun,
        }
    }
}

/// Pure predicate over (user, feature id) gating a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivationRule {
    /// Membership test.
    UserList { users: HashSet<String> },
    /// Deterministic user-bucketing test against a percentage threshold.
    UserPercentage { percentage: u8 },
}
