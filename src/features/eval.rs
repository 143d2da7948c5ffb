//! Pure, side-effect-free evaluation of features against a (context, user) pair.
//!
//! Evaluation takes `now` as a parameter so that time-dependent rules are testable.
use chrono::{DateTime, Datelike, Utc, Weekday};

use crate::values::FlagValue;
use crate::{Error, Result};

use super::models::{ActivationCondition, ActivationRule, Feature, FeaturePeriod, Overload};

/// Outcome of resolving a feature locally.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalResolution {
    /// The feature resolved to a value. `Resolved(FlagValue::Null)` is a genuine null result
    /// (e.g. a disabled valued overload), not a miss.
    Resolved(FlagValue),
    /// The matching overload is a script overload and must be evaluated remotely.
    RequiresRemote,
}

impl Feature {
    /// Resolve this feature's value for the given context and user.
    ///
    /// Among the overload keys, the longest one that is a prefix of `context` wins. An absent
    /// context is treated as `""`. Returns [`Error::InvariantViolation`] if no key qualifies,
    /// which the server contract (mandatory `""` entry) should make impossible.
    pub fn resolve(
        &self,
        context: Option<&str>,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<LocalResolution> {
        let context = context.unwrap_or("");
        let overload = self
            .overloads
            .iter()
            .filter(|(key, _)| context.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, overload)| overload)
            .ok_or_else(|| Error::InvariantViolation(context.to_owned()))?;

        Ok(overload.resolve(user, &self.id, now))
    }
}

impl Overload {
    /// Resolve this overload for the given user.
    pub fn resolve(&self, user: &str, feature_id: &str, now: DateTime<Utc>) -> LocalResolution {
        match self {
            Overload::Classical {
                enabled,
                conditions,
            } => {
                let active = *enabled
                    && (conditions.is_empty()
                        || conditions.iter().any(|c| c.active(user, feature_id, now)));
                LocalResolution::Resolved(FlagValue::Boolean(active))
            }
            Overload::Valued {
                enabled,
                conditions,
                value,
            } => {
                if !enabled {
                    return LocalResolution::Resolved(FlagValue::Null);
                }
                let resolved = conditions
                    .iter()
                    .find(|c| c.active(user, feature_id, now))
                    .and_then(|c| c.value.as_ref())
                    .unwrap_or(value);
                LocalResolution::Resolved(resolved.clone())
            }
            Overload::Script { .. } => LocalResolution::RequiresRemote,
        }
    }
}

impl ActivationCondition {
    /// A condition is active iff its period and rule are both active; absent operands are
    /// vacuously true.
    pub fn active(&self, user: &str, feature_id: &str, now: DateTime<Utc>) -> bool {
        self.period.as_ref().map_or(true, |p| p.active(now))
            && self
                .rule
                .as_ref()
                .map_or(true, |r| r.active(user, feature_id))
    }
}

impl FeaturePeriod {
    /// Whether `now` falls inside this period, evaluated in the period's timezone.
    pub fn active(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        let time = local.time();
        let weekday = local.weekday();

        self.begin.map_or(true, |begin| begin < now)
            && self.end.map_or(true, |end| end > now)
            && (self.hour_periods.is_empty()
                || self
                    .hour_periods
                    .iter()
                    .any(|p| p.start_time < time && time < p.end_time))
            && self.activation_days.as_ref().map_or(true, |days| {
                days.days.iter().any(|d| Weekday::from(*d) == weekday)
            })
    }
}

impl ActivationRule {
    /// Pure predicate over (user, feature id).
    pub fn active(&self, user: &str, feature_id: &str) -> bool {
        match self {
            ActivationRule::UserList { users } => users.contains(user),
            ActivationRule::UserPercentage { percentage } => {
                user_bucket(user, feature_id) < u64::from(*percentage)
            }
        }
    }
}

/// Deterministic bucketing of a user into `0..100` for percentage rules.
fn user_bucket(user: &str, feature_id: &str) -> u64 {
    let hash = md5::compute(format!("{feature_id}-{user}"));
    let value = u32::from_be_bytes(hash[0..4].try_into().expect("md5 digest is 16 bytes"));
    u64::from(value) % 100
}
