//! Wire codec for feature payloads.
//!
//! A feature's value type is carried by its typed `active` field. When `active` is null, the
//! type is inferred from the `value` fields of its overloads: an overload with a string/number
//! value implies that type, an overload without a value and without a script reference implies
//! boolean, and script overloads are ignored. Mixed types across overloads are a decode error.
use std::collections::HashMap;
use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use crate::features::{ActivationCondition, ActivationRule, Feature, FeaturePeriod, Overload};
use crate::values::{FlagKind, FlagValue};
use crate::{Error, Result};

/// Decode a `{id: feature}` response body.
///
/// Null entries are skipped; an overload that doesn't match any known shape is skipped with a
/// log, so one malformed overload doesn't take the rest of the response down.
pub fn decode_feature_map(body: &str) -> Result<HashMap<String, Feature>> {
    let root: Value = serde_json::from_str(body)
        .map_err(|err| Error::Decode(format!("invalid JSON in server response: {err}")))?;
    let entries = root
        .as_object()
        .ok_or_else(|| Error::Decode("expected a feature map object".to_owned()))?;

    let mut features = HashMap::with_capacity(entries.len());
    for (id, value) in entries {
        if value.is_null() {
            continue;
        }
        let feature = decode_feature(id, value)?;
        features.insert(feature.id.clone(), feature);
    }
    Ok(features)
}

/// Decode a single feature payload.
pub fn decode_feature(id: &str, value: &Value) -> Result<Feature> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::Decode(format!("feature `{id}` is not an object")))?;

    let name = object
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Decode(format!("feature `{id}` is missing its name")))?
        .to_owned();
    let project = object
        .get("project")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let active = object.get("active").unwrap_or(&Value::Null);
    let overload_map = object
        .get("conditions")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let kind = match active {
        Value::Bool(_) => FlagKind::Boolean,
        Value::String(_) => FlagKind::String,
        Value::Number(_) => FlagKind::Number,
        Value::Null => infer_kind(id, &overload_map)?,
        other => {
            return Err(Error::Decode(format!(
                "feature `{id}` has an unsupported `active` type: {other}"
            )))
        }
    };

    let base_value = match (kind, active) {
        // A boolean feature with a null remote value reads as inactive.
        (FlagKind::Boolean, Value::Null) => FlagValue::Boolean(false),
        (FlagKind::Boolean, Value::Bool(b)) => FlagValue::Boolean(*b),
        (FlagKind::String, Value::String(s)) => FlagValue::String(s.clone()),
        (FlagKind::Number, Value::Number(n)) => FlagValue::Number(decode_decimal(n)?),
        (_, Value::Null) => FlagValue::Null,
        (_, other) => {
            return Err(Error::Decode(format!(
                "feature `{id}` has an `active` value inconsistent with its type: {other}"
            )))
        }
    };

    let mut overloads = HashMap::with_capacity(overload_map.len());
    for (context, overload_value) in &overload_map {
        match decode_overload(kind, overload_value)? {
            Some(overload) => {
                overloads.insert(context.clone(), overload);
            }
            None => {
                log::warn!(target: "flagstream", "skipping malformed overload for feature `{id}` in context `{context}`");
            }
        }
    }

    Ok(Feature {
        id: id.to_owned(),
        name,
        project,
        kind,
        base_value,
        overloads,
    })
}

fn infer_kind(id: &str, overloads: &Map<String, Value>) -> Result<FlagKind> {
    let mut kinds = HashSet::new();
    for overload in overloads.values() {
        match overload.get("value") {
            Some(Value::String(_)) => {
                kinds.insert(FlagKind::String);
            }
            Some(Value::Number(_)) => {
                kinds.insert(FlagKind::Number);
            }
            Some(Value::Null) | None => {
                let is_script = overload.get("wasmConfig").is_some_and(|w| !w.is_null());
                if !is_script {
                    kinds.insert(FlagKind::Boolean);
                }
            }
            Some(other) => {
                return Err(Error::Decode(format!(
                    "feature `{id}` has an overload value of unsupported type: {other}"
                )))
            }
        }
    }

    if kinds.len() > 1 {
        return Err(Error::Decode(format!(
            "feature `{id}` mixes value types across its overloads"
        )));
    }
    kinds
        .into_iter()
        .next()
        .ok_or_else(|| Error::Decode(format!("cannot infer value type of feature `{id}`")))
}

fn decode_overload(kind: FlagKind, value: &Value) -> Result<Option<Overload>> {
    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    let Some(enabled) = object.get("enabled").and_then(Value::as_bool) else {
        return Ok(None);
    };

    let has_conditions = object.get("conditions").is_some_and(|c| !c.is_null());
    let script = object
        .get("wasmConfig")
        .filter(|w| !w.is_null())
        .and_then(|w| w.get("name"))
        .and_then(Value::as_str);

    let expected_value = match kind {
        FlagKind::Boolean => None,
        FlagKind::String | FlagKind::Number => Some(kind),
    };

    // Valued overloads additionally need a typed fallback value.
    let fallback = match expected_value {
        None => None,
        Some(kind) => match decode_typed_value(kind, object.get("value")) {
            Some(value) => Some(value),
            None => {
                return Ok(script.map(|script| Overload::Script {
                    enabled,
                    script: script.to_owned(),
                }))
            }
        },
    };

    if has_conditions {
        let items = object
            .get("conditions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut conditions = Vec::with_capacity(items.len());
        for item in &items {
            if let Some(condition) = decode_condition(item, expected_value) {
                conditions.push(condition);
            }
        }
        return Ok(Some(match fallback {
            None => Overload::Classical {
                enabled,
                conditions,
            },
            Some(value) => Overload::Valued {
                enabled,
                conditions,
                value,
            },
        }));
    }

    Ok(script.map(|script| Overload::Script {
        enabled,
        script: script.to_owned(),
    }))
}

fn decode_condition(value: &Value, expected: Option<FlagKind>) -> Option<ActivationCondition> {
    let object = value.as_object()?;

    // Conditions of valued overloads must carry a value of the feature's type; others are
    // dropped, matching the server contract.
    let condition_value = match expected {
        None => None,
        Some(kind) => Some(decode_typed_value(kind, object.get("value"))?),
    };

    let period = object
        .get("period")
        .filter(|p| !p.is_null())
        .and_then(|p| serde_json::from_value::<FeaturePeriod>(p.clone()).ok());
    let rule = object
        .get("rule")
        .filter(|r| !r.is_null())
        .and_then(decode_rule);

    Some(ActivationCondition {
        period,
        rule,
        value: condition_value,
    })
}

fn decode_rule(value: &Value) -> Option<ActivationRule> {
    let object = value.as_object()?;
    if let Some(users) = object.get("users").and_then(Value::as_array) {
        let users = users
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
        return Some(ActivationRule::UserList { users });
    }
    if let Some(percentage) = object.get("percentage").and_then(Value::as_u64) {
        return Some(ActivationRule::UserPercentage {
            percentage: percentage.min(100) as u8,
        });
    }
    None
}

fn decode_typed_value(kind: FlagKind, value: Option<&Value>) -> Option<FlagValue> {
    match (kind, value?) {
        (FlagKind::String, Value::String(s)) => Some(FlagValue::String(s.clone())),
        (FlagKind::Number, Value::Number(n)) => decode_decimal(n).ok().map(FlagValue::Number),
        _ => None,
    }
}

fn decode_decimal(number: &serde_json::Number) -> Result<Decimal> {
    Decimal::from_str(&number.to_string())
        .map_err(|err| Error::Decode(format!("unrepresentable number `{number}`: {err}")))
}

/// Encode a feature back into its wire shape.
pub fn encode_feature(feature: &Feature) -> Value {
    let overloads: Map<String, Value> = feature
        .overloads
        .iter()
        .map(|(context, overload)| (context.clone(), encode_overload(overload)))
        .collect();
    json!({
        "name": feature.name,
        "project": feature.project,
        "active": encode_value(&feature.base_value),
        "conditions": overloads,
    })
}

/// Encode a full feature map.
pub fn encode_feature_map(features: &HashMap<String, Feature>) -> Value {
    Value::Object(
        features
            .iter()
            .map(|(id, feature)| (id.clone(), encode_feature(feature)))
            .collect(),
    )
}

fn encode_overload(overload: &Overload) -> Value {
    match overload {
        Overload::Classical {
            enabled,
            conditions,
        } => json!({
            "enabled": enabled,
            "conditions": conditions.iter().map(encode_condition).collect::<Vec<_>>(),
        }),
        Overload::Valued {
            enabled,
            conditions,
            value,
        } => json!({
            "enabled": enabled,
            "conditions": conditions.iter().map(encode_condition).collect::<Vec<_>>(),
            "value": encode_value(value),
        }),
        Overload::Script { enabled, script } => json!({
            "enabled": enabled,
            "wasmConfig": { "name": script },
        }),
    }
}

fn encode_condition(condition: &ActivationCondition) -> Value {
    let mut object = Map::new();
    if let Some(period) = &condition.period {
        let period = serde_json::to_value(period)
            .expect("a feature period always serializes to JSON");
        object.insert("period".to_owned(), period);
    }
    if let Some(rule) = &condition.rule {
        object.insert("rule".to_owned(), encode_rule(rule));
    }
    if let Some(value) = &condition.value {
        object.insert("value".to_owned(), encode_value(value));
    }
    Value::Object(object)
}

fn encode_rule(rule: &ActivationRule) -> Value {
    match rule {
        ActivationRule::UserList { users } => {
            let mut users: Vec<&str> = users.iter().map(String::as_str).collect();
            users.sort_unstable();
            json!({ "users": users })
        }
        ActivationRule::UserPercentage { percentage } => json!({ "percentage": percentage }),
    }
}

fn encode_value(value: &FlagValue) -> Value {
    match value {
        FlagValue::Boolean(b) => Value::Bool(*b),
        FlagValue::String(s) => Value::String(s.clone()),
        FlagValue::Number(n) => {
            let number = serde_json::from_str::<serde_json::Number>(&n.to_string())
                .expect("decimal text is a valid JSON number");
            Value::Number(number)
        }
        FlagValue::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::str::FromStr;

    use chrono::NaiveTime;
    use chrono_tz::Tz;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::features::{ActivationDays, DayOfWeek, HourPeriod};

    #[test]
    fn decodes_a_boolean_feature_with_conditions() {
        let body = json!({
            "my-feature": {
                "name": "my-feature",
                "project": "website",
                "active": true,
                "conditions": {
                    "": {
                        "enabled": true,
                        "conditions": [
                            { "rule": { "users": ["alice", "bob"] } },
                            { "period": { "timezone": "Europe/Paris" }, "rule": { "percentage": 25 } }
                        ]
                    }
                }
            }
        })
        .to_string();

        let features = decode_feature_map(&body).unwrap();
        let feature = &features["my-feature"];
        assert_eq!(feature.kind, FlagKind::Boolean);
        assert_eq!(feature.base_value, FlagValue::Boolean(true));
        assert_eq!(feature.project, "website");

        let Overload::Classical { enabled, conditions } = &feature.overloads[""] else {
            panic!("expected a classical overload");
        };
        assert!(enabled);
        assert_eq!(conditions.len(), 2);
        assert_eq!(
            conditions[0].rule,
            Some(ActivationRule::UserList {
                users: ["alice".to_owned(), "bob".to_owned()].into_iter().collect(),
            })
        );
        assert_eq!(
            conditions[1].period.as_ref().unwrap().timezone,
            Tz::Europe__Paris
        );
    }

    #[test]
    fn decodes_a_string_feature_and_keeps_condition_order() {
        let body = json!({
            "variant": {
                "name": "variant",
                "project": "website",
                "active": "a",
                "conditions": {
                    "": {
                        "enabled": true,
                        "value": "fallback",
                        "conditions": [
                            { "value": "first" },
                            { "value": "second" }
                        ]
                    }
                }
            }
        })
        .to_string();

        let features = decode_feature_map(&body).unwrap();
        let Overload::Valued { conditions, value, .. } = &features["variant"].overloads[""] else {
            panic!("expected a valued overload");
        };
        assert_eq!(value, &FlagValue::String("fallback".to_owned()));
        assert_eq!(
            conditions.iter().map(|c| c.value.clone()).collect::<Vec<_>>(),
            vec![
                Some(FlagValue::String("first".to_owned())),
                Some(FlagValue::String("second".to_owned())),
            ]
        );
    }

    #[test]
    fn infers_kind_from_conditions_when_active_is_null() {
        let string_feature = json!({
            "name": "f", "project": "p", "active": null,
            "conditions": { "": { "enabled": true, "value": "x", "conditions": [] } }
        });
        assert_eq!(decode_feature("f", &string_feature).unwrap().kind, FlagKind::String);

        let number_feature = json!({
            "name": "f", "project": "p", "active": null,
            "conditions": { "": { "enabled": true, "value": 12.5, "conditions": [] } }
        });
        let decoded = decode_feature("f", &number_feature).unwrap();
        assert_eq!(decoded.kind, FlagKind::Number);
        assert_eq!(decoded.base_value, FlagValue::Null);

        let boolean_feature = json!({
            "name": "f", "project": "p", "active": null,
            "conditions": { "": { "enabled": true, "conditions": [] } }
        });
        let decoded = decode_feature("f", &boolean_feature).unwrap();
        assert_eq!(decoded.kind, FlagKind::Boolean);
        assert_eq!(decoded.base_value, FlagValue::Boolean(false));
    }

    #[test]
    fn mixed_condition_types_are_a_decode_error() {
        let feature = json!({
            "name": "f", "project": "p", "active": null,
            "conditions": {
                "": { "enabled": true, "value": "x", "conditions": [] },
                "prod": { "enabled": true, "value": 3, "conditions": [] }
            }
        });
        assert!(matches!(decode_feature("f", &feature), Err(Error::Decode(_))));
    }

    #[test]
    fn script_overloads_decode_and_stay_opaque() {
        let feature = json!({
            "name": "f", "project": "p", "active": true,
            "conditions": {
                "": { "enabled": true, "wasmConfig": { "name": "my-script" } }
            }
        });
        let decoded = decode_feature("f", &feature).unwrap();
        assert_eq!(
            decoded.overloads[""],
            Overload::Script {
                enabled: true,
                script: "my-script".to_owned(),
            }
        );
    }

    #[test]
    fn number_precision_survives_decoding() {
        let feature = json!({
            "name": "f", "project": "p",
            "active": 0.30000000000000004,
            "conditions": { "": { "enabled": true, "value": 0.1, "conditions": [] } }
        });
        let decoded = decode_feature("f", &feature).unwrap();
        assert_eq!(
            decoded.base_value,
            FlagValue::Number(Decimal::from_str("0.30000000000000004").unwrap())
        );
    }

    #[test]
    fn null_entries_are_skipped() {
        let body = json!({ "gone": null }).to_string();
        assert!(decode_feature_map(&body).unwrap().is_empty());
    }

    #[test]
    fn round_trip_preserves_features() {
        let feature = Feature {
            id: "rt".to_owned(),
            name: "rt".to_owned(),
            project: "p".to_owned(),
            kind: FlagKind::Number,
            base_value: FlagValue::Number(Decimal::from_str("1.25").unwrap()),
            overloads: HashMap::from([(
                String::new(),
                Overload::Valued {
                    enabled: true,
                    conditions: vec![ActivationCondition {
                        period: Some(FeaturePeriod {
                            hour_periods: vec![HourPeriod {
                                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                                end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                            }],
                            activation_days: Some(ActivationDays {
                                days: [DayOfWeek::Monday, DayOfWeek::Friday]
                                    .into_iter()
                                    .collect(),
                            }),
                            timezone: Tz::Europe__Paris,
                            ..Default::default()
                        }),
                        rule: Some(ActivationRule::UserPercentage { percentage: 40 }),
                        value: Some(FlagValue::Number(Decimal::from_str("2.5").unwrap())),
                    }],
                    value: FlagValue::Number(Decimal::from_str("1.25").unwrap()),
                },
            )]),
        };

        let encoded = encode_feature(&feature);
        let decoded = decode_feature("rt", &encoded).unwrap();
        assert_eq!(decoded, feature);
    }

    #[test]
    fn round_trip_recovers_inferred_kind_when_active_is_null() {
        let feature = Feature {
            id: "rt".to_owned(),
            name: "rt".to_owned(),
            project: "p".to_owned(),
            kind: FlagKind::String,
            base_value: FlagValue::Null,
            overloads: HashMap::from([(
                String::new(),
                Overload::Valued {
                    enabled: true,
                    conditions: vec![],
                    value: FlagValue::String("x".to_owned()),
                },
            )]),
        };
        let map = HashMap::from([("rt".to_owned(), feature.clone())]);
        let body = encode_feature_map(&map).to_string();
        let decoded = decode_feature_map(&body).unwrap();
        assert_eq!(decoded["rt"], feature);
    }
}
