//! Decoding of feature change events out of raw SSE records.
use std::collections::HashMap;

use serde_json::Value;

use crate::codec;
use crate::features::Feature;
use crate::sse::parser::SseRecord;

/// A feature change notification from the streaming endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureEvent {
    /// Full snapshot of every feature in the subscription scope.
    FeatureStates(HashMap<String, Feature>),
    FeatureCreated(Feature),
    FeatureUpdated(Feature),
    FeatureDeleted(String),
}

impl FeatureEvent {
    /// Decode a record into an event. Unknown event types and undecodable payloads are dropped
    /// with a log so a single bad event does not tear the connection down.
    pub fn decode(record: &SseRecord) -> Option<FeatureEvent> {
        let envelope: Value = match serde_json::from_str(&record.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!(target: "flagstream", "dropping undecodable stream event: {err}");
                return None;
            }
        };
        // The server names the event both on the wire (`event:` field) and inside the envelope;
        // the wire field wins, the envelope covers records that omitted it.
        let event_type = record
            .event
            .as_deref()
            .or_else(|| envelope.get("type").and_then(Value::as_str))?;
        let payload = envelope.get("payload").unwrap_or(&Value::Null);

        match event_type {
            "FEATURE_STATES" => payload
                .as_object()
                .map(decode_snapshot)
                .map(FeatureEvent::FeatureStates),
            "FEATURE_CREATED" | "FEATURE_UPDATED" => {
                let id = envelope.get("id").and_then(Value::as_str)?;
                match codec::decode_feature(id, payload) {
                    Ok(feature) if event_type == "FEATURE_CREATED" => {
                        Some(FeatureEvent::FeatureCreated(feature))
                    }
                    Ok(feature) => Some(FeatureEvent::FeatureUpdated(feature)),
                    Err(err) => {
                        log::warn!(target: "flagstream", "dropping undecodable feature `{id}` from stream: {err}");
                        None
                    }
                }
            }
            "FEATURE_DELETED" => payload
                .as_str()
                .map(str::to_owned)
                .map(FeatureEvent::FeatureDeleted),
            "KEEP_ALIVE" => None,
            other => {
                log::debug!(target: "flagstream", "ignoring stream event of unknown type `{other}`");
                None
            }
        }
    }
}

fn decode_snapshot(features: &serde_json::Map<String, Value>) -> HashMap<String, Feature> {
    let mut snapshot = HashMap::with_capacity(features.len());
    for (id, value) in features {
        if value.is_null() {
            continue;
        }
        match codec::decode_feature(id, value) {
            Ok(feature) => {
                snapshot.insert(feature.id.clone(), feature);
            }
            Err(err) => {
                log::warn!(target: "flagstream", "dropping undecodable feature `{id}` from snapshot: {err}");
            }
        }
    }
    snapshot
}
