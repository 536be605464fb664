//! Inbound payload parsing
//!
//! Every payload is parsed completely before the entity context is touched,
//! so a malformed event never leaves partial state behind.

use crate::error::{AlarmEngineError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use voltage_model::{Alarm, AttributeKvEntry, TypedValue};

/// Telemetry grouped by timestamp, ascending
pub type TelemetryBatch = BTreeMap<i64, BTreeMap<String, TypedValue>>;

/// Parse a telemetry payload
///
/// Accepted shapes: `{"k": v}` (stamped with `default_ts`),
/// `{"ts": n, "values": {...}}`, or an array of either. Null values are
/// skipped.
pub fn parse_telemetry(payload: &Value, default_ts: i64) -> Result<TelemetryBatch> {
    let mut batch = TelemetryBatch::new();
    match payload {
        Value::Array(items) => {
            for item in items {
                collect_telemetry(item, default_ts, &mut batch)?;
            }
        },
        other => collect_telemetry(other, default_ts, &mut batch)?,
    }
    Ok(batch)
}

fn collect_telemetry(item: &Value, default_ts: i64, batch: &mut TelemetryBatch) -> Result<()> {
    let object = as_object(item, "telemetry")?;
    let (ts, values) = match (object.get("ts"), object.get("values")) {
        (Some(ts), Some(values)) => {
            let ts = ts.as_i64().ok_or_else(|| {
                AlarmEngineError::malformed(format!("telemetry ts is not an integer: {}", ts))
            })?;
            (ts, as_object(values, "telemetry values")?)
        },
        _ => (default_ts, object),
    };
    let group = batch.entry(ts).or_default();
    for (key, raw) in values {
        if let Some(value) = TypedValue::from_json(raw) {
            group.insert(key.clone(), value);
        }
    }
    Ok(())
}

/// Parse an attribute payload; every entry is stamped with `ts`
pub fn parse_attributes(payload: &Value, ts: i64) -> Result<Vec<AttributeKvEntry>> {
    let object = as_object(payload, "attributes")?;
    Ok(object
        .iter()
        .filter_map(|(key, raw)| {
            TypedValue::from_json(raw).map(|value| AttributeKvEntry {
                key: key.clone(),
                last_update_ts: ts,
                value: Some(value),
            })
        })
        .collect())
}

/// Parse an attribute deletion payload `{"attributes": ["k1", ...]}`
pub fn parse_deleted_keys(payload: &Value) -> Result<Vec<String>> {
    let object = as_object(payload, "attribute deletion")?;
    let Some(Value::Array(keys)) = object.get("attributes") else {
        return Err(AlarmEngineError::malformed(
            "attribute deletion payload has no \"attributes\" array",
        ));
    };
    keys.iter()
        .map(|key| {
            key.as_str().map(str::to_string).ok_or_else(|| {
                AlarmEngineError::malformed(format!("deleted attribute key is not a string: {}", key))
            })
        })
        .collect()
}

/// Parse an alarm notification payload
pub fn parse_alarm(payload: &Value) -> Result<Alarm> {
    serde_json::from_value(payload.clone())
        .map_err(|e| AlarmEngineError::malformed(format!("alarm payload: {}", e)))
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| AlarmEngineError::malformed(format!("{} payload is not an object", what)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_telemetry_uses_event_ts() {
        let batch = parse_telemetry(&json!({"temp": 42, "hum": null}), 7).unwrap();
        assert_eq!(batch.len(), 1);
        let group = &batch[&7];
        assert_eq!(group.get("temp"), Some(&TypedValue::Long(42)));
        assert!(!group.contains_key("hum"));
    }

    #[test]
    fn test_array_telemetry_groups_ascending() {
        let batch = parse_telemetry(
            &json!([
                {"ts": 30, "values": {"temp": 46}},
                {"ts": 10, "values": {"temp": 35}},
                {"ts": 30, "values": {"hum": 50.5}},
                {"temp": 1}
            ]),
            20,
        )
        .unwrap();
        let order: Vec<i64> = batch.keys().copied().collect();
        assert_eq!(order, vec![10, 20, 30]);
        assert_eq!(batch[&30].len(), 2);
    }

    #[test]
    fn test_malformed_telemetry() {
        assert!(matches!(
            parse_telemetry(&json!("42"), 1),
            Err(AlarmEngineError::MalformedPayload(_))
        ));
        assert!(parse_telemetry(&json!({"ts": "soon", "values": {}}), 1).is_err());
        assert!(parse_telemetry(&json!([{"ts": 1, "values": 5}]), 1).is_err());
    }

    #[test]
    fn test_attributes() {
        let entries = parse_attributes(&json!({"alarmEnabled": true, "gone": null}), 5).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_update_ts, 5);
        assert!(parse_attributes(&json!([1, 2]), 5).is_err());
    }

    #[test]
    fn test_deleted_keys() {
        let keys = parse_deleted_keys(&json!({"attributes": ["a", "b"]})).unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(parse_deleted_keys(&json!({"attributes": [1]})).is_err());
        assert!(parse_deleted_keys(&json!({})).is_err());
    }

    #[test]
    fn test_alarm_payload_rejects_garbage() {
        assert!(matches!(
            parse_alarm(&json!({"id": "nope"})),
            Err(AlarmEngineError::MalformedPayload(_))
        ));
    }
}
