//! Condition keys and attribute scopes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source of a value referenced by an alarm condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKeyType {
    /// Latest time-series (telemetry) value
    #[serde(alias = "TIMESERIES", alias = "telemetry")]
    TimeSeries,
    /// Attribute value, any scope
    #[serde(alias = "attribute")]
    Attribute,
}

/// A single value referenced by an alarm condition
///
/// Equality is structural: `TIME_SERIES:temp` and `ATTRIBUTE:temp` are
/// different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConditionKey {
    #[serde(rename = "type")]
    pub kind: ConditionKeyType,
    #[serde(rename = "key")]
    pub name: String,
}

impl ConditionKey {
    pub fn new(kind: ConditionKeyType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn time_series(name: impl Into<String>) -> Self {
        Self::new(ConditionKeyType::TimeSeries, name)
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::new(ConditionKeyType::Attribute, name)
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConditionKeyType::TimeSeries => "TIME_SERIES",
            ConditionKeyType::Attribute => "ATTRIBUTE",
        };
        write!(f, "{}:{}", kind, self.name)
    }
}

/// Attribute scopes
///
/// Hydration reads all three and keeps the most recently updated value
/// when a key exists in more than one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeScope {
    #[default]
    #[serde(rename = "CLIENT_SCOPE", alias = "CLIENT")]
    Client,
    #[serde(rename = "SHARED_SCOPE", alias = "SHARED")]
    Shared,
    #[serde(rename = "SERVER_SCOPE", alias = "SERVER")]
    Server,
}

impl AttributeScope {
    pub const ALL: [AttributeScope; 3] = [
        AttributeScope::Client,
        AttributeScope::Shared,
        AttributeScope::Server,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeScope::Client => "CLIENT_SCOPE",
            AttributeScope::Shared => "SHARED_SCOPE",
            AttributeScope::Server => "SERVER_SCOPE",
        }
    }
}

impl fmt::Display for AttributeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_condition_key_structural_equality() {
        let mut keys = HashSet::new();
        keys.insert(ConditionKey::time_series("temp"));
        keys.insert(ConditionKey::time_series("temp"));
        keys.insert(ConditionKey::attribute("temp"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_condition_key_json_shape() {
        let key: ConditionKey =
            serde_json::from_str(r#"{"type":"TIME_SERIES","key":"temp"}"#).unwrap();
        assert_eq!(key, ConditionKey::time_series("temp"));
        assert_eq!(key.to_string(), "TIME_SERIES:temp");
    }

    #[test]
    fn test_scope_aliases() {
        let scope: AttributeScope = serde_json::from_str("\"SERVER\"").unwrap();
        assert_eq!(scope, AttributeScope::Server);
        let scope: AttributeScope = serde_json::from_str("\"SHARED_SCOPE\"").unwrap();
        assert_eq!(scope, AttributeScope::Shared);
    }
}
