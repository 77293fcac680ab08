use serde_json::Value;
use std::collections::HashMap;

/// Whether an exchange-info symbol entry satisfies every `key = value` filter.
pub fn matches_filters(
    symbol: &serde_json::Map<String, Value>,
    filters: &HashMap<String, String>,
) -> bool {
    filters.iter().all(|(key, required_value)| match symbol.get(key) {
        // e.g. "status": "TRADING"
        Some(Value::String(s)) => s == required_value,
        // e.g. "permissions": ["SPOT", "MARGIN"]
        Some(Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(required_value)),
        // Numbers and booleans compare by their JSON text
        Some(other) => other.to_string() == *required_value,
        None => false,
    })
}
