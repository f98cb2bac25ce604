use serde_json::Value;

/// Key answer fields, most specific first.
const PRIORITY_KEYS: [&str; 7] = [
    "optimal_weights",
    "optimal_sharpe",
    "overfitting_detected",
    "sharpe",
    "cvar",
    "valid",
    "error",
];

/// Print just the key answer value from the output.
///
/// Looks for well-known result fields in order of priority, then falls back
/// to the first field of the result object.
pub fn print_minimal(value: &Value) {
    println!("{}", minimal_text(value));
}

fn minimal_text(value: &Value) -> String {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let Value::Object(map) = result_obj else {
        return format_minimal(result_obj);
    };

    if let Some(val) = PRIORITY_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
    {
        return format_minimal(val);
    }

    match map.iter().next() {
        Some((key, val)) => format!("{}: {}", key, format_minimal(val)),
        None => "{}".to_string(),
    }
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
