pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Arrays longer than this are abbreviated in table and CSV cells.
pub(crate) const MAX_INLINE_ITEMS: usize = 8;

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Render a scalar or short array for a single cell. Long arrays (return
/// series, scenario matrices) collapse to a length marker.
pub(crate) fn format_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(arr) if arr.len() > MAX_INLINE_ITEMS => format!("[{} values]", arr.len()),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_cell).collect();
            items.join(", ")
        }
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_cell_short_array() {
        assert_eq!(format_cell(&json!([0.6, 0.4])), "0.6, 0.4");
    }

    #[test]
    fn test_format_cell_abbreviates_long_array() {
        let long: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert_eq!(format_cell(&json!(long)), "[100 values]");
    }

    #[test]
    fn test_format_cell_null() {
        assert_eq!(format_cell(&Value::Null), "null");
    }
}
