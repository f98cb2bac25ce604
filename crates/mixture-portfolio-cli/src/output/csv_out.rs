use serde_json::Value;
use std::io;

use super::format_cell;

/// Write output as CSV to stdout.
///
/// Result arrays worth tabulating (grid candidates, cross-validation folds,
/// scenario rows) are written row by row; anything else becomes a two-column
/// `field,value` listing.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match value {
        Value::Object(map) => match map.get("result") {
            Some(Value::Object(result)) => {
                if let Some(Value::Array(rows)) = row_field(result) {
                    write_rows(&mut wtr, rows);
                } else {
                    write_fields(&mut wtr, result);
                }
            }
            _ => write_fields(&mut wtr, map),
        },
        Value::Array(arr) => write_rows(&mut wtr, arr),
        _ => {
            let _ = wtr.write_record([&csv_cell(value)]);
        }
    }

    let _ = wtr.flush();
}

/// The result array to write as rows, if any. Scenario matrices are only
/// dumped for sampling output, where they are the answer.
fn row_field(result: &serde_json::Map<String, Value>) -> Option<&Value> {
    ["candidates", "fold_results"]
        .iter()
        .find_map(|k| result.get(*k))
        .or_else(|| {
            result
                .contains_key("asset_names")
                .then(|| result.get("scenarios"))
                .flatten()
        })
}

fn write_fields<W: io::Write>(wtr: &mut csv::Writer<W>, map: &serde_json::Map<String, Value>) {
    let _ = wtr.write_record(["field", "value"]);
    for (key, val) in map {
        let _ = wtr.write_record([key.as_str(), &csv_cell(val)]);
    }
}

fn write_rows<W: io::Write>(wtr: &mut csv::Writer<W>, arr: &[Value]) {
    match arr.first() {
        Some(Value::Object(first)) => {
            let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
            let _ = wtr.write_record(&headers);
            for map in arr.iter().filter_map(Value::as_object) {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(*h).map(csv_cell).unwrap_or_default())
                    .collect();
                let _ = wtr.write_record(&row);
            }
        }
        // Matrix rows, e.g. scenarios.
        Some(Value::Array(_)) => {
            for row in arr.iter().filter_map(Value::as_array) {
                let cells: Vec<String> = row.iter().map(csv_cell).collect();
                let _ = wtr.write_record(&cells);
            }
        }
        _ => {
            for item in arr {
                let _ = wtr.write_record([&csv_cell(item)]);
            }
        }
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        _ => format_cell(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(rows: &[Value]) -> String {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        write_rows(&mut wtr, rows);
        String::from_utf8(wtr.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_object_rows_get_header() {
        let rows = vec![
            json!({"cvar": -0.1, "feasible": true}),
            json!({"cvar": -0.4, "feasible": false}),
        ];
        assert_eq!(render(&rows), "cvar,feasible\n-0.1,true\n-0.4,false\n");
    }

    #[test]
    fn test_matrix_rows_written_plainly() {
        let rows = vec![json!([0.1, 0.2]), json!([0.3, 0.4])];
        assert_eq!(render(&rows), "0.1,0.2\n0.3,0.4\n");
    }

    #[test]
    fn test_scenarios_only_written_for_sampling_output() {
        let optimiser = json!({"optimal_weights": [1.0], "scenarios": [[0.1]]});
        assert!(row_field(optimiser.as_object().unwrap()).is_none());

        let sampler = json!({"asset_names": ["Bond"], "scenarios": [[0.1]]});
        assert_eq!(row_field(sampler.as_object().unwrap()), Some(&json!([[0.1]])));
    }

    #[test]
    fn test_null_cell_is_empty() {
        assert_eq!(csv_cell(&Value::Null), "");
    }
}
