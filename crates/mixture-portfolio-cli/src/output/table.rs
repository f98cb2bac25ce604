use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::format_cell;

/// Array fields of the result that get their own table.
const DETAIL_TABLES: [&str; 2] = ["candidates", "fold_results"];

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => match map.get("result") {
            Some(result) => print_envelope(result, map),
            None => print_fields(map),
        },
        Value::Array(arr) => print_rows(arr),
        _ => println!("{}", value),
    }
}

fn print_envelope(result: &Value, envelope: &Map<String, Value>) {
    let Value::Object(fields) = result else {
        print_fields(envelope);
        return;
    };

    print_fields(fields);
    for key in DETAIL_TABLES {
        if let Some(Value::Array(rows)) = fields.get(key) {
            println!("\n{}:", key);
            print_rows(rows);
        }
    }

    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }

    if let Some(Value::String(methodology)) = envelope.get("methodology") {
        println!("\nMethodology: {}", methodology);
    }
}

fn print_fields(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), &format_cell(val)]);
    }
    println!("{}", Table::from(builder));
}

fn print_rows(arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        if arr.is_empty() {
            println!("(empty)");
        }
        for item in arr {
            println!("{}", format_cell(item));
        }
        return;
    };

    let headers: Vec<String> = first.keys().cloned().collect();
    let mut builder = Builder::default();
    builder.push_record(&headers);
    for map in arr.iter().filter_map(Value::as_object) {
        let row: Vec<String> = headers
            .iter()
            .map(|h| map.get(h.as_str()).map(format_cell).unwrap_or_default())
            .collect();
        builder.push_record(row);
    }
    println!("{}", Table::from(builder));
}
