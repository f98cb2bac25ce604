use serde_json::Value;
use std::io::{self, Write};

/// Pretty-print JSON to stdout. Scenario matrices can be large, so this
/// streams into a locked handle instead of building the string first.
pub fn print_json(value: &Value) {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let written = serde_json::to_writer_pretty(&mut out, value)
        .map_err(io::Error::from)
        .and_then(|_| writeln!(out))
        .and_then(|_| out.flush());
    if let Err(e) = written {
        eprintln!("JSON output error: {}", e);
    }
}
