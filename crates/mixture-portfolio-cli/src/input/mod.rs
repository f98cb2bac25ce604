pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Load a command's input from `--input <file>` or, failing that, from
/// piped stdin.
pub fn load<T: DeserializeOwned>(
    path: Option<&str>,
    command: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return file::read_document(path);
    }
    match stdin::read_stdin()? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Err(format!("--input <file.json|file.yaml> or stdin required for {command}").into()),
    }
}

/// Like [`load`], but keeps the raw JSON value.
pub fn load_value(
    path: Option<&str>,
    command: &str,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    load(path, command)
}
