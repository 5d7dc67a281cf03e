//! CLI command implementations.

pub mod backup;
pub mod migrate;
pub mod status;
pub mod sync;

/// Returns an error for an unsupported `--format` value.
pub(crate) fn check_format(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "text" | "json" => Ok(()),
        other => Err(format!("Unknown format: {other} (expected text or json)").into()),
    }
}
