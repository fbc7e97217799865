//! Output formatting: JSON, compact JSON, YAML.
//!
//! Twin documents are free-form JSON, so every command renders through
//! serde in the format selected by `--output`.

use std::io::{self, Write};

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Render a serde-serializable value in the chosen format.
pub fn render<T: serde::Serialize + ?Sized>(format: OutputFormat, data: &T) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?.trim_end().to_owned(),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Render and print in one step.
pub fn emit<T: serde::Serialize + ?Sized>(format: OutputFormat, data: &T, quiet: bool) -> Result<(), CliError> {
    print_output(&render(format, data)?, quiet);
    Ok(())
}
