//! Outcome renderers.

use anyhow::anyhow;
use santander_gateway::OperationOutput;
use santander_ops::OperationKind;
use serde_json::{Value, json};

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

pub(crate) fn render_success(
    kind: OperationKind,
    output: &OperationOutput,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(&success_document(kind, output))?,
        OutputFormat::Text => match &output.artifact {
            Some(path) => println!("{}: ok ({})", kind.as_str(), path.display()),
            None => println!("{}: ok", kind.as_str()),
        },
    }
    Ok(())
}

pub(crate) fn render_error(error: &CliError, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            if let Err(err) = print_json(&failure_document(error)) {
                eprintln!("error: {}", err.display_message());
            }
        }
        OutputFormat::Text => {
            eprintln!("error: {}", error.display_message());
        }
    }
}

fn success_document(kind: OperationKind, output: &OperationOutput) -> Value {
    json!({
        "status": "success",
        "operation": kind.as_str(),
        "artifact": output.artifact.as_ref().map(|path| path.display().to_string()),
    })
}

fn failure_document(error: &CliError) -> Value {
    let gateway = error.gateway();
    json!({
        "status": "failure",
        "kind": gateway
            .and_then(|err| err.error_kind())
            .map_or("channel", |kind| kind.as_str()),
        "message": error.display_message(),
        "outcome_unknown": gateway.is_some_and(|err| err.outcome_unknown()),
    })
}

fn print_json(value: &Value) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}
