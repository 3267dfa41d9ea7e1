//! Argument parsing and command dispatch.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use santander_config::{GatewayConfig, ProcessEnv};
use santander_ops::{OperationDescriptor, RenditionRef};
use santander_telemetry::{LogFormat, LoggingConfig, init_logging};
use tracing::debug;

use crate::client::{self, CliError, CliResult};
use crate::output;

/// Parses CLI arguments, submits the requested operation and renders the
/// outcome. Returns the process exit code.
pub async fn run() -> i32 {
    execute(&Cli::parse()).await
}

async fn execute(cli: &Cli) -> i32 {
    let format = cli.output;
    if let Err(err) = init_logging(&LoggingConfig {
        level: &cli.log_level,
        format: LogFormat::Pretty,
        ..LoggingConfig::default()
    }) {
        eprintln!("warning: logging unavailable: {err}");
    }

    match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            output::render_error(&err, format);
            err.exit_code()
        }
    }
}

async fn dispatch(cli: &Cli) -> CliResult<()> {
    let config = gateway_config(cli)?;
    let descriptor = build_descriptor(&cli.command)?;
    let kind = descriptor.kind();
    debug!(
        socket = %config.socket_path.display(),
        kind = kind.as_str(),
        "submitting operation"
    );
    let outcome = client::submit(&config, descriptor).await?;
    output::render_success(kind, &outcome, cli.output)
}

#[derive(Parser)]
#[command(
    name = "santander",
    about = "Submit privileged file operations to the Santander helper"
)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        help = "Configuration document (defaults to $SANTANDER_CONFIG)"
    )]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Helper socket path")]
    socket: Option<PathBuf>,
    #[arg(long, global = true, help = "Connect timeout in milliseconds")]
    connect_timeout_ms: Option<u64>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text
    )]
    output: OutputFormat,
    #[arg(long, global = true, env = "SANTANDER_CLI_LOG", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Write catalog renditions into a new directory.
    Extract(ExtractArgs),
    /// Create one directory.
    Mkdir(PathArgs),
    /// Copy a file or directory tree.
    Copy(TransferArgs),
    /// Move or rename a file or directory tree.
    Move(TransferArgs),
    /// Remove a file or directory tree.
    Remove(PathArgs),
}

#[derive(Args)]
pub(crate) struct ExtractArgs {
    /// JSON array of renditions in wire form.
    #[arg(long)]
    renditions: PathBuf,
    /// Directory to create; must not exist.
    #[arg(long)]
    destination: PathBuf,
}

#[derive(Args)]
pub(crate) struct PathArgs {
    path: PathBuf,
}

#[derive(Args)]
pub(crate) struct TransferArgs {
    source: PathBuf,
    destination: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

fn gateway_config(cli: &Cli) -> CliResult<GatewayConfig> {
    let loaded = match cli.config.as_deref() {
        Some(path) => GatewayConfig::from_sources(Some(path), &ProcessEnv),
        None => GatewayConfig::load(&ProcessEnv),
    };
    let mut config = loaded.map_err(|err| {
        CliError::failure(anyhow::Error::new(err).context("failed to load gateway configuration"))
    })?;
    if let Some(socket) = &cli.socket {
        config.socket_path = absolute(socket)?;
    }
    match cli.connect_timeout_ms {
        Some(0) => return Err(CliError::validation("--connect-timeout-ms must be positive")),
        Some(millis) => config.connect_timeout = Duration::from_millis(millis),
        None => {}
    }
    Ok(config)
}

fn build_descriptor(command: &Command) -> CliResult<OperationDescriptor> {
    Ok(match command {
        Command::Extract(args) => {
            OperationDescriptor::extract_catalog(load_renditions(&args.renditions)?, absolute(&args.destination)?)
        }
        Command::Mkdir(args) => OperationDescriptor::create_directory(absolute(&args.path)?),
        Command::Copy(args) => {
            OperationDescriptor::copy(absolute(&args.source)?, absolute(&args.destination)?)
        }
        Command::Move(args) => {
            OperationDescriptor::relocate(absolute(&args.source)?, absolute(&args.destination)?)
        }
        Command::Remove(args) => OperationDescriptor::remove(absolute(&args.path)?),
    })
}

fn load_renditions(path: &Path) -> CliResult<Vec<RenditionRef>> {
    let raw = fs::read(path).map_err(|err| {
        CliError::validation(format!("failed to read {}: {err}", path.display()))
    })?;
    serde_json::from_slice(&raw).map_err(|err| {
        CliError::validation(format!("{} is not a rendition list: {err}", path.display()))
    })
}

/// The helper only accepts absolute paths; relative ones resolve against the
/// working directory here.
fn absolute(path: &Path) -> CliResult<PathBuf> {
    std::path::absolute(path).map_err(|err| {
        CliError::validation(format!("cannot resolve {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use santander_test_support::renditions;
    use std::ffi::OsStr;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn subcommands_build_matching_descriptors() -> TestResult<()> {
        let cli = Cli::try_parse_from(["santander", "copy", "/var/mobile/a", "/var/mobile/b"])?;
        assert_eq!(
            build_descriptor(&cli.command).map_err(|err| anyhow::anyhow!(err.display_message()))?,
            OperationDescriptor::copy("/var/mobile/a", "/var/mobile/b")
        );

        let cli = Cli::try_parse_from(["santander", "--output", "json", "remove", "/var/tmp/x"])?;
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(
            build_descriptor(&cli.command).map_err(|err| anyhow::anyhow!(err.display_message()))?,
            OperationDescriptor::remove("/var/tmp/x")
        );
        Ok(())
    }

    #[test]
    fn extract_reads_rendition_file() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("renditions.json");
        fs::write(&list, serde_json::to_vec(&renditions::pair())?)?;
        let destination = dir.path().join("out");

        let cli = Cli::try_parse_from([
            OsStr::new("santander"),
            OsStr::new("extract"),
            OsStr::new("--renditions"),
            list.as_os_str(),
            OsStr::new("--destination"),
            destination.as_os_str(),
        ])?;
        let descriptor =
            build_descriptor(&cli.command).map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert_eq!(
            descriptor,
            OperationDescriptor::extract_catalog(renditions::pair(), &destination)
        );
        Ok(())
    }

    #[test]
    fn unreadable_rendition_file_is_a_validation_error() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("renditions.json");
        fs::write(&list, b"{\"not\": \"a list\"}")?;
        let err = load_renditions(&list)
            .err()
            .ok_or_else(|| anyhow::anyhow!("object must be rejected"))?;
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn relative_paths_become_absolute() -> TestResult<()> {
        let cli = Cli::try_parse_from(["santander", "mkdir", "relative/dir"])?;
        match build_descriptor(&cli.command).map_err(|err| anyhow::anyhow!(err.display_message()))? {
            OperationDescriptor::CreateDirectory { path } => {
                assert!(path.is_absolute());
                assert!(path.ends_with("relative/dir"));
            }
            other => anyhow::bail!("unexpected descriptor {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn zero_connect_timeout_is_rejected() -> TestResult<()> {
        let cli = Cli::try_parse_from([
            "santander",
            "--connect-timeout-ms",
            "0",
            "--socket",
            "/tmp/helper.sock",
            "remove",
            "/var/tmp/x",
        ])?;
        let err = gateway_config(&cli)
            .err()
            .ok_or_else(|| anyhow::anyhow!("zero timeout must be rejected"))?;
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }
}
