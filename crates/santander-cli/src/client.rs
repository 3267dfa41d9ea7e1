//! Gateway wiring, terminal progress indicator and CLI error type.

use std::fmt::{self, Display, Formatter};
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use anyhow::anyhow;
use santander_config::GatewayConfig;
use santander_gateway::{
    GatewayError, MainQueue, OperationOutput, OperationRunner, PrivilegedChannel,
    ProgressIndicator,
};
use santander_ops::OperationDescriptor;
use santander_telemetry::Metrics;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

const UI_THREAD_NAME: &str = "santander-cli-ui";

/// Structured error type used to drive exit codes and user-facing messages.
#[derive(Debug)]
pub(crate) enum CliError {
    /// Bad arguments or input files.
    Validation(String),
    /// The helper refused or failed the operation.
    Operation(GatewayError),
    /// The helper could not be reached or the session broke.
    Channel(GatewayError),
    /// Anything else that went wrong locally.
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) fn from_gateway(error: GatewayError) -> Self {
        match error {
            GatewayError::Channel { .. } => Self::Channel(error),
            GatewayError::InvalidRequest { .. } | GatewayError::Operation { .. } => {
                Self::Operation(error)
            }
            GatewayError::Internal { .. } => Self::Failure(anyhow::Error::new(error)),
        }
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::Operation(_) => 2,
            Self::Channel(_) | Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Operation(error) | Self::Channel(error) => error.user_message(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }

    pub(crate) const fn gateway(&self) -> Option<&GatewayError> {
        match self {
            Self::Operation(error) | Self::Channel(error) => Some(error),
            Self::Validation(_) | Self::Failure(_) => None,
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Prints the progress title on stderr while the helper works, when stderr is a terminal.
pub(crate) struct TerminalIndicator {
    enabled: bool,
}

impl TerminalIndicator {
    pub(crate) fn detect() -> Self {
        Self {
            enabled: io::stderr().is_terminal(),
        }
    }
}

impl ProgressIndicator for TerminalIndicator {
    fn present(&self, title: &str) {
        if self.enabled {
            let mut stderr = io::stderr().lock();
            let _ = write!(stderr, "{title} ");
            let _ = stderr.flush();
        }
    }

    fn dismiss(&self) {
        if self.enabled {
            eprintln!();
        }
    }
}

/// Submit `descriptor` through the runner and wait for its completion.
pub(crate) async fn submit(
    config: &GatewayConfig,
    descriptor: OperationDescriptor,
) -> CliResult<OperationOutput> {
    let metrics = Metrics::new()
        .map_err(|err| CliError::failure(anyhow!("failed to register metrics: {err}")))?;
    let outcome = submit_with_metrics(config, descriptor, metrics.clone()).await;
    match metrics.render() {
        Ok(rendered) => debug!(metrics = %rendered, "channel metrics"),
        Err(err) => debug!(error = %err, "failed to render channel metrics"),
    }
    outcome
}

async fn submit_with_metrics(
    config: &GatewayConfig,
    descriptor: OperationDescriptor,
    metrics: Metrics,
) -> CliResult<OperationOutput> {
    let ui = MainQueue::spawn(UI_THREAD_NAME)
        .map_err(|err| CliError::failure(anyhow!("failed to start ui queue: {err}")))?;
    let runner = OperationRunner::new(
        PrivilegedChannel::from_config(config, metrics),
        Handle::current(),
        Arc::new(ui),
        Arc::new(TerminalIndicator::detect()),
    );

    let (delivered, completion) = oneshot::channel();
    runner.submit_privileged_operation(descriptor, move |outcome| {
        let _ = delivered.send(outcome);
    });
    completion
        .await
        .map_err(|_| CliError::failure(anyhow!("operation completion was never delivered")))?
        .map_err(CliError::from_gateway)
}
