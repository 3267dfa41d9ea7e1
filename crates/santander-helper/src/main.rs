#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Privileged helper daemon serving operation requests on a Unix socket.

use santander_helper::{HelperResult, run_helper};

/// Runs the helper until SIGINT or SIGTERM.
#[tokio::main]
async fn main() -> HelperResult<()> {
    run_helper().await
}
