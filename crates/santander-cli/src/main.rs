#![forbid(unsafe_code)]
#![deny(unused_must_use, clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Entrypoint for the `santander` command.

use std::process;

/// Runs one command and exits with its status code.
#[tokio::main]
async fn main() {
    let exit_code = santander_cli::run().await;
    if exit_code != 0 {
        process::exit(exit_code);
    }
}
