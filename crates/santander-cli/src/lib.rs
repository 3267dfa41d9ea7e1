#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unused)]
#![allow(clippy::redundant_pub_crate)]

//! Command-line caller that submits one privileged operation per invocation.
//!
//! Layout:
//! - `cli.rs`: argument parsing and command dispatch
//! - `client.rs`: gateway wiring, terminal progress indicator, errors
//! - `output.rs`: outcome rendering
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod client;
pub(crate) mod output;

pub use cli::run;
