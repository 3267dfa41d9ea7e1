//! Privileged side of the operation gateway.
//!
//! The helper daemon accepts framed [`santander_ops::RequestEnvelope`]s on a
//! Unix socket, validates each descriptor against the configured roots,
//! serialises work on overlapping paths, performs the mutation on the blocking
//! pool and answers with exactly one [`santander_ops::ResponseEnvelope`].
//!
//! Layout: `validate.rs` (request checks), `locks.rs` (destination lock table),
//! `execute.rs` and `permissions.rs` (filesystem work), `dispatcher.rs` (stage
//! machine), `server.rs` (socket loop), `bootstrap.rs` (daemon start-up).
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

pub mod bootstrap;
pub mod dispatcher;
pub mod error;
mod execute;
mod locks;
mod permissions;
pub mod server;
mod validate;

pub use bootstrap::{bind_socket, run_helper, serve_helper};
pub use dispatcher::{DispatchStage, Dispatcher};
pub use error::{HelperError, HelperResult};
pub use server::HelperServer;
