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

//! Caller side of the operation gateway.
//!
//! [`PrivilegedChannel`] carries descriptors to the helper over one persistent
//! session and matches responses back by correlation id. [`OperationRunner`]
//! wraps it for UI callers: it shows a progress indicator, runs the round trip
//! off the UI thread and delivers exactly one outcome back on it.
//!
//! Layout: `channel.rs` (session, connectors), `runner.rs` (UI context,
//! progress indicator, completion delivery), `error.rs` (caller-facing errors).

pub mod channel;
pub mod error;
pub mod runner;

pub use channel::{
    BoxedStream, ChannelError, Connector, HelperStream, PrivilegedChannel, UnixSocketConnector,
};
pub use error::{GatewayError, OperationOutput};
pub use runner::{
    MainQueue, OperationRunner, OperationTask, ProgressIndicator, UiContext, UiJob,
};
