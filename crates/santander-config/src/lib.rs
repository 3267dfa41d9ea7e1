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

//! Typed configuration for the privileged helper and its callers.
//!
//! Layout: `model.rs` (typed settings), `loader.rs` (JSON document plus
//! `SANTANDER_*` environment overrides), `validate.rs` (parsing helpers),
//! `defaults.rs` (built-in values).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{EnvLookup, ProcessEnv, env_names};
pub use model::{GatewayConfig, HelperConfig, LogSettings, OutputPermissions, OverlapPolicy};
