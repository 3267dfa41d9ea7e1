//! Built-in configuration values.
//!
//! # Design
//! - Keep every default in one place so the helper and its callers agree on the socket.
//! - Roots cover the user-writable areas the file manager browses.

use std::time::Duration;

pub(crate) const SOCKET_PATH: &str = "/var/run/santander/helper.sock";
pub(crate) const ALLOWED_ROOTS: &[&str] = &["/var/mobile", "/var/tmp"];
pub(crate) const LOG_LEVEL: &str = "info";
pub(crate) const EVENT_CAPACITY: usize = 256;
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
