//! Typed settings consumed by the helper daemon and the gateway.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the helper does when two operations touch overlapping paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Queue the later operation until the earlier one completes.
    #[default]
    Serialize,
    /// Fail the later operation immediately.
    Reject,
}

impl OverlapPolicy {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serialize => "serialize",
            Self::Reject => "reject",
        }
    }
}

/// Mode and ownership applied to everything the helper creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPermissions {
    /// Mode for created files.
    pub file_mode: Option<u32>,
    /// Mode for created directories.
    pub dir_mode: Option<u32>,
    /// Owner name or numeric uid.
    pub owner: Option<String>,
    /// Group name or numeric gid.
    pub group: Option<String>,
}

impl OutputPermissions {
    /// Whether no adjustment is requested.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.file_mode.is_none()
            && self.dir_mode.is_none()
            && self.owner.is_none()
            && self.group.is_none()
    }
}

/// Logging settings, handed to the telemetry crate at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Level or filter directive.
    pub level: String,
    /// `json` or `pretty`; inferred from the build profile when absent.
    pub format: Option<String>,
}

/// Settings for the privileged helper daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Unix socket the helper listens on.
    pub socket_path: PathBuf,
    /// Directory trees operations may touch. Empty means nothing is allowed.
    pub allowed_roots: Vec<PathBuf>,
    /// Handling of overlapping destinations.
    pub overlap_policy: OverlapPolicy,
    /// Post-processing applied to created paths.
    pub permissions: OutputPermissions,
    /// Logging settings.
    pub logging: LogSettings,
    /// Capacity of the lifecycle event bus.
    pub event_capacity: usize,
}

/// Settings for callers that connect to the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Unix socket the helper listens on.
    pub socket_path: PathBuf,
    /// Upper bound on establishing a session.
    pub connect_timeout: Duration,
}
