//! Load configuration from an optional JSON document plus environment overrides.
//!
//! # Design
//! - The document is optional; every field has a built-in default.
//! - Environment variables override the document field by field.
//! - Validation happens once, after merging, so errors name the final value.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{GatewayConfig, HelperConfig, LogSettings, OutputPermissions};
use crate::validate::{
    parse_octal_mode, parse_overlap_policy, parse_positive, require_absolute,
    split_roots, validate_log_format,
};

/// Environment variable names understood by the loader.
pub mod env_names {
    /// Path of the JSON configuration document.
    pub const CONFIG: &str = "SANTANDER_CONFIG";
    /// Helper socket path.
    pub const SOCKET: &str = "SANTANDER_SOCKET";
    /// Colon separated allowed roots.
    pub const ALLOWED_ROOTS: &str = "SANTANDER_ALLOWED_ROOTS";
    /// `serialize` or `reject`.
    pub const OVERLAP_POLICY: &str = "SANTANDER_OVERLAP_POLICY";
    /// Octal mode for created files.
    pub const FILE_MODE: &str = "SANTANDER_FILE_MODE";
    /// Octal mode for created directories.
    pub const DIR_MODE: &str = "SANTANDER_DIR_MODE";
    /// Owner applied to created paths.
    pub const OWNER: &str = "SANTANDER_OWNER";
    /// Group applied to created paths.
    pub const GROUP: &str = "SANTANDER_GROUP";
    /// Log level or filter directive.
    pub const LOG_LEVEL: &str = "SANTANDER_LOG_LEVEL";
    /// `json` or `pretty`.
    pub const LOG_FORMAT: &str = "SANTANDER_LOG_FORMAT";
    /// Event bus capacity.
    pub const EVENT_CAPACITY: &str = "SANTANDER_EVENT_CAPACITY";
    /// Gateway connect timeout in milliseconds.
    pub const CONNECT_TIMEOUT_MS: &str = "SANTANDER_CONNECT_TIMEOUT_MS";
}

/// Source of environment variables.
pub trait EnvLookup {
    /// Value of `name`, if set and valid UTF-8.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvLookup for HashMap<&str, &str> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).map(|value| (*value).to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Document {
    socket_path: Option<PathBuf>,
    allowed_roots: Option<Vec<PathBuf>>,
    overlap_policy: Option<String>,
    file_mode: Option<String>,
    dir_mode: Option<String>,
    owner: Option<String>,
    group: Option<String>,
    log_level: Option<String>,
    log_format: Option<String>,
    event_capacity: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

impl Document {
    fn read(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load(file: Option<&Path>) -> ConfigResult<Self> {
        file.map_or_else(|| Ok(Self::default()), Self::read)
    }

    fn apply_env(mut self, env: &impl EnvLookup) -> ConfigResult<Self> {
        override_with(&mut self.socket_path, env, env_names::SOCKET, |value| {
            Ok(PathBuf::from(value))
        })?;
        override_with(&mut self.allowed_roots, env, env_names::ALLOWED_ROOTS, |value| {
            Ok(split_roots(value))
        })?;
        override_with(&mut self.overlap_policy, env, env_names::OVERLAP_POLICY, owned)?;
        override_with(&mut self.file_mode, env, env_names::FILE_MODE, owned)?;
        override_with(&mut self.dir_mode, env, env_names::DIR_MODE, owned)?;
        override_with(&mut self.owner, env, env_names::OWNER, owned)?;
        override_with(&mut self.group, env, env_names::GROUP, owned)?;
        override_with(&mut self.log_level, env, env_names::LOG_LEVEL, owned)?;
        override_with(&mut self.log_format, env, env_names::LOG_FORMAT, owned)?;
        override_with(&mut self.event_capacity, env, env_names::EVENT_CAPACITY, |value| {
            parse_positive("event_capacity", value)
        })?;
        override_with(
            &mut self.connect_timeout_ms,
            env,
            env_names::CONNECT_TIMEOUT_MS,
            |value| parse_positive("connect_timeout_ms", value),
        )?;
        Ok(self)
    }

    fn socket_path(&self) -> ConfigResult<PathBuf> {
        self.socket_path.as_deref().map_or_else(
            || Ok(PathBuf::from(defaults::SOCKET_PATH)),
            |path| require_absolute("socket_path", path),
        )
    }
}

fn owned(value: &str) -> ConfigResult<String> {
    Ok(value.to_string())
}

fn override_with<T>(
    slot: &mut Option<T>,
    env: &impl EnvLookup,
    name: &str,
    parse: impl FnOnce(&str) -> ConfigResult<T>,
) -> ConfigResult<()> {
    if let Some(value) = env.var(name)
        && !value.trim().is_empty()
    {
        *slot = Some(parse(&value)?);
    }
    Ok(())
}

fn non_empty(field: &'static str, value: Option<String>) -> ConfigResult<Option<String>> {
    match value {
        Some(text) if text.trim().is_empty() => {
            Err(ConfigError::invalid(field, text, "empty"))
        }
        Some(text) => Ok(Some(text.trim().to_string())),
        None => Ok(None),
    }
}

impl HelperConfig {
    /// Load from `SANTANDER_CONFIG` (if set) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be read or a value is invalid.
    pub fn load(env: &impl EnvLookup) -> ConfigResult<Self> {
        let file = env.var(env_names::CONFIG).map(PathBuf::from);
        Self::from_sources(file.as_deref(), env)
    }

    /// Load from an explicit document and environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be read or a value is invalid.
    pub fn from_sources(file: Option<&Path>, env: &impl EnvLookup) -> ConfigResult<Self> {
        let document = Document::load(file)?.apply_env(env)?;

        let socket_path = document.socket_path()?;
        let allowed_roots = document
            .allowed_roots
            .unwrap_or_else(|| defaults::ALLOWED_ROOTS.iter().map(PathBuf::from).collect())
            .iter()
            .map(|root| require_absolute("allowed_roots", root))
            .collect::<ConfigResult<Vec<_>>>()?;
        let overlap_policy = document
            .overlap_policy
            .as_deref()
            .map(parse_overlap_policy)
            .transpose()?
            .unwrap_or_default();
        let permissions = OutputPermissions {
            file_mode: document
                .file_mode
                .as_deref()
                .map(|value| parse_octal_mode("file_mode", value))
                .transpose()?,
            dir_mode: document
                .dir_mode
                .as_deref()
                .map(|value| parse_octal_mode("dir_mode", value))
                .transpose()?,
            owner: non_empty("owner", document.owner)?,
            group: non_empty("group", document.group)?,
        };
        let logging = LogSettings {
            level: non_empty("log_level", document.log_level)?
                .unwrap_or_else(|| defaults::LOG_LEVEL.to_string()),
            format: document
                .log_format
                .as_deref()
                .map(validate_log_format)
                .transpose()?,
        };
        let event_capacity = match document.event_capacity {
            Some(0) => return Err(ConfigError::invalid("event_capacity", "0", "zero")),
            Some(capacity) => usize::try_from(capacity).map_err(|_| {
                ConfigError::invalid("event_capacity", capacity.to_string(), "out_of_range")
            })?,
            None => defaults::EVENT_CAPACITY,
        };

        Ok(Self {
            socket_path,
            allowed_roots,
            overlap_policy,
            permissions,
            logging,
            event_capacity,
        })
    }
}

impl GatewayConfig {
    /// Load from `SANTANDER_CONFIG` (if set) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be read or a value is invalid.
    pub fn load(env: &impl EnvLookup) -> ConfigResult<Self> {
        let file = env.var(env_names::CONFIG).map(PathBuf::from);
        Self::from_sources(file.as_deref(), env)
    }

    /// Load from an explicit document and environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be read or a value is invalid.
    pub fn from_sources(file: Option<&Path>, env: &impl EnvLookup) -> ConfigResult<Self> {
        let document = Document::load(file)?.apply_env(env)?;
        let connect_timeout = match document.connect_timeout_ms {
            Some(0) => return Err(ConfigError::invalid("connect_timeout_ms", "0", "zero")),
            Some(millis) => Duration::from_millis(millis),
            None => defaults::CONNECT_TIMEOUT,
        };
        Ok(Self {
            socket_path: document.socket_path()?,
            connect_timeout,
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(defaults::SOCKET_PATH),
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }
}
