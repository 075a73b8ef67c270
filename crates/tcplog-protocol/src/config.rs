//! Telemetry configuration.
//!
//! A [`TelemetryConfig`] is built once, either directly, from a key lookup
//! supplied by the host's config store ([`TelemetryConfig::from_lookup`]), or
//! from per-build-profile [`TelemetrySettings`]. It is validated before any
//! session manager is constructed.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};

pub const KEY_HOST_NAME: &str = "HostName";
pub const KEY_PORT: &str = "Port";
pub const KEY_GENERATE_SESSION_GUID: &str = "GenerateSessionGuid";
pub const KEY_TIMESTAMP_EVENTS: &str = "TimeStampEvents";
pub const KEY_SINK: &str = "Sink";
pub const KEY_FILE_DIRECTORY: &str = "FileDirectory";
pub const KEY_RESOLVE_TIMEOUT_MS: &str = "ResolveTimeoutMs";
pub const KEY_CONNECT_TIMEOUT_MS: &str = "ConnectTimeoutMs";

/// Where session output is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Network,
    File,
    /// Network and file together, fed the same bytes. The file then holds
    /// the network's newline-delimited records and is named `<id>.jsonl`
    /// rather than being a single `<id>.json` document.
    Both,
}

impl SinkKind {
    pub fn uses_network(self) -> bool {
        matches!(self, Self::Network | Self::Both)
    }

    pub fn uses_file(self) -> bool {
        matches!(self, Self::File | Self::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::File => "file",
            Self::Both => "both",
        }
    }
}

impl FromStr for SinkKind {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "network" | "tcp" => Ok(Self::Network),
            "file" => Ok(Self::File),
            "both" => Ok(Self::Both),
            other => Err(TelemetryError::ConfigInvalid(format!(
                "unknown sink kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub host_name: String,
    pub port: u16,
    #[serde(default)]
    pub generate_session_guid: bool,
    #[serde(default)]
    pub timestamp_events: bool,
    #[serde(default)]
    pub sink: SinkKind,
    #[serde(default = "default_file_directory")]
    pub file_directory: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub resolve_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_file_directory() -> PathBuf {
    PathBuf::from("telemetry")
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl TelemetryConfig {
    /// Network-sink config for `host_name:port` with every other option at
    /// its default.
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            generate_session_guid: false,
            timestamp_events: false,
            sink: SinkKind::Network,
            file_directory: default_file_directory(),
            resolve_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
        }
    }

    /// File-sink config writing one document per session under `directory`.
    pub fn file(directory: impl Into<PathBuf>) -> Self {
        Self {
            sink: SinkKind::File,
            file_directory: directory.into(),
            ..Self::new(String::new(), 0)
        }
    }

    pub fn generate_session_guid(mut self, enabled: bool) -> Self {
        self.generate_session_guid = enabled;
        self
    }

    pub fn timestamp_events(mut self, enabled: bool) -> Self {
        self.timestamp_events = enabled;
        self
    }

    pub fn sink(mut self, sink: SinkKind) -> Self {
        self.sink = sink;
        self
    }

    pub fn file_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.file_directory = directory.into();
        self
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    /// Build from a key lookup into the host's configuration store.
    ///
    /// `HostName` and `Port` are required when the sink uses the network.
    /// Unknown or missing optional keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> TelemetryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sink = match lookup(KEY_SINK) {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => SinkKind::default(),
        };

        let host_name = lookup(KEY_HOST_NAME).unwrap_or_default().trim().to_owned();
        let port = match lookup(KEY_PORT) {
            Some(text) if !text.trim().is_empty() => parse_port(&text)?,
            _ => 0,
        };

        let mut config = Self::new(host_name, port);
        config.sink = sink;
        config.generate_session_guid = lookup(KEY_GENERATE_SESSION_GUID)
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        config.timestamp_events = lookup(KEY_TIMESTAMP_EVENTS)
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        if let Some(directory) = lookup(KEY_FILE_DIRECTORY)
            && !directory.trim().is_empty()
        {
            config.file_directory = PathBuf::from(directory.trim());
        }
        if let Some(ms) = lookup(KEY_RESOLVE_TIMEOUT_MS) {
            config.resolve_timeout_ms = parse_millis(KEY_RESOLVE_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(KEY_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_millis(KEY_CONNECT_TIMEOUT_MS, &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if self.sink.uses_network() {
            if self.host_name.trim().is_empty() {
                return Err(TelemetryError::ConfigInvalid("missing host name".into()));
            }
            if self.port == 0 {
                return Err(TelemetryError::ConfigInvalid("port must be 1-65535".into()));
            }
        }
        if self.sink.uses_file() && self.file_directory.as_os_str().is_empty() {
            return Err(TelemetryError::ConfigInvalid("missing file directory".into()));
        }
        Ok(())
    }
}

fn parse_port(text: &str) -> TelemetryResult<u16> {
    match text.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(TelemetryError::ConfigInvalid(format!(
            "invalid port number: {}",
            text.trim()
        ))),
        Ok(port) => Ok(port),
    }
}

fn parse_millis(key: &str, text: &str) -> TelemetryResult<u64> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| TelemetryError::ConfigInvalid(format!("invalid {key}: {}", text.trim())))
}

/// Lenient boolean: `true`, `yes`, `on`, `1` (any case) are true.
pub fn parse_bool(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

/// Build configuration the host application was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildProfile {
    Release,
    Debug,
    Test,
    Development,
}

impl FromStr for BuildProfile {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "release" | "shipping" => Ok(Self::Release),
            "debug" => Ok(Self::Debug),
            "test" => Ok(Self::Test),
            "development" | "dev" => Ok(Self::Development),
            other => Err(TelemetryError::ConfigInvalid(format!(
                "unknown build profile: {other}"
            ))),
        }
    }
}

/// Settings for one build profile, stored as the config store holds them
/// (port as text).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSettings {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub generate_session_guid: bool,
    #[serde(default)]
    pub timestamp_events: bool,
}

/// Host/port/flag values for every build profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySettings {
    #[serde(default)]
    pub release: ProfileSettings,
    #[serde(default)]
    pub debug: ProfileSettings,
    #[serde(default)]
    pub test: ProfileSettings,
    #[serde(default)]
    pub development: ProfileSettings,
}

impl TelemetrySettings {
    pub fn profile(&self, profile: BuildProfile) -> &ProfileSettings {
        match profile {
            BuildProfile::Release => &self.release,
            BuildProfile::Debug => &self.debug,
            BuildProfile::Test => &self.test,
            BuildProfile::Development => &self.development,
        }
    }

    /// Network config for `profile`, validated the same way as a key lookup.
    pub fn config_for(&self, profile: BuildProfile) -> TelemetryResult<TelemetryConfig> {
        self.config_for_sink(profile, SinkKind::Network)
    }

    /// Config for `profile` delivering to `sink`. Host and port are only
    /// required when `sink` uses the network.
    pub fn config_for_sink(
        &self,
        profile: BuildProfile,
        sink: SinkKind,
    ) -> TelemetryResult<TelemetryConfig> {
        let settings = self.profile(profile);
        TelemetryConfig::from_lookup(|key| match key {
            KEY_SINK => Some(sink.as_str().to_owned()),
            KEY_HOST_NAME => Some(settings.host_name.clone()),
            KEY_PORT => Some(settings.port.clone()),
            KEY_GENERATE_SESSION_GUID => Some(settings.generate_session_guid.to_string()),
            KEY_TIMESTAMP_EVENTS => Some(settings.timestamp_events.to_string()),
            _ => None,
        })
    }
}
