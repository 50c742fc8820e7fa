//! Agent configuration
//!
//! The whole agent is described by one TOML file; every table is optional
//! except `[artifact]`, which needs at least a URL.
//!
//! ```toml
//! [artifact]
//! url = "https://example.com/firmware/configurationFull.gciBin"
//! local_path = "/tmp/configurationFull.gciBin"
//!
//! [interface]
//! name = "can0"
//! bitrate = 250000
//!
//! [updater]
//! program = "qemu-aarch64-static"
//! args = ["./can-update"]
//! working_dir = "/opt/can-update/build"
//!
//! [handshake]
//! timeout_secs = 120
//!
//! [handshake.ack]
//! policy = "source_address"
//! address = 3
//!
//! [schedule]
//! interval_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use canup_core::{ChannelConfig, ConfigError, HandshakeSettings, SocketCanConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Complete agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Remote artifact to watch
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// CAN interface setup
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// External updater invocation
    #[serde(default)]
    pub updater: UpdaterConfig,

    /// Handshake timing and acknowledgement policy
    #[serde(default)]
    pub handshake: HandshakeSettings,

    /// Channel override; defaults to SocketCAN on `interface.name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelConfig>,

    /// Polling schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.artifact.url.trim().is_empty() {
            return Err(ConfigError::Invalid("artifact.url is required".to_string()));
        }
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_secs must be positive".to_string(),
            ));
        }
        if self.updater.program.trim().is_empty() {
            return Err(ConfigError::Invalid("updater.program is required".to_string()));
        }
        self.handshake.validate()
    }

    /// Effective channel configuration
    pub fn channel(&self) -> ChannelConfig {
        self.channel.clone().unwrap_or_else(|| {
            ChannelConfig::SocketCan(SocketCanConfig {
                interface: self.interface.name.clone(),
                ..SocketCanConfig::default()
            })
        })
    }
}

// =============================================================================
// Artifact
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// URL polled for a newer artifact
    #[serde(default)]
    pub url: String,

    /// Where the downloaded artifact is staged
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_local_path() -> PathBuf {
    PathBuf::from("/tmp/configurationFull.gciBin")
}

fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            local_path: default_local_path(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Interface
// =============================================================================

/// Kind of CAN interface being configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Physical controller; bitrate is applied
    #[default]
    Can,
    /// Virtual CAN; has no bitrate
    Vcan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Run the setup commands at all
    #[serde(default = "default_true")]
    pub manage: bool,

    #[serde(default = "default_interface_name")]
    pub name: String,

    #[serde(default)]
    pub kind: InterfaceKind,

    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Prefix `ip` invocations with `sudo`
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

fn default_true() -> bool {
    true
}

fn default_interface_name() -> String {
    "can0".to_string()
}

fn default_bitrate() -> u32 {
    250000
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            manage: true,
            name: default_interface_name(),
            kind: InterfaceKind::default(),
            bitrate: default_bitrate(),
            use_sudo: true,
        }
    }
}

// =============================================================================
// Updater
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Executable to launch
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the artifact path
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory for the updater
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Pause between the acknowledgement and launching the updater
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_program() -> String {
    "qemu-aarch64-static".to_string()
}

fn default_args() -> Vec<String> {
    vec!["./can-update".to_string()]
}

fn default_settle_delay() -> u64 {
    1000
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl UpdaterConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// =============================================================================
// Schedule
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between artifact checks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canup_core::AckPolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_config_defaults() {
        let config = AgentConfig::from_toml(
            r#"
            [artifact]
            url = "https://example.com/fw.bin"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(
            config.artifact.local_path,
            PathBuf::from("/tmp/configurationFull.gciBin")
        );
        assert_eq!(config.interface.name, "can0");
        assert_eq!(config.interface.bitrate, 250000);
        assert!(config.interface.use_sudo);
        assert_eq!(config.updater.program, "qemu-aarch64-static");
        assert_eq!(config.updater.args, vec!["./can-update".to_string()]);
        assert_eq!(config.updater.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.handshake.timeout_secs, 10);
        assert_eq!(config.handshake.ack, AckPolicy::default());
        assert_eq!(config.schedule.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_full_config() {
        let config = AgentConfig::from_toml(
            r#"
            [artifact]
            url = "https://example.com/fw.bin"
            local_path = "/var/lib/canup/fw.bin"

            [interface]
            name = "vcan0"
            kind = "vcan"
            use_sudo = false

            [updater]
            program = "/usr/local/bin/can-update"
            args = []
            working_dir = "/opt/can-update"
            settle_delay_ms = 0

            [handshake]
            timeout_secs = 120
            poll_interval_ms = 500

            [handshake.ack]
            policy = "source_address"
            address = 3

            [schedule]
            interval_secs = 30
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.interface.kind, InterfaceKind::Vcan);
        assert!(!config.interface.use_sudo);
        assert!(config.updater.args.is_empty());
        assert_eq!(
            config.updater.working_dir,
            Some(PathBuf::from("/opt/can-update"))
        );
        assert_eq!(config.handshake.ack, AckPolicy::SourceAddress { address: 3 });
        assert_eq!(config.handshake.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.schedule.interval_secs, 30);
    }

    #[test]
    fn test_shipped_example_config() {
        let config =
            AgentConfig::from_toml(include_str!("../../../config/canupd.toml")).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.handshake.timeout_secs, 120);
        assert_eq!(
            config.handshake.ack,
            AckPolicy::PgnGroup {
                group: 0x18FF14FB
            }
        );
    }

    #[test]
    fn test_channel_defaults_to_interface_socket() {
        let mut config = AgentConfig::default();
        config.interface.name = "can1".to_string();

        match config.channel() {
            ChannelConfig::SocketCan(cfg) => assert_eq!(cfg.interface, "can1"),
            other => panic!("Expected SocketCan, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_override() {
        let config = AgentConfig::from_toml(
            r#"
            [artifact]
            url = "https://example.com/fw.bin"

            [channel]
            type = "mock"
            "#,
        )
        .unwrap();

        assert!(matches!(config.channel(), ChannelConfig::Mock(_)));
    }

    #[test]
    fn test_validation_errors() {
        let config = AgentConfig::default();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.artifact.url = "https://example.com/fw.bin".to_string();
        config.schedule.interval_secs = 0;
        assert!(config.validate().is_err());

        config.schedule.interval_secs = 60;
        config.handshake.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_reported() {
        let err = AgentConfig::from_toml("[handshake]\ntimeout_secs = \"ten\"").unwrap_err();
        assert!(matches!(err, AgentError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = AgentConfig::load("/nonexistent/canup.toml").unwrap_err();
        assert!(matches!(err, AgentError::ConfigRead { .. }));
    }
}
