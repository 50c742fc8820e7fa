//! canup-agent - the update daemon's collaborators
//!
//! Provides the pieces around the [`canup_core::UpdateGate`]:
//!
//! - [`ArtifactWatcher`]: polls a URL and stages newer artifacts
//! - [`IpLinkInterface`]: configures the CAN interface with `ip link`
//! - [`CommandUpdater`]: launches the external update executable
//! - [`Agent`]: runs check-and-update on a fixed interval
//!
//! # Example
//!
//! ```ignore
//! use canup_agent::{Agent, AgentConfig};
//!
//! let config = AgentConfig::load("/etc/canupd.toml")?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! Agent::from_config(&config, shutdown_rx)?.run().await;
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod interface;
pub mod scheduler;
pub mod updater;

pub use artifact::{ArtifactSource, ArtifactWatcher};
pub use config::{
    AgentConfig, ArtifactConfig, InterfaceConfig, InterfaceKind, ScheduleConfig, UpdaterConfig,
};
pub use error::{AgentError, ArtifactError, Result};
pub use interface::IpLinkInterface;
pub use scheduler::Agent;
pub use updater::CommandUpdater;
