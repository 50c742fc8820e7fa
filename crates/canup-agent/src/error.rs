//! Agent error types

use std::path::PathBuf;

use canup_core::{ChannelError, ConfigError};
use thiserror::Error;

/// Result type alias for agent setup
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors building or configuring the agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Artifact source: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("CAN channel: {0}")]
    Channel(#[from] ChannelError),
}

/// Errors checking or downloading the remote artifact
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
