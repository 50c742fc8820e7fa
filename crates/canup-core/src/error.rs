//! Error types for the update cycle collaborators

use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors bringing the CAN interface to a ready state
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    /// Setup command could not be started
    #[error("Failed to run `{command}`: {message}")]
    Spawn { command: String, message: String },

    /// Setup command ran but reported failure
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Errors invoking the external updater
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Updater executable could not be started
    #[error("Failed to start updater `{program}`: {message}")]
    Spawn { program: String, message: String },

    /// Updater ran and exited unsuccessfully
    #[error("Updater exited with {status}")]
    ExitStatus { status: String },

    /// Staged artifact vanished before the updater ran
    #[error("Artifact missing: {0}")]
    ArtifactMissing(String),
}
