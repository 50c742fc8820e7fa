//! Update gate
//!
//! Sequences one update cycle and only lets each stage run if the previous
//! one succeeded:
//!
//! 1. a fresh artifact is staged
//! 2. the CAN interface comes up
//! 3. the device acknowledges the trigger frame
//! 4. the external updater runs against the staged artifact
//!
//! A failed stage ends the cycle with a [`CycleOutcome`]; nothing is retried
//! here. The caller's next periodic tick is the retry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::channel::ChannelOpener;
use crate::config::HandshakeSettings;
use crate::error::{InterfaceError, UpdateError};
use crate::handshake::{HandshakeConfig, HandshakeController, HandshakeOutcome};

/// Artifact downloaded and ready to be handed to the updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub path: PathBuf,
    /// Remote modification time, when the server reported one
    pub last_modified: Option<DateTime<Utc>>,
}

impl StagedArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Brings the CAN interface to a ready state
#[async_trait]
pub trait InterfaceControl: Send + Sync {
    async fn bring_up(&self) -> Result<(), InterfaceError>;
}

/// Launches the external update executable
#[async_trait]
pub trait Updater: Send + Sync {
    async fn invoke(&self, artifact: &StagedArtifact) -> Result<(), UpdateError>;
}

/// Result of one [`UpdateGate::run_cycle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No fresh artifact, nothing to do
    NoActionNeeded,
    InterfaceSetupFailed(String),
    /// Handshake ended in anything but `Acknowledged`
    HandshakeFailed(HandshakeOutcome),
    UpdateInvocationFailed(UpdateError),
    Completed,
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed)
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::NoActionNeeded => write!(f, "no action needed"),
            CycleOutcome::InterfaceSetupFailed(e) => write!(f, "interface setup failed: {}", e),
            CycleOutcome::HandshakeFailed(o) => write!(f, "handshake failed: {}", o),
            CycleOutcome::UpdateInvocationFailed(e) => write!(f, "update invocation failed: {}", e),
            CycleOutcome::Completed => write!(f, "update completed"),
        }
    }
}

/// Gates the updater on interface readiness and a CAN handshake
pub struct UpdateGate {
    settings: HandshakeSettings,
    opener: Arc<dyn ChannelOpener>,
    interface: Arc<dyn InterfaceControl>,
    updater: Arc<dyn Updater>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl UpdateGate {
    pub fn new(
        settings: HandshakeSettings,
        opener: Arc<dyn ChannelOpener>,
        interface: Arc<dyn InterfaceControl>,
        updater: Arc<dyn Updater>,
    ) -> Self {
        Self {
            settings,
            opener,
            interface,
            updater,
            shutdown: None,
        }
    }

    /// Let a shutdown request cut the handshake wait short
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn settings(&self) -> &HandshakeSettings {
        &self.settings
    }

    /// Run one update cycle
    ///
    /// `staged` is `None` when no new artifact is available.
    pub async fn run_cycle(&self, staged: Option<&StagedArtifact>) -> CycleOutcome {
        let Some(artifact) = staged else {
            return CycleOutcome::NoActionNeeded;
        };

        info!(artifact = %artifact.path.display(), "New artifact staged, starting update cycle");

        if let Err(e) = self.interface.bring_up().await {
            error!(error = %e, "Failed to set up CAN interface");
            return CycleOutcome::InterfaceSetupFailed(e.to_string());
        }

        let outcome = self.handshake().await;
        if !outcome.is_acknowledged() {
            error!(%outcome, "Did not receive a valid acknowledgement");
            return CycleOutcome::HandshakeFailed(outcome);
        }

        match self.updater.invoke(artifact).await {
            Ok(()) => {
                info!(artifact = %artifact.path.display(), "Update cycle completed");
                CycleOutcome::Completed
            }
            Err(e) => {
                error!(error = %e, "Failed to run update command");
                CycleOutcome::UpdateInvocationFailed(e)
            }
        }
    }

    /// Open a channel, run one attempt, release the channel
    async fn handshake(&self) -> HandshakeOutcome {
        let config = HandshakeConfig::from_settings(&self.settings);

        let mut channel = match self.opener.open().await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "Failed to open CAN channel");
                return HandshakeOutcome::Errored(e);
            }
        };

        let mut controller = HandshakeController::new(channel.as_mut());
        if let Some(shutdown) = &self.shutdown {
            controller = controller.with_shutdown(shutdown.clone());
        }
        controller.attempt(&config).await
    }
}
