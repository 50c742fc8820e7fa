//! Periodic update loop

use std::sync::Arc;
use std::time::Duration;

use canup_core::{create_opener, CycleOutcome, HandshakeOutcome, StagedArtifact, UpdateGate};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactSource, ArtifactWatcher};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::interface::IpLinkInterface;
use crate::updater::CommandUpdater;

/// Checks for a new artifact on every tick and runs the update gate
///
/// An artifact whose cycle failed stays pending and is offered to the gate
/// again on later ticks until it is delivered or replaced by a newer one.
pub struct Agent {
    source: Arc<dyn ArtifactSource>,
    gate: UpdateGate,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
    pending: Option<StagedArtifact>,
}

impl Agent {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        gate: UpdateGate,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            gate,
            interval,
            shutdown,
            pending: None,
        }
    }

    /// Wire up the production collaborators from configuration
    pub fn from_config(config: &AgentConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        config.validate()?;

        let source = Arc::new(ArtifactWatcher::new(&config.artifact)?);
        let opener = create_opener(&config.channel())?;
        let interface = Arc::new(IpLinkInterface::new(&config.interface));
        let updater = Arc::new(CommandUpdater::new(&config.updater));

        let gate = UpdateGate::new(config.handshake.clone(), opener, interface, updater)
            .with_shutdown(shutdown.clone());

        Ok(Self::new(
            source,
            gate,
            config.schedule.interval(),
            shutdown,
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Artifact staged by an earlier tick but not yet delivered
    pub fn pending(&self) -> Option<&StagedArtifact> {
        self.pending.as_ref()
    }

    /// One check-and-update pass
    pub async fn run_once(&mut self) -> CycleOutcome {
        let staged = match self.source.check().await {
            Ok(Some(fresh)) => Some(fresh),
            Ok(None) => self.pending.take(),
            Err(e) => {
                warn!(error = %e, "Artifact check failed");
                self.pending.take()
            }
        };

        let outcome = self.gate.run_cycle(staged.as_ref()).await;
        match &outcome {
            CycleOutcome::NoActionNeeded => {}
            CycleOutcome::Completed => info!("Firmware update delivered"),
            CycleOutcome::HandshakeFailed(HandshakeOutcome::Cancelled) => {
                info!("Update cycle cancelled");
                self.pending = staged;
            }
            other => {
                error!(outcome = %other, "Update cycle failed, retrying on next tick");
                self.pending = staged;
            }
        }
        outcome
    }

    /// Run until shutdown is signalled
    ///
    /// The first pass starts immediately. A cycle that is already running
    /// finishes before the loop exits, except that a pending handshake
    /// wait is cut short.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Update agent started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Update agent stopped");
    }
}
