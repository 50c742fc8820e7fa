//! External updater invocation

use async_trait::async_trait;
use canup_core::{StagedArtifact, UpdateError, Updater};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::UpdaterConfig;

/// Runs `program args... <artifact path>` and waits for it to exit
#[derive(Debug, Clone)]
pub struct CommandUpdater {
    config: UpdaterConfig,
}

impl CommandUpdater {
    pub fn new(config: &UpdaterConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn command(&self, artifact: &StagedArtifact) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args).arg(artifact.path());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl Updater for CommandUpdater {
    async fn invoke(&self, artifact: &StagedArtifact) -> Result<(), UpdateError> {
        if !tokio::fs::try_exists(artifact.path()).await.unwrap_or(false) {
            return Err(UpdateError::ArtifactMissing(
                artifact.path().display().to_string(),
            ));
        }

        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            debug!(delay_ms = self.config.settle_delay_ms, "Waiting before starting updater");
            tokio::time::sleep(delay).await;
        }

        info!(
            program = %self.config.program,
            artifact = %artifact.path().display(),
            "Launching update command"
        );

        let status = self
            .command(artifact)
            .status()
            .await
            .map_err(|e| UpdateError::Spawn {
                program: self.config.program.clone(),
                message: e.to_string(),
            })?;

        if !status.success() {
            return Err(UpdateError::ExitStatus {
                status: status.to_string(),
            });
        }

        info!(program = %self.config.program, "Update command finished");
        Ok(())
    }
}
