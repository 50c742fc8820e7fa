//! CAN interface setup via `ip link`

use async_trait::async_trait;
use canup_core::{InterfaceControl, InterfaceError};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{InterfaceConfig, InterfaceKind};

/// Cycles the interface down, applies the bitrate, and brings it back up
#[derive(Debug, Clone)]
pub struct IpLinkInterface {
    config: InterfaceConfig,
}

impl IpLinkInterface {
    pub fn new(config: &InterfaceConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Command lines run by [`InterfaceControl::bring_up`], in order
    pub fn commands(&self) -> Vec<Vec<String>> {
        let name = self.config.name.as_str();
        let mut steps: Vec<Vec<String>> = vec![vec!["link", "set", "down", name]
            .into_iter()
            .map(String::from)
            .collect()];

        if self.config.kind == InterfaceKind::Can {
            steps.push(vec![
                "link".to_string(),
                "set".to_string(),
                name.to_string(),
                "type".to_string(),
                "can".to_string(),
                "bitrate".to_string(),
                self.config.bitrate.to_string(),
            ]);
        }

        steps.push(
            vec!["link", "set", "up", name]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        steps
            .into_iter()
            .map(|args| {
                let mut line = Vec::with_capacity(args.len() + 2);
                if self.config.use_sudo {
                    line.push("sudo".to_string());
                }
                line.push("ip".to_string());
                line.extend(args);
                line
            })
            .collect()
    }
}

#[async_trait]
impl InterfaceControl for IpLinkInterface {
    async fn bring_up(&self) -> Result<(), InterfaceError> {
        if !self.config.manage {
            debug!(interface = %self.config.name, "Interface managed externally, skipping setup");
            return Ok(());
        }

        for line in self.commands() {
            run_step(&line).await?;
        }

        info!(
            interface = %self.config.name,
            bitrate = self.config.bitrate,
            "CAN interface configured successfully"
        );
        Ok(())
    }
}

async fn run_step(line: &[String]) -> Result<(), InterfaceError> {
    let command = line.join(" ");
    let Some((program, args)) = line.split_first() else {
        return Ok(());
    };

    debug!(%command, "Running interface setup step");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| InterfaceError::Spawn {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(InterfaceError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(iface: &IpLinkInterface) -> Vec<String> {
        iface.commands().iter().map(|l| l.join(" ")).collect()
    }

    #[test]
    fn test_can_setup_sequence() {
        let iface = IpLinkInterface::new(&InterfaceConfig::default());
        assert_eq!(
            lines(&iface),
            vec![
                "sudo ip link set down can0",
                "sudo ip link set can0 type can bitrate 250000",
                "sudo ip link set up can0",
            ]
        );
    }

    #[test]
    fn test_vcan_skips_bitrate() {
        let iface = IpLinkInterface::new(&InterfaceConfig {
            name: "vcan0".to_string(),
            kind: InterfaceKind::Vcan,
            use_sudo: false,
            ..InterfaceConfig::default()
        });
        assert_eq!(
            lines(&iface),
            vec!["ip link set down vcan0", "ip link set up vcan0"]
        );
    }

    #[tokio::test]
    async fn test_unmanaged_interface_is_ready() {
        let iface = IpLinkInterface::new(&InterfaceConfig {
            manage: false,
            name: "does-not-exist0".to_string(),
            ..InterfaceConfig::default()
        });
        assert!(iface.bring_up().await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_step_reports_command() {
        let err = run_step(&["false".to_string()]).await.unwrap_err();
        match err {
            InterfaceError::CommandFailed { command, .. } => assert_eq!(command, "false"),
            other => panic!("Expected CommandFailed, got {:?}", other),
        }

        let err = run_step(&["/nonexistent/ip".to_string()]).await.unwrap_err();
        assert!(matches!(err, InterfaceError::Spawn { .. }));
    }
}
