use std::process::Stdio;

use async_trait::async_trait;
use log::{error, info};
use tokio::process::Command;

use crate::error::ReloadError;

/// Tells the running fastd daemon to pick up the production peer set.
#[async_trait]
pub trait DaemonReloader: Send + Sync {
    async fn reload(&self) -> Result<(), ReloadError>;
}

/// Runs e.g. `sudo systemctl reload fastd@<site>.service`.
pub struct SystemctlReloader {
    command: Vec<String>,
    unit: String,
}

impl SystemctlReloader {
    pub fn new(command: Vec<String>, unit: String) -> Self {
        Self { command, unit }
    }

    fn argv(&self) -> Vec<&str> {
        self.command
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.unit.as_str()))
            .collect()
    }
}

#[async_trait]
impl DaemonReloader for SystemctlReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        let argv = self.argv();
        let command = argv.join(" ");
        if self.command.is_empty() {
            return Err(ReloadError::Failed {
                command,
                status: "not run".into(),
                stderr: "empty reload command".into(),
            });
        }
        let (program, args) = (argv[0], &argv[1..]);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ReloadError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("{} failed ({}): {}", command, output.status, stderr);
            return Err(ReloadError::Failed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        info!("reloaded {}", self.unit);
        Ok(())
    }
}
