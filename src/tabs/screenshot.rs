//! Screenshot capture through a user-configured shell command.
//!
//! The command must write exactly one encoded image to stdout
//! (e.g. `grim -` on Wayland, `import -window root png:-` on X11).

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ScreenshotCommand {
    command: String,
    timeout: Duration,
}

impl ScreenshotCommand {
    pub fn new(command: String) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn disabled() -> Self {
        Self::new(String::new())
    }

    pub fn is_enabled(&self) -> bool {
        !self.command.trim().is_empty()
    }

    pub async fn capture(&self) -> Result<Vec<u8>> {
        if !self.is_enabled() {
            bail!("No screenshot command configured");
        }

        debug!("Running screenshot command: {}", self.command);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow!(
                    "Screenshot command timed out after {}s",
                    self.timeout.as_secs()
                )
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Screenshot command exited with status {}: {}",
                output.status,
                stderr.trim()
            );
            bail!("Screenshot command failed with status {}", output.status);
        }

        if output.stdout.is_empty() {
            bail!("Screenshot command produced no output");
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_command_fails() {
        let command = ScreenshotCommand::disabled();
        assert!(!command.is_enabled());
        assert!(command.capture().await.is_err());
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let command = ScreenshotCommand::new("printf 'PNGDATA'".to_string());
        let bytes = command.capture().await.unwrap();
        assert_eq!(bytes, b"PNGDATA");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let command = ScreenshotCommand::new("exit 3".to_string());
        assert!(command.capture().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_output_fails() {
        let command = ScreenshotCommand::new("true".to_string());
        assert!(command.capture().await.is_err());
    }
}
