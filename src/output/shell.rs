use tokio::process::Command;
use tracing::{debug, info};

use super::{OutputDevice, OutputSwitcher};
use crate::error::OutputError;

pub const DEFAULT_SWITCH_COMMAND: &str = "SwitchAudioSource";

/// Drives `SwitchAudioSource -t output`
pub struct ShellSwitcher {
    command: String,
}

impl ShellSwitcher {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, OutputError> {
        debug!("Running {} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .await
            .map_err(|e| OutputError::Unavailable(format!("{}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(OutputError::Query(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn current(&self) -> Result<String, OutputError> {
        let out = self.run(&["-c", "-t", "output"]).await?;
        Ok(parse_device_lines(&out).into_iter().next().unwrap_or_default())
    }
}

/// One device name per line; older releases append " (output)"
pub fn parse_device_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim())
        .map(|line| line.strip_suffix("(output)").unwrap_or(line).trim_end())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait::async_trait]
impl OutputSwitcher for ShellSwitcher {
    async fn list_output_devices(&self) -> Result<Vec<OutputDevice>, OutputError> {
        let names = parse_device_lines(&self.run(&["-a", "-t", "output"]).await?);
        let current = self.current().await?;

        Ok(names
            .into_iter()
            .map(|name| OutputDevice {
                selected: name == current,
                name,
            })
            .collect())
    }

    async fn set_output_device(&self, name: &str) -> Result<bool, OutputError> {
        let known = self
            .list_output_devices()
            .await?
            .iter()
            .any(|device| device.name == name);
        if !known {
            return Ok(false);
        }

        self.run(&["-t", "output", "-s", name]).await?;
        info!("Default output switched to {}", name);
        Ok(true)
    }

    async fn probe(&self) -> bool {
        self.current().await.is_ok()
    }

    fn name(&self) -> &str {
        "shell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_names() {
        let out = "MacBook Pro Speakers\nBlackHole 2ch\n\n";
        assert_eq!(
            parse_device_lines(out),
            vec!["MacBook Pro Speakers", "BlackHole 2ch"]
        );
    }

    #[test]
    fn test_parse_strips_type_suffix() {
        let out = "External Headphones (output)\r\nMulti-Output Device (output)\n";
        assert_eq!(
            parse_device_lines(out),
            vec!["External Headphones", "Multi-Output Device"]
        );
    }

    #[tokio::test]
    async fn test_missing_command_fails_probe() {
        let switcher = ShellSwitcher::new("rex-recorder-no-such-command");
        assert!(!switcher.probe().await);
        assert!(matches!(
            switcher.list_output_devices().await,
            Err(OutputError::Unavailable(_))
        ));
    }
}
