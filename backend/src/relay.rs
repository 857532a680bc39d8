use std::{process::Stdio, time::Duration};

use common::req::LedCommand;
use log::{info, warn};
use tokio::process::Command;

use crate::config::RelayConfig;

pub const NO_OUTPUT: &str =
    "Meshtastic CLI did not return any output. If this persists, check the server log.";

/// Program and argv of one relay invocation. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Succeeded { output: String },
    FailedToStart { error: String },
    NonZeroExit { code: Option<i32>, output: String },
    TimedOut { after: Duration },
}

impl RelayOutcome {
    /// Merged stdout/stderr, if the process ran and printed anything.
    pub fn output(&self) -> Option<&str> {
        match self {
            RelayOutcome::Succeeded { output } | RelayOutcome::NonZeroExit { output, .. }
                if !output.is_empty() =>
            {
                Some(output.as_str())
            }
            _ => None,
        }
    }

    /// Text for the status panel of the dashboard.
    pub fn display_text(&self) -> String {
        if let Some(output) = self.output() {
            return output.to_owned();
        }

        match self {
            RelayOutcome::FailedToStart { error } => {
                format!("Could not start the Meshtastic CLI: {error}")
            }
            RelayOutcome::TimedOut { after } => format!(
                "Meshtastic CLI did not finish within {} s and was stopped.",
                after.as_secs_f32()
            ),
            _ => NO_OUTPUT.to_owned(),
        }
    }
}

/// What the dashboard shows after an LED form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub payload_sent: String,
    pub outcome: RelayOutcome,
}

impl CommandResult {
    pub fn relay_output(&self) -> Option<&str> {
        self.outcome.output()
    }
}

#[derive(Debug, Clone)]
pub struct Relay {
    executable: String,
    port: String,
    timeout: Duration,
}

impl Relay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            port: config.port.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn command_for(&self, payload: &str) -> RelayCommand {
        RelayCommand {
            program: self.executable.clone(),
            args: vec![
                "--port".to_owned(),
                self.port.clone(),
                "--sendtext".to_owned(),
                payload.to_owned(),
            ],
        }
    }

    pub async fn send(&self, command: &LedCommand) -> CommandResult {
        let payload = command.to_payload();
        info!("relaying {payload} via {} on {}", self.executable, self.port);

        let outcome = execute(&self.command_for(&payload), self.timeout).await;
        match &outcome {
            RelayOutcome::Succeeded { .. } => info!("relay finished"),
            RelayOutcome::FailedToStart { error } => warn!("relay did not start: {error}"),
            RelayOutcome::NonZeroExit { code, .. } => warn!("relay exited with {code:?}"),
            RelayOutcome::TimedOut { after } => warn!("relay killed after {after:?}"),
        }

        CommandResult {
            payload_sent: payload,
            outcome,
        }
    }
}

/// Runs `command` to completion, killing it if it outlives `timeout`.
/// stdout comes first in the merged output, then stderr.
pub async fn execute(command: &RelayCommand, timeout: Duration) -> RelayOutcome {
    let run = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, run).await {
        Err(_) => RelayOutcome::TimedOut { after: timeout },
        Ok(Err(e)) => RelayOutcome::FailedToStart {
            error: e.to_string(),
        },
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));

            if output.status.success() {
                RelayOutcome::Succeeded { output: text }
            } else {
                RelayOutcome::NonZeroExit {
                    code: output.status.code(),
                    output: text,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(executable: &str) -> Relay {
        Relay::new(&RelayConfig {
            executable: executable.to_owned(),
            port: "/dev/ttyUSB0".to_owned(),
            timeout_secs: 5,
        })
    }

    #[test]
    fn builds_argv_without_shell() {
        let cmd = relay("/home/pi/meshtastic/bin/meshtastic").command_for(r#"{"led1":true,"led2":false}"#);
        assert_eq!(cmd.program, "/home/pi/meshtastic/bin/meshtastic");
        assert_eq!(
            cmd.args,
            ["--port", "/dev/ttyUSB0", "--sendtext", r#"{"led1":true,"led2":false}"#]
        );
    }

    #[tokio::test]
    async fn captures_output_of_successful_run() {
        let result = relay("echo")
            .send(&LedCommand {
                led1: true,
                led2: false,
            })
            .await;

        assert_eq!(result.payload_sent, r#"{"led1":true,"led2":false}"#);
        assert_eq!(
            result.outcome,
            RelayOutcome::Succeeded {
                output: "--port /dev/ttyUSB0 --sendtext {\"led1\":true,\"led2\":false}\n".to_owned()
            }
        );
        assert!(result.relay_output().unwrap().contains("--sendtext"));
    }

    #[tokio::test]
    async fn arguments_are_not_interpreted() {
        let cmd = RelayCommand {
            program: "echo".to_owned(),
            args: vec!["$(id)".to_owned(), ";".to_owned(), "`ls`".to_owned()],
        };
        let outcome = execute(&cmd, Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            RelayOutcome::Succeeded {
                output: "$(id) ; `ls`\n".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn silent_failure_shows_placeholder() {
        let result = relay("false").send(&LedCommand::default()).await;

        assert!(matches!(
            result.outcome,
            RelayOutcome::NonZeroExit { code: Some(1), .. }
        ));
        assert_eq!(result.relay_output(), None);
        assert_eq!(result.outcome.display_text(), NO_OUTPUT);
    }

    #[test]
    fn whitespace_output_is_still_output() {
        let outcome = RelayOutcome::Succeeded {
            output: "\n".to_owned(),
        };
        assert_eq!(outcome.output(), Some("\n"));
        assert_eq!(outcome.display_text(), "\n");

        let silent = RelayOutcome::Succeeded {
            output: String::new(),
        };
        assert_eq!(silent.output(), None);
        assert_eq!(silent.display_text(), NO_OUTPUT);
    }

    #[tokio::test]
    async fn missing_executable_fails_to_start() {
        let result = relay("/nonexistent/meshtastic").send(&LedCommand::default()).await;

        assert!(matches!(result.outcome, RelayOutcome::FailedToStart { .. }));
        assert!(result
            .outcome
            .display_text()
            .starts_with("Could not start the Meshtastic CLI"));
    }

    #[tokio::test]
    async fn slow_relay_is_stopped() {
        let cmd = RelayCommand {
            program: "sleep".to_owned(),
            args: vec!["5".to_owned()],
        };
        let outcome = execute(&cmd, Duration::from_millis(100)).await;
        assert_eq!(
            outcome,
            RelayOutcome::TimedOut {
                after: Duration::from_millis(100)
            }
        );
    }
}
