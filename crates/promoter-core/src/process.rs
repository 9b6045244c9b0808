//! External command execution shared by the git and helm collaborators.

use std::process::Stdio;
use std::time::Duration;

use promoter_state::{CollaboratorError, CollaboratorResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Run `command` to completion and return its stdout.
///
/// `label` names the command in errors; it must not contain secrets.
/// Non-zero exit, spawn failure and timeout are all errors.
pub(crate) async fn run_command(
    mut command: Command,
    label: &str,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
) -> CollaboratorResult<String> {
    debug!(command = %label, "running external command");
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        // Close stdin so the child sees EOF.
        drop(pipe);
    }

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| CollaboratorError::Command {
                command: label.to_string(),
                exit_code: -1,
                stderr: format!("timed out after {} seconds", limit.as_secs()),
            })??,
        None => child.wait_with_output().await?,
    };

    if !output.status.success() {
        return Err(CollaboratorError::Command {
            command: label.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
