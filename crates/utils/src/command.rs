//! Helpers for running external programs.

use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Render the argument vector of a command for log and error messages.
pub fn command_to_string(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args = cmd.get_args().map(|a| a.to_string_lossy());
    let words: Vec<_> = std::iter::once(program).chain(args).collect();
    shlex::try_join(words.iter().map(|w| w.as_ref())).unwrap_or_else(|_| words.join(" "))
}

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Execute the child process, capturing stderr. On failure the error
    /// includes the command and the captured stderr.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Execute the child process with inherited stdio; on failure the
    /// error contains the command.
    fn run_inherited_with_cmd_context(&mut self) -> Result<()>;

    /// Execute the child process and return its stdout as a string.
    fn run_get_string(&mut self) -> Result<String>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", command_to_string(self));
        self
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let desc = command_to_string(self);
        let output = self
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Spawning {desc}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{desc} failed ({}): {}", output.status, stderr.trim());
        }
        Ok(())
    }

    fn run_inherited_with_cmd_context(&mut self) -> Result<()> {
        let desc = command_to_string(self);
        let status = self
            .status()
            .with_context(|| format!("Spawning {desc}"))?;
        if !status.success() {
            anyhow::bail!("{desc} failed: {status}");
        }
        Ok(())
    }

    fn run_get_string(&mut self) -> Result<String> {
        let desc = command_to_string(self);
        let output = self
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("Spawning {desc}"))?;
        if !output.status.success() {
            anyhow::bail!("{desc} failed: {}", output.status);
        }
        String::from_utf8(output.stdout).with_context(|| format!("Parsing output of {desc}"))
    }
}
