//! External process plumbing shared by every tool runner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// A fully built command line for one external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<Utf8PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Route the command through Mod Organizer 2's virtual filesystem:
    /// `ModOrganizer.exe run "<exe>" -a "<args>"`.
    pub fn via_mo2(self, mo2_exe: &Utf8Path) -> Self {
        let mut wrapped = ToolCommand::new(mo2_exe)
            .arg("run")
            .arg(self.program.as_str());
        if !self.args.is_empty() {
            wrapped = wrapped.arg("-a").arg(self.args.join(" "));
        }
        wrapped.working_dir = self.working_dir;
        wrapped
    }

    /// Wrap in MO2 when `mo2_exe` is set, otherwise return unchanged.
    pub fn maybe_via_mo2(self, mo2_exe: Option<&Utf8Path>) -> Self {
        match mo2_exe {
            Some(mo2) => self.via_mo2(mo2),
            None => self,
        }
    }

    /// Value of the first argument starting with `prefix`, prefix stripped.
    pub fn arg_value(&self, prefix: &str) -> Option<&str> {
        self.args.iter().find_map(|a| a.strip_prefix(prefix))
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// What a finished tool run left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `-1` when the process was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches external programs.
///
/// `run` waits for the process to exit; `spawn` returns as soon as it has
/// started (used for the editor, whose window never exits on its own).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;
    async fn spawn(&self, command: &ToolCommand) -> Result<()>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &ToolCommand) -> Command {
        let mut cmd = Command::new(command.program.as_std_path());
        cmd.args(&command.args);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        tracing::info!("Executing: {}", command);
        let start = Instant::now();

        let output = Self::build(command)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", command.program))?;

        let duration = start.elapsed();
        let exit_code = output.status.code().unwrap_or(-1);

        tracing::info!(
            "{} completed in {:.2}s with exit code {}",
            command.program.file_name().unwrap_or(command.program.as_str()),
            duration.as_secs_f32(),
            exit_code
        );

        Ok(ToolOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        })
    }

    async fn spawn(&self, command: &ToolCommand) -> Result<()> {
        tracing::info!("Launching: {}", command);

        let mut child = Self::build(command)
            .spawn()
            .with_context(|| format!("Failed to launch {}", command.program))?;

        // Reap in the background; the caller tracks completion through the filesystem
        let program = command.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("{} exited with {}", program, status),
                Err(e) => tracing::warn!("Failed to wait for {}: {}", program, e),
            }
        });

        Ok(())
    }
}
