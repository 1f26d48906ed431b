//! Per-run plain-text log artifact.
//!
//! Unlike the `tracing` diagnostics, this file is meant for the operator: it
//! captures every tool invocation plus the content-tool and editor logs, in
//! order, so a failed run can be reviewed without hunting for files.

use super::process::{ToolCommand, ToolOutput};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, OpenOptions};
use std::io::Write;

#[derive(Debug, Clone)]
pub struct RunLog {
    path: Utf8PathBuf,
}

impl RunLog {
    /// Create (or truncate) the run log at `path`.
    pub fn create(path: impl Into<Utf8PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent))?;
        }
        fs::write(&path, "").with_context(|| format!("Failed to create run log: {}", path))?;
        Ok(Self { path })
    }

    /// Attach to an existing run log without truncating it.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn line(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open run log: {}", self.path))?;
        writeln!(file, "{}", text.trim_end())
            .with_context(|| format!("Failed to write run log: {}", self.path))
    }

    pub fn section(&self, title: &str) -> Result<()> {
        self.line("")?;
        self.line(&format!("==== {} ====", title))
    }

    pub fn command(&self, command: &ToolCommand) -> Result<()> {
        self.line(&format!("> {}", command))
    }

    pub fn output(&self, output: &ToolOutput) -> Result<()> {
        self.line(&format!(
            "exit code {} after {:.1}s",
            output.exit_code,
            output.duration.as_secs_f32()
        ))?;
        for (label, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            if !text.trim().is_empty() {
                self.line(&format!("[{label}]"))?;
                self.line(text)?;
            }
        }
        Ok(())
    }

    /// Append another log file's contents under a header.
    ///
    /// A missing file is noted rather than treated as an error.
    pub fn append_file(&self, label: &str, path: &Utf8Path) -> Result<()> {
        self.line(&format!("---- {} ({}) ----", label, path))?;
        match fs::read(path) {
            Ok(bytes) => self.line(&String::from_utf8_lossy(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.line("(not found)"),
            Err(e) => Err(e).with_context(|| format!("Failed to read log: {}", path)),
        }
    }

    pub fn contents(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read run log: {}", self.path))
    }
}
