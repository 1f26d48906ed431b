//! Creation Kit runner.
//!
//! The Creation Kit's exit code is unreliable, so the outcome of each
//! operation is inferred from the filesystem: the expected artifact must exist
//! and the tool log must not contain a known fatal signature. A nonzero exit
//! with good output is only a warning.

use super::dll_guard::with_dlls_disabled;
use super::preconditions::{directory_has_files, file_exists};
use super::process::{ProcessRunner, ToolCommand};
use super::run_log::RunLog;
use crate::models::{BuildMode, OutputRoots, PluginIdentity, RunConfig, StepOutcome};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// Handle table exhaustion; fatal for every operation.
pub const HANDLE_LIMIT_SIGNATURE: &str = "OUT OF HANDLE ARRAY ENTRIES";

/// Previs generation gave up on one or more cells.
pub const PREVIS_INCOMPLETE_SIGNATURE: &str = "visibility task did not complete";

/// What a successful content-tool operation leaves on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedArtifact {
    File(Utf8PathBuf),
    /// At least one file matching `pattern` somewhere under `dir`.
    FilesIn { dir: Utf8PathBuf, pattern: String },
}

impl ExpectedArtifact {
    /// True if the artifact exists under any of `roots`.
    pub fn is_present(&self, roots: &OutputRoots) -> bool {
        match self {
            ExpectedArtifact::File(path) => roots.candidates(path).iter().any(|p| file_exists(p)),
            ExpectedArtifact::FilesIn { dir, pattern } => roots
                .candidates(dir)
                .iter()
                .any(|d| directory_has_files(d, pattern)),
        }
    }
}

impl fmt::Display for ExpectedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedArtifact::File(path) => write!(f, "{}", path),
            ExpectedArtifact::FilesIn { dir, pattern } => write!(f, "{} in {}", pattern, dir),
        }
    }
}

/// One parameterized content-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentToolOperation {
    pub name: &'static str,
    pub args: Vec<String>,
    pub expected: ExpectedArtifact,
    pub fatal_signatures: Vec<&'static str>,
}

impl ContentToolOperation {
    /// `-GeneratePrecombined:<plugin> clean|filtered all`
    pub fn generate_precombined(plugin: &PluginIdentity, mode: BuildMode, precombined_dir: &Utf8Path) -> Self {
        Self {
            name: "Generate Precombined",
            args: vec![
                format!("-GeneratePrecombined:{}", plugin.file_name()),
                mode.precombine_qualifier().to_string(),
                "all".to_string(),
            ],
            expected: ExpectedArtifact::FilesIn {
                dir: precombined_dir.to_path_buf(),
                pattern: "*.nif".to_string(),
            },
            fatal_signatures: vec![HANDLE_LIMIT_SIGNATURE],
        }
    }

    /// `-CompressPSG:<plugin>`
    pub fn compress_geometry(plugin: &PluginIdentity, csg_path: &Utf8Path) -> Self {
        Self {
            name: "Compress PSG",
            args: vec![format!("-CompressPSG:{}", plugin.file_name())],
            expected: ExpectedArtifact::File(csg_path.to_path_buf()),
            fatal_signatures: vec![HANDLE_LIMIT_SIGNATURE],
        }
    }

    /// `-BuildCDX:<plugin>`
    pub fn build_index(plugin: &PluginIdentity, cdx_path: &Utf8Path) -> Self {
        Self {
            name: "Build CDX",
            args: vec![format!("-BuildCDX:{}", plugin.file_name())],
            expected: ExpectedArtifact::File(cdx_path.to_path_buf()),
            fatal_signatures: vec![HANDLE_LIMIT_SIGNATURE],
        }
    }

    /// `-GeneratePreVisData:<plugin> clean all`
    pub fn generate_previs(plugin: &PluginIdentity, vis_dir: &Utf8Path) -> Self {
        Self {
            name: "Generate Previs",
            args: vec![
                format!("-GeneratePreVisData:{}", plugin.file_name()),
                "clean".to_string(),
                "all".to_string(),
            ],
            expected: ExpectedArtifact::FilesIn {
                dir: vis_dir.to_path_buf(),
                pattern: "*.uvd".to_string(),
            },
            fatal_signatures: vec![HANDLE_LIMIT_SIGNATURE, PREVIS_INCOMPLETE_SIGNATURE],
        }
    }
}

/// Decide the outcome of a finished operation.
///
/// Checked in order: missing artifact, fatal log signature, nonzero exit.
pub fn classify(
    operation: &ContentToolOperation,
    exit_code: i32,
    artifact_present: bool,
    tool_log: Option<&str>,
) -> StepOutcome {
    if !artifact_present {
        return StepOutcome::fatal(format!(
            "Creation Kit did not produce {}",
            operation.expected
        ));
    }

    if let Some(log) = tool_log {
        if let Some(signature) = operation
            .fatal_signatures
            .iter()
            .find(|sig| log.contains(**sig))
        {
            return StepOutcome::fatal(format!("'{}' found in Creation Kit log", signature));
        }
    }

    if exit_code != 0 {
        return StepOutcome::warning(format!(
            "Creation Kit exited with code {} but produced expected output",
            exit_code
        ));
    }

    StepOutcome::Success
}

/// Runs [`ContentToolOperation`]s with DLLs disabled and classifies them.
pub struct ContentToolRunner {
    process: Arc<dyn ProcessRunner>,
    run_log: RunLog,
    exe: Utf8PathBuf,
    working_dir: Utf8PathBuf,
    tool_dir: Utf8PathBuf,
    mo2: Option<Utf8PathBuf>,
    tool_log: Option<Utf8PathBuf>,
    disabled_dlls: Vec<String>,
    settle_delay: Duration,
    output_roots: OutputRoots,
}

impl ContentToolRunner {
    pub fn new(config: &RunConfig, process: Arc<dyn ProcessRunner>, run_log: RunLog) -> Self {
        Self {
            process,
            run_log,
            exe: config.tools.creation_kit.clone(),
            working_dir: config.game_dir.clone(),
            tool_dir: config.content_tool_dir(),
            mo2: config.tools.mo2.clone(),
            tool_log: config.logs.content_tool_log.clone(),
            disabled_dlls: config.disabled_dlls.clone(),
            settle_delay: config.timings.settle_delay,
            output_roots: config.output_roots(),
        }
    }

    pub fn command(&self, operation: &ContentToolOperation) -> ToolCommand {
        ToolCommand::new(self.exe.clone())
            .args(operation.args.iter().cloned())
            .current_dir(self.working_dir.clone())
            .maybe_via_mo2(self.mo2.as_deref())
    }

    /// Run `operation` and report how it went.
    ///
    /// `Err` is reserved for plumbing failures (log not deletable, process
    /// not launchable, DLL rename failed).
    pub async fn run(&self, operation: &ContentToolOperation) -> Result<StepOutcome> {
        tracing::info!("Running Creation Kit: {}", operation.name);
        self.remove_stale_log()?;

        let command = self.command(operation);
        self.run_log.section(&format!("Creation Kit: {}", operation.name))?;
        self.run_log.command(&command)?;

        let output = with_dlls_disabled(&self.tool_dir, &self.disabled_dlls, || {
            self.process.run(&command)
        })
        .await?;
        self.run_log.output(&output)?;

        if !self.settle_delay.is_zero() {
            tracing::info!(
                "Waiting {:.0}s for the filesystem to settle",
                self.settle_delay.as_secs_f32()
            );
            self.run_log.line(&format!(
                "settle delay {:.0}s",
                self.settle_delay.as_secs_f32()
            ))?;
            tokio::time::sleep(self.settle_delay).await;
        }

        let tool_log = self.read_tool_log()?;
        let outcome = classify(
            operation,
            output.exit_code,
            operation.expected.is_present(&self.output_roots),
            tool_log.as_deref(),
        );

        match &outcome {
            StepOutcome::Success => tracing::info!("Creation Kit {} completed", operation.name),
            StepOutcome::Warning(msg) => tracing::warn!("{}: {}", operation.name, msg),
            StepOutcome::Fatal(msg) => tracing::error!("{}: {}", operation.name, msg),
        }
        self.run_log.line(&format!("{}: {}", operation.name, outcome))?;

        Ok(outcome)
    }

    fn remove_stale_log(&self) -> Result<()> {
        let Some(log) = &self.tool_log else {
            return Ok(());
        };
        if log.exists() {
            fs::remove_file(log).with_context(|| {
                format!(
                    "Failed to delete old Creation Kit log: {} (is it open in another program?)",
                    log
                )
            })?;
            tracing::debug!("Deleted old Creation Kit log: {}", log);
        }
        Ok(())
    }

    fn read_tool_log(&self) -> Result<Option<String>> {
        let Some(log) = &self.tool_log else {
            tracing::debug!("No Creation Kit log configured, skipping signature scan");
            return Ok(None);
        };
        if !log.exists() {
            tracing::warn!("Creation Kit log not created: {}", log);
            return Ok(None);
        }

        self.run_log.append_file("Creation Kit log", log)?;
        let bytes = fs::read(log).with_context(|| format!("Failed to read Creation Kit log: {}", log))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
