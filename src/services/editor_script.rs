//! xEdit (FO4Edit) batch-script runner.
//!
//! xEdit shows a "Module Selection" dialog even with a plugin list and
//! `-autoexit`, and its window stays open after the script ends. The only
//! dependable completion signal is the script log appearing on disk, so the
//! run is: launch detached, confirm the dialog, poll for the log, then close
//! (and kill) the window.

use super::process::{ProcessRunner, ToolCommand};
use super::run_log::RunLog;
use super::window::WindowAutomation;
use crate::models::{PluginIdentity, RunConfig, StepOutcome, Timings};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

/// Step 2: merge `CombinedObjects.esp` into the target plugin.
pub const SCRIPT_MERGE_COMBINED: &str = "Batch_FO4MergeCombinedObjectsAndCheck.pas";

/// Step 7: merge `Previs.esp` into the target plugin.
pub const SCRIPT_MERGE_PREVIS: &str = "Batch_FO4MergePrevisandCleanRefr.pas";

/// Title of the dialog that must be confirmed by keypress.
pub const MODULE_SELECTION_TITLE: &str = "Module Selection";

/// Marker every finished script writes to its log.
pub const COMPLETION_MARKER: &str = "Completed:";

/// Decide the outcome of a script from its log text.
///
/// No completion marker is Fatal. A completion marker next to an error line
/// means the merge partly worked and needs review, so only a Warning.
pub fn classify_script_log(script: &str, log: &str, error_marker: &Regex) -> StepOutcome {
    if !log.contains(COMPLETION_MARKER) {
        return StepOutcome::fatal(format!("script {} failed", script));
    }

    let errors: Vec<&str> = log
        .lines()
        .filter(|line| error_marker.is_match(line))
        .map(str::trim)
        .collect();

    if errors.is_empty() {
        StepOutcome::Success
    } else {
        StepOutcome::warning(format!(
            "script {} completed with {} error line(s), review the merged plugin: {}",
            script,
            errors.len(),
            errors[0]
        ))
    }
}

pub struct EditorScriptRunner {
    process: Arc<dyn ProcessRunner>,
    automation: Arc<dyn WindowAutomation>,
    run_log: RunLog,
    exe: Utf8PathBuf,
    working_dir: Utf8PathBuf,
    mo2: Option<Utf8PathBuf>,
    plugin_list: Utf8PathBuf,
    script_log: Utf8PathBuf,
    timings: Timings,
    /// Matches "Error" as a word, so "Completed: No Errors." stays clean
    error_marker: Regex,
}

impl EditorScriptRunner {
    pub fn new(
        config: &RunConfig,
        process: Arc<dyn ProcessRunner>,
        automation: Arc<dyn WindowAutomation>,
        run_log: RunLog,
    ) -> Self {
        Self {
            process,
            automation,
            run_log,
            exe: config.tools.editor.clone(),
            working_dir: config.game_dir.clone(),
            mo2: config.tools.mo2.clone(),
            plugin_list: config.logs.editor_plugin_list.clone(),
            script_log: config.logs.editor_script_log.clone(),
            timings: config.timings.clone(),
            error_marker: Regex::new(r"\bError\b").expect("Invalid error marker regex"),
        }
    }

    /// Process name used for window lookup and force-kill (exe stem).
    pub fn process_name(&self) -> &str {
        self.exe.file_stem().unwrap_or("FO4Edit")
    }

    pub fn command(&self, script: &str, plugin: &PluginIdentity) -> ToolCommand {
        ToolCommand::new(self.exe.clone())
            .args([
                "-fo4".to_string(),
                "-autoexit".to_string(),
                format!("-P:{}", self.plugin_list),
                format!("-Script:{}", script),
                format!("-Mod:{}", plugin.file_name()),
                format!("-log:{}", self.script_log),
            ])
            .current_dir(self.working_dir.clone())
            .maybe_via_mo2(self.mo2.as_deref())
    }

    /// Run `script` against `plugin`, loading `secondary` alongside it.
    pub async fn run(&self, script: &str, plugin: &PluginIdentity, secondary: &str) -> Result<StepOutcome> {
        tracing::info!("Running xEdit script {} on {}", script, plugin);

        self.prepare(plugin, secondary)?;

        let command = self.command(script, plugin);
        self.run_log.section(&format!("xEdit: {}", script))?;
        self.run_log.command(&command)?;
        self.process.spawn(&command).await?;

        self.confirm_module_selection().await;

        let log_appeared = self.wait_for_script_log().await;

        if log_appeared && !self.timings.editor_settle.is_zero() {
            tracing::debug!(
                "Waiting {:.0}s for xEdit to finish writing",
                self.timings.editor_settle.as_secs_f32()
            );
            tokio::time::sleep(self.timings.editor_settle).await;
        }

        let process_name = self.process_name().to_string();
        if let Err(e) = self.automation.close_or_kill(&process_name).await {
            tracing::warn!("Failed to close xEdit: {:#}", e);
        }

        self.run_log.append_file("xEdit script log", &self.script_log)?;
        self.remove_plugin_list();

        if !log_appeared {
            let outcome = StepOutcome::fatal(format!(
                "script {} failed: no log written to {}",
                script, self.script_log
            ));
            self.run_log.line(&format!("{}: {}", script, outcome))?;
            return Ok(outcome);
        }

        let bytes = fs::read(&self.script_log)
            .with_context(|| format!("Failed to read xEdit log: {}", self.script_log))?;
        let outcome = classify_script_log(script, &String::from_utf8_lossy(&bytes), &self.error_marker);

        match &outcome {
            StepOutcome::Success => tracing::info!("xEdit script {} completed", script),
            StepOutcome::Warning(msg) => tracing::warn!("{}", msg),
            StepOutcome::Fatal(msg) => tracing::error!("{}", msg),
        }
        self.run_log.line(&format!("{}: {}", script, outcome))?;

        Ok(outcome)
    }

    /// Write the plugin list and clear the previous script log.
    fn prepare(&self, plugin: &PluginIdentity, secondary: &str) -> Result<()> {
        if let Some(parent) = self.plugin_list.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent))?;
        }
        let contents = format!("*{}\r\n*{}", plugin.file_name(), secondary);
        fs::write(&self.plugin_list, contents)
            .with_context(|| format!("Failed to write plugin list: {}", self.plugin_list))?;

        if self.script_log.exists() {
            fs::remove_file(&self.script_log)
                .with_context(|| format!("Failed to delete old xEdit log: {}", self.script_log))?;
            tracing::debug!("Deleted old xEdit log: {}", self.script_log);
        }
        Ok(())
    }

    /// Best effort: failure here only means the operator may need to press Enter.
    async fn confirm_module_selection(&self) {
        tokio::time::sleep(self.timings.dialog_delay).await;

        let process_name = self.process_name();
        match self
            .automation
            .locate_window(process_name, MODULE_SELECTION_TITLE)
            .await
        {
            Ok(true) => {
                if let Err(e) = self
                    .automation
                    .send_confirm(process_name, MODULE_SELECTION_TITLE)
                    .await
                {
                    tracing::warn!("Failed to confirm {}: {:#}", MODULE_SELECTION_TITLE, e);
                }
            }
            Ok(false) => tracing::warn!(
                "{} window not found, press Enter in xEdit if it is waiting",
                MODULE_SELECTION_TITLE
            ),
            Err(e) => tracing::warn!("Window lookup failed: {:#}", e),
        }
    }

    /// Poll until the script log exists. Unbounded unless a timeout is configured.
    async fn wait_for_script_log(&self) -> bool {
        let start = Instant::now();
        tracing::info!("Waiting for xEdit script log: {}", self.script_log);

        loop {
            if self.script_log.exists() {
                tracing::debug!("xEdit log appeared after {:.1}s", start.elapsed().as_secs_f32());
                return true;
            }
            if let Some(limit) = self.timings.editor_log_timeout {
                if start.elapsed() >= limit {
                    tracing::error!("xEdit log did not appear within {:.0}s", limit.as_secs_f32());
                    return false;
                }
            }
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    fn remove_plugin_list(&self) {
        if let Err(e) = fs::remove_file(&self.plugin_list) {
            tracing::debug!("Could not remove {}: {}", self.plugin_list, e);
        }
    }

    pub fn script_log(&self) -> &Utf8Path {
        &self.script_log
    }
}
