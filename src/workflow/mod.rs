//! Workflow engine: the eight-step state machine.
//!
//! For each step in order the engine checks the step's filesystem
//! preconditions, runs its body through the tool runners, and advances on
//! Success or Warning. The first Fatal outcome stops the run with every
//! intermediate file left in place, so the operator can fix the cause and
//! resume from that same step.
//!
//! Nothing is persisted between runs. A resume point is simply a start step
//! whose preconditions happen to hold on disk.

pub mod operator;

pub use operator::{AutoOperator, Operator};

use crate::metrics::{MeteredRunner, Metrics};
use crate::models::{
    BuildMode, COMBINED_OBJECTS_PLUGIN, PRECOMBINED_RELPATH, PREVIS_PLUGIN, PluginIdentity,
    RunConfig, SEED_PLUGIN, StepOutcome, VIS_RELPATH, WorkflowStep,
};
use crate::services::preconditions::{count_files, find_plugins_containing};
use crate::services::{
    ArchiveService, ContentToolOperation, ContentToolRunner, EditorScriptRunner, Precondition,
    ProcessRunner, RunLog, SCRIPT_MERGE_COMBINED, SCRIPT_MERGE_PREVIS, Unmet, WindowAutomation,
};
use crate::state::StateManager;
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A recoverable condition the operator declined to resolve. Nothing was run.
    #[error("{step} aborted: {reason}")]
    Aborted { step: WorkflowStep, reason: String },

    #[error("{step} failed: {reason}")]
    Fatal { step: WorkflowStep, reason: String },

    /// The run could not be set up (run log, working directories).
    #[error("Run setup failed: {0:#}")]
    Io(anyhow::Error),
}

impl WorkflowError {
    /// Step to resume from once the cause is fixed.
    pub fn step(&self) -> Option<WorkflowStep> {
        match self {
            WorkflowError::Aborted { step, .. } | WorkflowError::Fatal { step, .. } => Some(*step),
            WorkflowError::Io(_) => None,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plugin: String,
    pub build_mode: BuildMode,
    pub start_step: WorkflowStep,
    /// Executed steps in execution order
    pub outcomes: IndexMap<WorkflowStep, StepOutcome>,
    pub skipped: Vec<(WorkflowStep, String)>,
    /// Final artifacts present in the data directory
    pub artifacts: Vec<Utf8PathBuf>,
    pub run_log: Utf8PathBuf,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn warnings(&self) -> Vec<(WorkflowStep, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(step, outcome)| match outcome {
                StepOutcome::Warning(message) => Some((*step, message.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn executed_steps(&self) -> Vec<WorkflowStep> {
        self.outcomes.keys().copied().collect()
    }
}

/// Runners bound to one run's log.
struct StepRunners {
    content_tool: ContentToolRunner,
    editor: EditorScriptRunner,
    archive: ArchiveService,
    run_log: RunLog,
}

pub struct WorkflowEngine {
    config: RunConfig,
    process: Arc<dyn ProcessRunner>,
    automation: Arc<dyn WindowAutomation>,
    operator: Arc<dyn Operator>,
    state: StateManager,
    metrics: Arc<Metrics>,
}

impl WorkflowEngine {
    pub fn new(
        config: RunConfig,
        process: Arc<dyn ProcessRunner>,
        automation: Arc<dyn WindowAutomation>,
        operator: Arc<dyn Operator>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let process: Arc<dyn ProcessRunner> =
            Arc::new(MeteredRunner::new(process, metrics.clone()));

        Self {
            config,
            process,
            automation,
            operator,
            state: StateManager::new().with_metrics(metrics.clone()),
            metrics,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run from `start_step` through step 8.
    pub async fn run(&self, start_step: WorkflowStep) -> Result<RunReport, WorkflowError> {
        let start = Instant::now();
        let plugin = self.config.plugin.file_name();
        let mode = self.config.build_mode;

        let run_log = RunLog::create(self.config.logs.run_log.clone()).map_err(WorkflowError::Io)?;
        let runners = StepRunners {
            content_tool: ContentToolRunner::new(&self.config, self.process.clone(), run_log.clone()),
            editor: EditorScriptRunner::new(
                &self.config,
                self.process.clone(),
                self.automation.clone(),
                run_log.clone(),
            ),
            archive: ArchiveService::new(&self.config, self.process.clone(), run_log.clone()),
            run_log,
        };

        if start_step == WorkflowStep::GeneratePrecombines {
            tracing::info!("=== Beginning previs generation for {} ===", plugin);
        } else {
            tracing::info!("=== Resuming previs generation for {} from {} ===", plugin, start_step);
        }
        tracing::info!(
            "Build mode: {}, archiver: {}, data: {}",
            mode,
            self.config.archive_backend,
            self.config.data_root
        );
        self.log_header(&runners.run_log, start_step)
            .map_err(WorkflowError::Io)?;

        self.state.start_run(&plugin, mode, start_step);

        if start_step == WorkflowStep::GeneratePrecombines {
            if let Err(e) = self.prepare_fresh_run() {
                return Err(self.abort(start_step, e));
            }
        }

        let mut outcomes = IndexMap::new();
        let mut skipped = Vec::new();
        let mut current = Some(start_step);

        while let Some(step) = current {
            current = step.next();

            if !step.runs_in(mode) {
                let reason = format!("clean mode only, build mode is {}", mode);
                tracing::info!("Skipping {} ({})", step, reason);
                log_line(&runners.run_log, &format!("Skipping {} ({})", step, reason));
                self.metrics.record_step_skipped();
                self.state.skip_step(step, reason.clone());
                skipped.push((step, reason));
                continue;
            }

            tracing::info!("=== {} ===", step);
            self.state.begin_step(step);
            log_section(&runners.run_log, &step.to_string());

            if let Err(e) = self.check_preconditions(step) {
                return Err(self.abort(step, e));
            }

            let outcome = match self.execute_step(step, &runners).await {
                Ok(outcome) => outcome,
                Err(e) => StepOutcome::fatal(format!("{:#}", e)),
            };

            log_line(&runners.run_log, &format!("{} finished: {}", step, outcome));
            self.state.finish_step(step, outcome.clone());

            match &outcome {
                StepOutcome::Success => {
                    tracing::info!("{} completed successfully", step);
                    self.metrics.record_step_succeeded();
                }
                StepOutcome::Warning(message) => {
                    tracing::warn!("{} completed with a warning: {}", step, message);
                    self.metrics.record_step_warned();
                }
                StepOutcome::Fatal(reason) => {
                    tracing::error!("{} failed: {}", step, reason);
                    self.metrics.record_step_failed();
                    self.state.fail_run(step, reason.clone());
                    self.metrics.log_summary();
                    return Err(WorkflowError::Fatal {
                        step,
                        reason: reason.clone(),
                    });
                }
            }

            outcomes.insert(step, outcome);
        }

        self.cleanup_working_files(&runners.run_log);

        let report = RunReport {
            plugin,
            build_mode: mode,
            start_step,
            outcomes,
            skipped,
            artifacts: self.final_artifacts(),
            run_log: runners.run_log.path().to_path_buf(),
            elapsed: start.elapsed(),
        };

        log_section(&runners.run_log, "All done");
        for artifact in &report.artifacts {
            log_line(&runners.run_log, &format!("  {}", artifact));
        }

        self.state.complete_run();
        tracing::info!(
            "=== All done: {} in {}m {}s ===",
            report.plugin,
            report.elapsed.as_secs() / 60,
            report.elapsed.as_secs() % 60
        );
        self.metrics.log_summary();

        Ok(report)
    }

    fn log_header(&self, run_log: &RunLog, start_step: WorkflowStep) -> anyhow::Result<()> {
        run_log.line(&format!("Plugin: {}", self.config.plugin))?;
        run_log.line(&format!("Build mode: {}", self.config.build_mode))?;
        run_log.line(&format!("Archiver: {}", self.config.archive_backend))?;
        run_log.line(&format!("Data directory: {}", self.config.data_root))?;
        run_log.line(&format!("Starting at: {}", start_step))
    }

    /// Record an abort in state and metrics and build the error.
    fn abort(&self, step: WorkflowStep, error: WorkflowError) -> WorkflowError {
        let reason = match &error {
            WorkflowError::Aborted { reason, .. } | WorkflowError::Fatal { reason, .. } => {
                reason.clone()
            }
            WorkflowError::Io(e) => format!("{:#}", e),
        };
        tracing::error!("{}", error);
        self.metrics.record_step_failed();
        self.state.fail_run(step, reason);
        self.metrics.log_summary();
        error
    }

    /// Fresh-run checks: stray xPrevisPatch plugins, then the target plugin
    /// itself (seeded from the template when missing).
    fn prepare_fresh_run(&self) -> Result<(), WorkflowError> {
        let step = WorkflowStep::GeneratePrecombines;
        let data_root = &self.config.data_root;

        let patches: Vec<String> = find_plugins_containing(data_root, "xprevispatch")
            .into_iter()
            .filter(|name| !name.eq_ignore_ascii_case(SEED_PLUGIN))
            .collect();
        if !patches.is_empty() {
            tracing::warn!("Found xPrevisPatch plugins: {}", patches.join(", "));
            if !self.operator.confirm_xprevispatch(&patches) {
                return Err(WorkflowError::Aborted {
                    step,
                    reason: format!(
                        "xPrevisPatch plugins present ({}); rename them and restart",
                        patches.join(", ")
                    ),
                });
            }
        }

        let target = self.config.plugin_path();
        if target.is_file() {
            return Ok(());
        }

        let seed = self.config.data_file(&PluginIdentity::seed().file_name());
        if seed.is_file() {
            fs::copy(&seed, &target)
                .with_context(|| format!("Failed to copy {} to {}", seed, target))
                .map_err(WorkflowError::Io)?;
            tracing::info!("Created {} from {}", target, SEED_PLUGIN);
            return Ok(());
        }

        if self.operator.confirm_missing_plugin(&self.config.plugin.file_name()) {
            Ok(())
        } else {
            Err(WorkflowError::Aborted {
                step,
                reason: format!("{} not found in {}", self.config.plugin, data_root),
            })
        }
    }

    /// Preconditions for `step`, checked against the data root and, when
    /// configured, the MO2 overwrite directory.
    fn preconditions(&self, step: WorkflowStep) -> Vec<Precondition> {
        let roots = self.config.output_roots();
        let empty = |rel: &str| -> Vec<Precondition> {
            roots
                .candidates(&self.config.data_root.join(rel))
                .into_iter()
                .enumerate()
                .map(|(i, dir)| {
                    if i == 0 {
                        Precondition::empty_directory(dir, rel)
                    } else {
                        Precondition::empty_directory(dir, &format!("{} (MO2 overwrite)", rel))
                    }
                })
                .collect()
        };
        let has_files = |rel: &str, pattern: &str| {
            Precondition::has_files(roots.candidates(&self.config.data_root.join(rel)), pattern, rel)
        };
        let file_exists =
            |name: &str| Precondition::file_exists(roots.candidates(&self.config.data_file(name)));

        match step {
            WorkflowStep::GeneratePrecombines => {
                let mut checks = empty(PRECOMBINED_RELPATH);
                checks.extend(empty(VIS_RELPATH));
                checks
            }
            WorkflowStep::MergePrecombines => vec![
                has_files(PRECOMBINED_RELPATH, "*.nif"),
                file_exists(COMBINED_OBJECTS_PLUGIN),
            ],
            WorkflowStep::GeneratePrevis => empty(VIS_RELPATH),
            WorkflowStep::MergePrevis => vec![
                has_files(VIS_RELPATH, "*.uvd"),
                file_exists(PREVIS_PLUGIN),
            ],
            WorkflowStep::ArchivePrecombines
            | WorkflowStep::CompressGeometry
            | WorkflowStep::BuildIndex
            | WorkflowStep::ArchivePrevis => Vec::new(),
        }
    }

    /// Check `step`'s preconditions, offering to wipe non-empty working directories.
    fn check_preconditions(&self, step: WorkflowStep) -> Result<(), WorkflowError> {
        for precondition in self.preconditions(step) {
            match precondition.check() {
                Ok(()) => {}
                Err(Unmet::Recoverable { dir, label }) => {
                    tracing::warn!("{} is not empty: {}", label, dir);
                    if !self.operator.confirm_wipe(&dir, &label) {
                        return Err(WorkflowError::Aborted {
                            step,
                            reason: format!("directory '{}' is not empty", label),
                        });
                    }
                    wipe_directory(&dir).map_err(|e| WorkflowError::Fatal {
                        step,
                        reason: format!("{:#}", e),
                    })?;
                }
                Err(Unmet::Missing(reason)) => {
                    return Err(WorkflowError::Fatal { step, reason });
                }
            }
        }
        Ok(())
    }

    async fn execute_step(&self, step: WorkflowStep, runners: &StepRunners) -> anyhow::Result<StepOutcome> {
        let plugin = &self.config.plugin;

        match step {
            WorkflowStep::GeneratePrecombines => {
                let operation = ContentToolOperation::generate_precombined(
                    plugin,
                    self.config.build_mode,
                    &self.config.precombined_dir(),
                );
                let outcome = runners.content_tool.run(&operation).await?;
                if !outcome.is_fatal() {
                    self.log_output_count(
                        &runners.run_log,
                        PRECOMBINED_RELPATH,
                        "*.nif",
                        "precombined mesh(es)",
                    );
                }

                let psg = self.config.locate_output(&plugin.geometry_psg_name());
                if !outcome.is_fatal() && self.config.build_mode.is_clean() && !psg.is_file() {
                    return Ok(outcome.and(StepOutcome::warning(format!(
                        "Creation Kit did not produce {}",
                        psg
                    ))));
                }
                Ok(outcome)
            }
            WorkflowStep::MergePrecombines => {
                runners
                    .editor
                    .run(SCRIPT_MERGE_COMBINED, plugin, COMBINED_OBJECTS_PLUGIN)
                    .await
            }
            WorkflowStep::ArchivePrecombines => runners.archive.create(&[PRECOMBINED_RELPATH]).await,
            WorkflowStep::CompressGeometry => self.compress_geometry(runners).await,
            WorkflowStep::BuildIndex => {
                let cdx = self.config.data_file(&plugin.index_name());
                runners
                    .content_tool
                    .run(&ContentToolOperation::build_index(plugin, &cdx))
                    .await
            }
            WorkflowStep::GeneratePrevis => {
                let operation = ContentToolOperation::generate_previs(plugin, &self.config.vis_dir());
                let outcome = runners.content_tool.run(&operation).await?;
                if !outcome.is_fatal() {
                    self.log_output_count(&runners.run_log, VIS_RELPATH, "*.uvd", "visibility file(s)");
                }
                Ok(outcome)
            }
            WorkflowStep::MergePrevis => {
                runners
                    .editor
                    .run(SCRIPT_MERGE_PREVIS, plugin, PREVIS_PLUGIN)
                    .await
            }
            WorkflowStep::ArchivePrevis => runners.archive.append(&[VIS_RELPATH]).await,
        }
    }

    /// Step 4, including its skip test: an existing `.csg` with no `.psg`
    /// means compression already happened.
    async fn compress_geometry(&self, runners: &StepRunners) -> anyhow::Result<StepOutcome> {
        let plugin = &self.config.plugin;
        let psg = self.config.locate_output(&plugin.geometry_psg_name());
        let csg = self.config.locate_output(&plugin.geometry_csg_name());

        if !psg.is_file() {
            if csg.is_file() {
                return Ok(StepOutcome::warning(format!(
                    "{} not found but {} already exists, skipping compression",
                    psg, csg
                )));
            }
            return Ok(StepOutcome::fatal(format!("Geometry file not found: {}", psg)));
        }

        let outcome = runners
            .content_tool
            .run(&ContentToolOperation::compress_geometry(plugin, &csg))
            .await?;
        if outcome.is_fatal() {
            return Ok(outcome);
        }

        match fs::remove_file(&psg) {
            Ok(()) => {
                tracing::info!("Deleted {}", psg);
                Ok(outcome)
            }
            Err(e) => Ok(outcome.and(StepOutcome::warning(format!(
                "Failed to delete {}: {}",
                psg, e
            )))),
        }
    }

    /// Offer to delete the working plugins left by steps 1 and 6. Failures are warnings.
    fn cleanup_working_files(&self, run_log: &RunLog) {
        let present: Vec<String> = [COMBINED_OBJECTS_PLUGIN, PREVIS_PLUGIN]
            .into_iter()
            .filter(|name| self.config.locate_output(name).is_file())
            .map(str::to_string)
            .collect();

        if present.is_empty() || !self.operator.confirm_remove_working_files(&present) {
            return;
        }

        for name in &present {
            let path = self.config.locate_output(name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("Deleted working file {}", name);
                    log_line(run_log, &format!("Deleted working file {}", path));
                }
                Err(e) => tracing::warn!("Failed to delete working file {}: {}", path, e),
            }
        }
    }

    /// Log how many `pattern` files a generation step left under `rel`,
    /// across every output root.
    fn log_output_count(&self, run_log: &RunLog, rel: &str, pattern: &str, what: &str) {
        let count: usize = self
            .config
            .output_roots()
            .candidates(&self.config.data_root.join(rel))
            .iter()
            .map(|dir| count_files(dir, pattern))
            .sum();
        tracing::info!("Generated {} {}", count, what);
        log_line(run_log, &format!("Generated {} {}", count, what));
    }

    fn final_artifacts(&self) -> Vec<Utf8PathBuf> {
        let plugin = &self.config.plugin;
        [
            plugin.file_name(),
            plugin.geometry_csg_name(),
            plugin.index_name(),
            plugin.archive_name(),
        ]
        .iter()
        .map(|name| self.config.locate_output(name))
        .filter(|path| path.is_file())
        .collect()
    }
}

fn log_line(run_log: &RunLog, text: &str) {
    if let Err(e) = run_log.line(text) {
        tracing::warn!("Failed to write run log: {:#}", e);
    }
}

fn log_section(run_log: &RunLog, title: &str) {
    if let Err(e) = run_log.section(title) {
        tracing::warn!("Failed to write run log: {:#}", e);
    }
}

/// Delete `dir` and recreate it empty.
fn wipe_directory(dir: &Utf8Path) -> anyhow::Result<()> {
    tracing::info!("Deleting {}", dir);
    fs::remove_dir_all(dir).with_context(|| format!("Failed to delete directory: {}", dir))?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to recreate directory: {}", dir))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::operator::MockOperator;
    use super::*;
    use crate::models::{ArchiveBackend, LogPaths, Timings, ToolPaths};
    use crate::services::process::MockProcessRunner;
    use crate::services::window::MockWindowAutomation;
    use tempfile::TempDir;

    fn test_config(root: &Utf8Path, mode: BuildMode) -> RunConfig {
        let plugin = PluginIdentity::parse("Foo.esp", mode).unwrap();
        let data_root = root.join("Data");
        fs::create_dir_all(&data_root).unwrap();
        RunConfig {
            game_dir: root.to_path_buf(),
            data_root,
            build_mode: mode,
            archive_backend: ArchiveBackend::Primary,
            logs: LogPaths::in_dirs(&root.join("logs"), &root.join("tmp"), &plugin),
            plugin,
            tools: ToolPaths {
                creation_kit: root.join("CreationKit.exe"),
                editor: root.join("FO4Edit.exe"),
                packer: root.join("Archive2.exe"),
                mo2: None,
            },
            timings: Timings::immediate(),
            disabled_dlls: Vec::new(),
            mo2_data_dir: None,
        }
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    fn engine(config: RunConfig, process: MockProcessRunner, operator: MockOperator) -> WorkflowEngine {
        WorkflowEngine::new(
            config,
            Arc::new(process),
            Arc::new(MockWindowAutomation::new()),
            Arc::new(operator),
        )
    }

    #[tokio::test]
    async fn test_declined_wipe_aborts_before_any_tool_runs() {
        let (_tmp, root) = temp_root();
        let config = test_config(&root, BuildMode::Clean);
        fs::create_dir_all(config.vis_dir()).unwrap();
        fs::write(config.vis_dir().join("old.uvd"), "x").unwrap();
        fs::write(config.plugin_path(), "plugin").unwrap();

        let mut process = MockProcessRunner::new();
        process.expect_run().never();
        process.expect_spawn().never();

        let mut operator = MockOperator::new();
        operator.expect_confirm_wipe().times(1).return_const(false);

        let engine = engine(config.clone(), process, operator);
        let err = engine.run(WorkflowStep::GeneratePrecombines).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Aborted {
                step: WorkflowStep::GeneratePrecombines,
                ..
            }
        ));
        assert!(config.vis_dir().join("old.uvd").exists());
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_resumed_step() {
        let (_tmp, root) = temp_root();
        let config = test_config(&root, BuildMode::Filtered);

        let mut process = MockProcessRunner::new();
        process.expect_run().never();
        process.expect_spawn().never();

        let engine = engine(config, process, MockOperator::new());
        let err = engine.run(WorkflowStep::MergePrevis).await.unwrap_err();

        match err {
            WorkflowError::Fatal { step, reason } => {
                assert_eq!(step, WorkflowStep::MergePrevis);
                assert!(reason.contains("*.uvd"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_preconditions_cover_mo2_overwrite() {
        let (_tmp, root) = temp_root();
        let mut config = test_config(&root, BuildMode::Clean);
        let overwrite = root.join("overwrite");
        config.mo2_data_dir = Some(overwrite.clone());

        let engine = engine(config.clone(), MockProcessRunner::new(), MockOperator::new());

        assert_eq!(
            engine.preconditions(WorkflowStep::GeneratePrevis),
            vec![
                Precondition::empty_directory(config.vis_dir(), VIS_RELPATH),
                Precondition::empty_directory(overwrite.join(VIS_RELPATH), "vis (MO2 overwrite)"),
            ]
        );
        assert_eq!(
            engine.preconditions(WorkflowStep::MergePrevis)[1],
            Precondition::file_exists(vec![config.data_file(PREVIS_PLUGIN), overwrite.join(PREVIS_PLUGIN)])
        );
    }

    #[tokio::test]
    async fn test_geometry_already_compressed_is_warning() {
        let (_tmp, root) = temp_root();
        let config = test_config(&root, BuildMode::Clean);
        fs::write(config.data_file("Foo - Geometry.csg"), "csg").unwrap();

        let mut process = MockProcessRunner::new();
        process.expect_run().never();

        let engine = engine(config, process, MockOperator::new());
        let runners = StepRunners {
            content_tool: ContentToolRunner::new(
                engine.config(),
                engine.process.clone(),
                RunLog::open(root.join("run.log")),
            ),
            editor: EditorScriptRunner::new(
                engine.config(),
                engine.process.clone(),
                engine.automation.clone(),
                RunLog::open(root.join("run.log")),
            ),
            archive: ArchiveService::new(
                engine.config(),
                engine.process.clone(),
                RunLog::open(root.join("run.log")),
            ),
            run_log: RunLog::open(root.join("run.log")),
        };

        let outcome = engine.compress_geometry(&runners).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Warning(ref m) if m.contains("already exists")));
    }

    #[tokio::test]
    async fn test_xprevispatch_declined_aborts() {
        let (_tmp, root) = temp_root();
        let config = test_config(&root, BuildMode::Clean);
        fs::write(config.data_file("xPrevisPatch - Old.esp"), "x").unwrap();

        let mut operator = MockOperator::new();
        operator
            .expect_confirm_xprevispatch()
            .withf(|found| found.len() == 1 && found[0] == "xPrevisPatch - Old.esp")
            .times(1)
            .return_const(false);

        let engine = engine(config, MockProcessRunner::new(), operator);
        let err = engine.run(WorkflowStep::GeneratePrecombines).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Aborted { .. }));
        assert_eq!(err.step(), Some(WorkflowStep::GeneratePrecombines));
    }

    #[test]
    fn test_seed_copied_to_target() {
        let (_tmp, root) = temp_root();
        let config = test_config(&root, BuildMode::Clean);
        fs::write(config.data_file(SEED_PLUGIN), "seed").unwrap();

        // The seed itself is not reported as a stray patch
        let mut operator = MockOperator::new();
        operator.expect_confirm_xprevispatch().never();
        operator.expect_confirm_missing_plugin().never();

        let engine = engine(config.clone(), MockProcessRunner::new(), operator);
        engine.prepare_fresh_run().unwrap();

        assert_eq!(fs::read_to_string(config.plugin_path()).unwrap(), "seed");
    }

    #[test]
    fn test_missing_plugin_asks_operator() {
        let (_tmp, root) = temp_root();
        let config = test_config(&root, BuildMode::Clean);

        let mut operator = MockOperator::new();
        operator
            .expect_confirm_missing_plugin()
            .times(1)
            .return_const(false);

        let engine = engine(config, MockProcessRunner::new(), operator);
        assert!(matches!(
            engine.prepare_fresh_run(),
            Err(WorkflowError::Aborted { .. })
        ));
    }

    #[test]
    fn test_run_report_warnings() {
        let mut outcomes = IndexMap::new();
        outcomes.insert(WorkflowStep::GeneratePrecombines, StepOutcome::Success);
        outcomes.insert(WorkflowStep::MergePrecombines, StepOutcome::warning("Error in merge"));

        let report = RunReport {
            plugin: "Foo.esp".to_string(),
            build_mode: BuildMode::Clean,
            start_step: WorkflowStep::GeneratePrecombines,
            outcomes,
            skipped: Vec::new(),
            artifacts: Vec::new(),
            run_log: Utf8PathBuf::from("run.log"),
            elapsed: Duration::ZERO,
        };

        assert_eq!(
            report.warnings(),
            vec![(WorkflowStep::MergePrecombines, "Error in merge")]
        );
        assert_eq!(
            report.executed_steps(),
            vec![WorkflowStep::GeneratePrecombines, WorkflowStep::MergePrecombines]
        );
    }
}
