//! PrevisGen - Automated precombine and previs generation for Fallout 4 plugins
//!
//! Main entry point for the command line application.
//!
//! # Execution Flow
//!
//! 1. Parse arguments, load `PrevisGen Settings.yaml` (+ `PREVISGEN_*` overrides)
//! 2. Initialize logging → `<config dir>/logs/previsgen.<date>`
//! 3. Resolve the game directory, tools, CKPE log path and plugin into a [`RunConfig`]
//! 4. Pick the start step (`--resume`, an interactive prompt, or step 1)
//! 5. Run the [`WorkflowEngine`] on a single-threaded tokio runtime, printing
//!    progress from its state events
//!
//! Exits nonzero when the run fails or is aborted; the message names the step
//! to resume from.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use previsgen::config::{CkpeConfig, resolve_tool_paths};
use previsgen::models::{ConfigError, LogPaths, PluginIdentity, RunConfig, Settings, WorkflowStep};
use previsgen::services::{DesktopAutomation, ProcessRunner, TokioProcessRunner, WindowAutomation};
use previsgen::ui::{self, Args, DialoguerOperator};
use previsgen::workflow::{AutoOperator, Operator, WorkflowEngine};
use previsgen::{APP_NAME, ConfigManager, VERSION};
use std::sync::Arc;

fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new(&args.config_dir)?;
    let created = config_manager.ensure_settings_file()?;
    let settings = config_manager.load_settings()?;

    let debug = args.debug || settings.debug_mode;
    let _guard = previsgen::logging::setup_logging_with_console(
        &config_manager.config_dir().join("logs"),
        previsgen::logging::LOG_PREFIX,
        debug,
        debug,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    if created {
        tracing::info!("Wrote default settings to {}", config_manager.settings_path());
    }

    // Steps run strictly one after another; a single thread is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(run(args, settings, &config_manager));

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    tracing::info!("Shutdown complete");
    result
}

async fn run(args: Args, settings: Settings, config_manager: &ConfigManager) -> Result<()> {
    let mode = args.build_mode();
    let backend = args.archive_backend();

    let game_dir = args
        .game_dir
        .clone()
        .or_else(|| settings.game_dir.clone())
        .ok_or(ConfigError::GameDirNotConfigured)?;
    let data_root = game_dir.join("Data");

    let plugin = match &args.plugin {
        Some(name) => PluginIdentity::parse(name, mode)?,
        None if args.interactive() => ui::prompt_plugin_name(mode)?,
        None => bail!("A plugin name is required with --yes"),
    };
    tracing::info!("Plugin: {}, build mode: {}, archiver: {}", plugin, mode, backend);

    let mut logs = LogPaths::in_dirs(
        &config_manager.config_dir().join("logs"),
        &Utf8PathBuf::try_from(std::env::temp_dir()).context("Temp directory is not UTF-8")?,
        &plugin,
    );
    logs.content_tool_log = content_tool_log(&game_dir)?;

    let config = RunConfig {
        tools: resolve_tool_paths(&settings, &game_dir, backend, args.mo2.clone()),
        game_dir,
        data_root,
        build_mode: mode,
        archive_backend: backend,
        plugin,
        logs,
        timings: settings.timings(),
        disabled_dlls: settings.disabled_dlls.clone(),
        mo2_data_dir: args.mo2_data_dir.clone().or_else(|| settings.mo2_data_dir.clone()),
    };
    config.validate()?;
    if let Some(overwrite) = &config.mo2_data_dir {
        if config.tools.mo2.is_none() {
            tracing::warn!("MO2 overwrite directory set without --mo2; tools will not write there");
        }
        tracing::info!("Collecting generated files from MO2 overwrite: {}", overwrite);
    }

    let start_step = match args.resume_step() {
        Some(step) => step,
        None if args.interactive() && config.plugin_path().is_file() => {
            match ui::prompt_start_step(&config.plugin_path(), mode)? {
                Some(step) => step,
                None => {
                    println!("Cancelled");
                    return Ok(());
                }
            }
        }
        None => WorkflowStep::GeneratePrecombines,
    };

    let process: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
    let automation: Arc<dyn WindowAutomation> = Arc::new(DesktopAutomation::new(
        process.clone(),
        config.timings.close_grace,
    ));
    let operator: Arc<dyn Operator> = if args.interactive() {
        Arc::new(DialoguerOperator::new())
    } else {
        Arc::new(AutoOperator::declining())
    };

    let engine = WorkflowEngine::new(config, process, automation, operator);
    let printer = ui::spawn_progress_printer(engine.state().subscribe());

    let result = engine.run(start_step).await;

    // Closing the channel lets the printer drain and exit
    drop(engine);
    if let Err(e) = printer.await {
        tracing::warn!("Progress printer stopped abnormally: {}", e);
    }

    let report = result?;
    println!();
    println!(
        "Finished {} in {}m {}s",
        report.plugin,
        report.elapsed.as_secs() / 60,
        report.elapsed.as_secs() % 60
    );
    for artifact in &report.artifacts {
        println!("  {}", artifact);
    }
    for (step, warning) in report.warnings() {
        println!("  warning at step {}: {}", step.number(), warning);
    }
    println!("Run log: {}", report.run_log);

    Ok(())
}

/// Content-tool log path from the CKPE config.
///
/// A missing config or log setting only loses the log scan; a disabled
/// handle extension is an error since precombine generation would fail.
fn content_tool_log(game_dir: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
    let Some(path) = CkpeConfig::locate(game_dir) else {
        tracing::warn!(
            "No Creation Kit Platform Extended config found in {}; Creation Kit log will not be checked",
            game_dir
        );
        return Ok(None);
    };

    let ckpe = CkpeConfig::load(&path)?;
    ckpe.validate()?;

    let log = ckpe.resolved_log_file(game_dir);
    match &log {
        Some(log) => tracing::info!("Creation Kit log: {}", log),
        None => tracing::warn!("No log file set in {}; Creation Kit log will not be checked", path),
    }
    Ok(log)
}
