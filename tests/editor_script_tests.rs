//! Integration tests for EditorScriptRunner
//!
//! These tests verify:
//! - The xEdit command line and plugin list handed to the script
//! - Module-selection confirmation and closing the editor window
//! - Outcome classification from the completion log
//! - The optional completion-log timeout

mod common;

use common::{EDITOR_SUCCESS_LOG, FakeTools, FakeWindows, run_config, temp_root};
use previsgen::models::{ArchiveBackend, BuildMode, COMBINED_OBJECTS_PLUGIN, PREVIS_PLUGIN, StepOutcome};
use previsgen::services::{EditorScriptRunner, RunLog, SCRIPT_MERGE_COMBINED, SCRIPT_MERGE_PREVIS};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_merge_script_success() {
    let (_temp, root) = temp_root();
    let config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    let tools = Arc::new(FakeTools::new(&config));
    let windows = Arc::new(FakeWindows::new());
    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();

    let runner = EditorScriptRunner::new(&config, tools.clone(), windows.clone(), run_log.clone());
    let outcome = runner
        .run(SCRIPT_MERGE_COMBINED, &config.plugin, COMBINED_OBJECTS_PLUGIN)
        .await
        .unwrap();

    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(windows.confirms.load(Ordering::SeqCst), 1);
    assert_eq!(windows.closes.load(Ordering::SeqCst), 1);

    let calls = tools.calls();
    assert_eq!(calls.len(), 1);
    let command = &calls[0];
    assert_eq!(command.program, config.tools.editor);
    assert_eq!(command.arg_value("-Script:"), Some(SCRIPT_MERGE_COMBINED));
    assert_eq!(command.arg_value("-Mod:"), Some("Foo.esp"));
    assert!(command.args.iter().any(|a| a == "-autoexit"));

    // Plugin list is temporary
    assert!(!config.logs.editor_plugin_list.exists());

    let log = run_log.contents().unwrap();
    assert!(log.contains(EDITOR_SUCCESS_LOG.lines().last().unwrap()));
}

#[tokio::test]
async fn test_error_lines_after_completion_are_a_warning() {
    let (_temp, root) = temp_root();
    let config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    let mut fake = FakeTools::new(&config);
    fake.editor_log_text =
        Some("Error: record 0001ABCD could not be copied\nCompleted: 1 Errors.\n".to_string());
    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();

    let runner = EditorScriptRunner::new(
        &config,
        Arc::new(fake),
        Arc::new(FakeWindows::new()),
        run_log,
    );
    let outcome = runner
        .run(SCRIPT_MERGE_PREVIS, &config.plugin, PREVIS_PLUGIN)
        .await
        .unwrap();

    match outcome {
        StepOutcome::Warning(message) => assert!(message.contains("0001ABCD")),
        other => panic!("expected warning, got {:?}", other),
    }
}

#[tokio::test]
async fn test_log_without_completion_marker_is_fatal() {
    let (_temp, root) = temp_root();
    let config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    let mut fake = FakeTools::new(&config);
    fake.editor_log_text = Some("Merging records\n".to_string());
    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();

    let runner = EditorScriptRunner::new(
        &config,
        Arc::new(fake),
        Arc::new(FakeWindows::new()),
        run_log,
    );
    let outcome = runner
        .run(SCRIPT_MERGE_COMBINED, &config.plugin, COMBINED_OBJECTS_PLUGIN)
        .await
        .unwrap();

    assert!(outcome.is_fatal());
}

#[tokio::test]
async fn test_missing_log_times_out_as_fatal() {
    let (_temp, root) = temp_root();
    let mut config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    config.timings.editor_log_timeout = Some(Duration::from_millis(30));

    let mut fake = FakeTools::new(&config);
    fake.editor_log_text = None;
    let windows = Arc::new(FakeWindows {
        window_present: false,
        ..FakeWindows::default()
    });
    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();

    let runner = EditorScriptRunner::new(&config, Arc::new(fake), windows.clone(), run_log);
    let outcome = runner
        .run(SCRIPT_MERGE_COMBINED, &config.plugin, COMBINED_OBJECTS_PLUGIN)
        .await
        .unwrap();

    assert!(outcome.is_fatal());
    // Dialog never found, but the editor is still closed
    assert_eq!(windows.confirms.load(Ordering::SeqCst), 0);
    assert_eq!(windows.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_log_from_previous_run_is_removed() {
    let (_temp, root) = temp_root();
    let mut config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    config.timings.editor_log_timeout = Some(Duration::from_millis(30));

    std::fs::create_dir_all(config.logs.editor_script_log.parent().unwrap()).unwrap();
    std::fs::write(&config.logs.editor_script_log, EDITOR_SUCCESS_LOG).unwrap();

    let mut fake = FakeTools::new(&config);
    fake.editor_log_text = None;
    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();

    let runner = EditorScriptRunner::new(
        &config,
        Arc::new(fake),
        Arc::new(FakeWindows::new()),
        run_log,
    );
    let outcome = runner
        .run(SCRIPT_MERGE_PREVIS, &config.plugin, PREVIS_PLUGIN)
        .await
        .unwrap();

    assert!(outcome.is_fatal());
}
