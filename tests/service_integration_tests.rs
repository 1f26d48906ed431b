//! Integration tests for the tool-facing services
//!
//! These tests verify:
//! - Step preconditions against a real directory tree
//! - DLL guard disable/restore, including recovery after a crashed run and
//!   repeated guarded runs
//! - Creation Kit outcome inference from artifacts, exit code and log
//! - Run log capture of tool invocations

mod common;

use common::{FakeTools, run_config, temp_root, touch};
use previsgen::models::{ArchiveBackend, BuildMode, StepOutcome};
use previsgen::services::dll_guard::{DISABLED_SUFFIX, disabled_path};
use previsgen::services::preconditions::{count_files, find_plugins_containing, is_directory_empty};
use previsgen::services::{
    ContentToolOperation, ContentToolRunner, DllDisableSet, Precondition, RunLog, Unmet,
    directory_has_files, with_dlls_disabled,
};
use std::fs;
use std::sync::Arc;
use walkdir::WalkDir;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_precondition_checks_against_tree() {
    let (_temp, root) = temp_root();
    let precombined = root.join("meshes/precombined");

    let empty = Precondition::empty_directory(precombined.clone(), "meshes/precombined");
    let has_nif = Precondition::has_files(vec![precombined.clone()], "*.nif", "meshes/precombined");

    // Missing counts as empty
    assert_eq!(empty.check(), Ok(()));
    assert!(matches!(has_nif.check(), Err(Unmet::Missing(_))));

    touch(&precombined.join("sub/0001.NIF"));
    assert_eq!(
        empty.check(),
        Err(Unmet::Recoverable {
            dir: precombined.clone(),
            label: "meshes/precombined".to_string(),
        })
    );
    assert_eq!(has_nif.check(), Ok(()));
    assert!(directory_has_files(&precombined, "*.nif"));
    assert_eq!(count_files(&precombined, "*.nif"), 1);
}

#[test]
fn test_empty_subdirectory_makes_directory_non_empty() {
    let (_temp, root) = temp_root();
    fs::create_dir_all(root.join("vis/leftover")).unwrap();

    assert!(!is_directory_empty(&root.join("vis")));
    assert!(!directory_has_files(&root.join("vis"), "*.uvd"));
}

#[test]
fn test_find_xprevispatch_plugins_case_insensitive() {
    let (_temp, root) = temp_root();
    touch(&root.join("xPrevisPatch.esp"));
    touch(&root.join("XPREVISPATCH - Copy.ESM"));
    touch(&root.join("xprevispatch notes.txt"));
    touch(&root.join("Other.esp"));

    assert_eq!(
        find_plugins_containing(&root, "xprevispatch"),
        vec!["XPREVISPATCH - Copy.ESM", "xPrevisPatch.esp"]
    );
}

#[test]
fn test_dll_guard_restores_on_release() {
    let (_temp, root) = temp_root();
    touch(&root.join("d3d11.dll"));
    touch(&root.join("dxgi.dll"));

    let set = DllDisableSet::acquire(&root, &names(&["d3d11.dll", "dxgi.dll", "enbimgui.dll"])).unwrap();
    assert_eq!(set.disabled().len(), 2);
    assert!(!root.join("d3d11.dll").exists());
    assert!(disabled_path(&root.join("d3d11.dll")).is_file());

    assert_eq!(set.restore().unwrap(), 2);
    assert!(root.join("d3d11.dll").is_file());
    assert!(root.join("dxgi.dll").is_file());
    assert!(!disabled_path(&root.join("dxgi.dll")).exists());
}

#[test]
fn test_dll_guard_repairs_crashed_run() {
    let (_temp, root) = temp_root();
    // Left behind by a run that never restored
    touch(&disabled_path(&root.join("d3d11.dll")));

    let set = DllDisableSet::acquire(&root, &names(&["d3d11.dll"])).unwrap();
    assert_eq!(set.disabled().len(), 1);
    drop(set);

    assert!(root.join("d3d11.dll").is_file());

    // Acquiring and releasing again lands in the same place
    let set = DllDisableSet::acquire(&root, &names(&["d3d11.dll"])).unwrap();
    set.restore().unwrap();
    assert!(root.join("d3d11.dll").is_file());
    assert!(!disabled_path(&root.join("d3d11.dll")).exists());
}

#[test]
fn test_dll_guard_refuses_ambiguous_state() {
    let (_temp, root) = temp_root();
    touch(&root.join("d3d11.dll"));
    touch(&disabled_path(&root.join("d3d11.dll")));

    assert!(DllDisableSet::acquire(&root, &names(&["d3d11.dll"])).is_err());
    assert!(root.join("d3d11.dll").is_file());
}

#[tokio::test]
async fn test_with_dlls_disabled_restores_after_body_error() {
    let (_temp, root) = temp_root();
    touch(&root.join("d3d11.dll"));

    let result: anyhow::Result<()> = with_dlls_disabled(&root, &names(&["d3d11.dll"]), || async {
        anyhow::bail!("tool crashed")
    })
    .await;

    assert!(result.is_err());
    assert!(root.join("d3d11.dll").is_file());
}

#[tokio::test]
async fn test_back_to_back_guarded_runs_never_double_disable() {
    let (_temp, root) = temp_root();
    fs::write(root.join("d3d11.dll"), "enb").unwrap();
    fs::write(root.join("dxgi.dll"), "reshade").unwrap();
    let guarded = names(&["d3d11.dll", "dxgi.dll"]);

    let first = with_dlls_disabled(&root, &guarded, || async { Ok(1) }).await.unwrap();
    assert_eq!(first, 1);

    let second: anyhow::Result<()> = with_dlls_disabled(&root, &guarded, || async {
        anyhow::bail!("Creation Kit crashed")
    })
    .await;
    assert!(second.is_err());

    let leftovers: Vec<String> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(DISABLED_SUFFIX))
        .collect();
    assert!(leftovers.is_empty(), "left disabled: {:?}", leftovers);

    assert_eq!(fs::read_to_string(root.join("d3d11.dll")).unwrap(), "enb");
    assert_eq!(fs::read_to_string(root.join("dxgi.dll")).unwrap(), "reshade");
}

#[tokio::test]
async fn test_content_tool_nonzero_exit_with_artifact_is_warning() {
    let (_temp, root) = temp_root();
    let config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    let mut fake = FakeTools::new(&config);
    fake.ck_exit_code = 1;

    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();
    let runner = ContentToolRunner::new(&config, Arc::new(fake), run_log.clone());
    let cdx = config.data_root.join("Foo.cdx");

    let outcome = runner
        .run(&ContentToolOperation::build_index(&config.plugin, &cdx))
        .await
        .unwrap();

    assert!(matches!(outcome, StepOutcome::Warning(_)));
    assert!(cdx.is_file());

    let log = run_log.contents().unwrap();
    assert!(log.contains("-BuildCDX:Foo.esp"));
    assert!(log.contains("exit code 1"));
}

#[tokio::test]
async fn test_content_tool_success_without_artifact_is_fatal() {
    let (_temp, root) = temp_root();
    let config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    let mut fake = FakeTools::new(&config);
    fake.ck_produces_output = false;

    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();
    let runner = ContentToolRunner::new(&config, Arc::new(fake), run_log);
    let csg = config.data_root.join("Foo - Geometry.csg");

    let outcome = runner
        .run(&ContentToolOperation::compress_geometry(&config.plugin, &csg))
        .await
        .unwrap();

    assert!(outcome.is_fatal());
}

#[tokio::test]
async fn test_content_tool_previs_incomplete_signature_is_fatal() {
    let (_temp, root) = temp_root();
    let mut config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    let tool_log = root.join("CreationKit.log");
    config.logs.content_tool_log = Some(tool_log.clone());

    // A stale log from an earlier run must not leak into this one
    fs::write(&tool_log, "OUT OF HANDLE ARRAY ENTRIES\n").unwrap();

    let mut fake = FakeTools::new(&config);
    fake.ck_log_text = "Cell 0,0\nERROR: visibility task did not complete.\n".to_string();

    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();
    let runner = ContentToolRunner::new(&config, Arc::new(fake), run_log);

    let outcome = runner
        .run(&ContentToolOperation::generate_previs(&config.plugin, &config.vis_dir()))
        .await
        .unwrap();

    match outcome {
        StepOutcome::Fatal(reason) => assert!(reason.contains("visibility task did not complete")),
        other => panic!("expected fatal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_content_tool_command_uses_mo2_when_configured() {
    let (_temp, root) = temp_root();
    let mut config = run_config(&root, "Foo.esp", BuildMode::Clean, ArchiveBackend::Primary);
    config.tools.mo2 = Some(root.join("ModOrganizer.exe"));

    let run_log = RunLog::create(root.join("logs/run.log")).unwrap();
    let runner = ContentToolRunner::new(&config, Arc::new(FakeTools::new(&config)), run_log);

    let command = runner.command(&ContentToolOperation::generate_precombined(
        &config.plugin,
        BuildMode::Clean,
        &config.precombined_dir(),
    ));

    assert_eq!(command.program, root.join("ModOrganizer.exe"));
    assert_eq!(command.args[0], "run");
    assert!(command.args[1].ends_with("CreationKit.exe"));
    assert_eq!(command.args[2], "-a");
    assert_eq!(command.args[3], "-GeneratePrecombined:Foo.esp clean all");
}
