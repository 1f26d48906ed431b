//! Shared fakes for integration tests.
//!
//! `FakeTools` stands in for the Creation Kit, xEdit, Archive2 and BSArch by
//! producing the files each tool would produce. Fake archives are plain text
//! with one `/`-separated entry path per line.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use previsgen::models::{
    ArchiveBackend, BuildMode, LogPaths, PluginIdentity, RunConfig, Timings, ToolPaths,
};
use previsgen::services::{ProcessRunner, ToolCommand, ToolOutput, WindowAutomation};
use previsgen::workflow::Operator;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const EDITOR_SUCCESS_LOG: &str = "Merging records\r\nCompleted: No Errors.\r\n";

pub fn temp_root() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, root)
}

/// A RunConfig rooted at `root` with every tool path under it.
pub fn run_config(root: &Utf8Path, plugin: &str, mode: BuildMode, backend: ArchiveBackend) -> RunConfig {
    let plugin = PluginIdentity::parse(plugin, mode).unwrap();
    let data_root = root.join("Data");
    fs::create_dir_all(&data_root).unwrap();

    let packer = match backend {
        ArchiveBackend::Primary => root.join("Tools/Archive2/Archive2.exe"),
        ArchiveBackend::Community => root.join("Tools/BSArch/BSArch.exe"),
    };

    RunConfig {
        game_dir: root.to_path_buf(),
        data_root,
        build_mode: mode,
        archive_backend: backend,
        logs: LogPaths::in_dirs(&root.join("logs"), &root.join("tmp"), &plugin),
        plugin,
        tools: ToolPaths {
            creation_kit: root.join("CreationKit.exe"),
            editor: root.join("FO4Edit.exe"),
            packer,
            mo2: None,
        },
        timings: Timings::immediate(),
        disabled_dlls: vec!["d3d11.dll".to_string(), "dxgi.dll".to_string()],
        mo2_data_dir: None,
    }
}

pub fn touch(path: &Utf8Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, "x").unwrap();
}

/// Entries of a fake archive, sorted.
pub fn archive_entries(archive: &Utf8Path) -> Vec<String> {
    let mut entries: Vec<String> = fs::read_to_string(archive)
        .unwrap()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    entries.sort();
    entries
}

fn files_relative_to(root: &Utf8Path, dir: &Utf8Path) -> Vec<String> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?;
            Some(rel.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

fn write_archive(archive: &Utf8Path, entries: &BTreeSet<String>) {
    let body: String = entries.iter().map(|e| format!("{e}\n")).collect();
    fs::write(archive, body).unwrap();
}

/// Simulated external tools.
pub struct FakeTools {
    game_dir: Utf8PathBuf,
    data_root: Utf8PathBuf,
    /// Where the Creation Kit writes what it generates (the MO2 overwrite
    /// directory when one is configured)
    pub output_root: Utf8PathBuf,
    ck_log: Option<Utf8PathBuf>,
    /// Exit code every Creation Kit run reports
    pub ck_exit_code: i32,
    /// When false the Creation Kit "runs" but writes nothing
    pub ck_produces_output: bool,
    /// Written to the Creation Kit log after each run
    pub ck_log_text: String,
    pub packer_exit_code: i32,
    /// Archive2 extracts fine but fails every create
    pub fail_archive_create: bool,
    /// Written to the xEdit script log when xEdit is launched
    pub editor_log_text: Option<String>,
    calls: Mutex<Vec<ToolCommand>>,
    /// For each Creation Kit run: was any guarded DLL still enabled?
    dll_checks: Mutex<Vec<bool>>,
    guarded_dlls: Vec<String>,
}

impl FakeTools {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            game_dir: config.game_dir.clone(),
            data_root: config.data_root.clone(),
            output_root: config.mo2_data_dir.clone().unwrap_or_else(|| config.data_root.clone()),
            ck_log: config.logs.content_tool_log.clone(),
            ck_exit_code: 0,
            ck_produces_output: true,
            ck_log_text: "Precombine generation finished\n".to_string(),
            packer_exit_code: 0,
            fail_archive_create: false,
            editor_log_text: Some(EDITOR_SUCCESS_LOG.to_string()),
            calls: Mutex::new(Vec::new()),
            dll_checks: Mutex::new(Vec::new()),
            guarded_dlls: config.disabled_dlls.clone(),
        }
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    /// First argument of every Creation Kit run, e.g. `-BuildCDX:Foo.esp`.
    pub fn ck_operations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.program.file_name() == Some("CreationKit.exe"))
            .filter_map(|c| c.args.first().cloned())
            .collect()
    }

    pub fn editor_scripts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|c| c.program.file_name() == Some("FO4Edit.exe"))
            .filter_map(|c| c.arg_value("-Script:").map(str::to_string))
            .collect()
    }

    pub fn dlls_enabled_during_ck(&self) -> Vec<bool> {
        self.dll_checks.lock().unwrap().clone()
    }

    fn creation_kit(&self, command: &ToolCommand) -> ToolOutput {
        let enabled = self
            .guarded_dlls
            .iter()
            .any(|name| self.game_dir.join(name).exists());
        self.dll_checks.lock().unwrap().push(enabled);

        if self.ck_produces_output {
            let op = command.args.first().cloned().unwrap_or_default();
            let (flag, plugin) = op.split_once(':').unwrap_or((op.as_str(), ""));
            let base = plugin.rsplit_once('.').map_or(plugin, |(b, _)| b);
            let data = &self.output_root;

            match flag {
                "-GeneratePrecombined" => {
                    touch(&data.join(format!("meshes/precombined/{base}_0000ABCD.nif")));
                    touch(&data.join("CombinedObjects.esp"));
                    if command.args.get(1).map(String::as_str) == Some("clean") {
                        touch(&data.join(format!("{base} - Geometry.psg")));
                    }
                }
                "-CompressPSG" => touch(&data.join(format!("{base} - Geometry.csg"))),
                "-BuildCDX" => touch(&data.join(format!("{base}.cdx"))),
                "-GeneratePreVisData" => {
                    touch(&data.join("vis/0000ABCD.uvd"));
                    touch(&data.join("Previs.esp"));
                }
                _ => {}
            }
        }

        if let Some(log) = &self.ck_log {
            fs::write(log, &self.ck_log_text).unwrap();
        }

        ToolOutput {
            exit_code: self.ck_exit_code,
            ..ToolOutput::default()
        }
    }

    fn archive2(&self, command: &ToolCommand) -> ToolOutput {
        if self.packer_exit_code != 0 {
            return ToolOutput {
                exit_code: self.packer_exit_code,
                ..ToolOutput::default()
            };
        }
        let cwd = command.working_dir.clone().unwrap_or_else(|| self.data_root.clone());

        if let Some(archive) = command.arg_value("-c=") {
            if self.fail_archive_create {
                return ToolOutput {
                    exit_code: 3,
                    ..ToolOutput::default()
                };
            }
            let mut entries = BTreeSet::new();
            for source in command.args[0].split(',') {
                let source = source.replace('\\', "/");
                entries.extend(files_relative_to(&cwd, &cwd.join(&source)));
            }
            write_archive(Utf8Path::new(archive), &entries);
        } else if let Some(dest) = command.arg_value("-e=") {
            for entry in archive_entries(Utf8Path::new(&command.args[0])) {
                touch(&Utf8Path::new(dest).join(entry));
            }
        }
        ToolOutput::default()
    }

    fn bsarch(&self, command: &ToolCommand) -> ToolOutput {
        if self.packer_exit_code != 0 {
            return ToolOutput {
                exit_code: self.packer_exit_code,
                ..ToolOutput::default()
            };
        }
        let root = Utf8Path::new(&command.args[1]);
        let archive = Utf8Path::new(&command.args[2]);

        let mut entries: BTreeSet<String> = if archive.exists() {
            archive_entries(archive).into_iter().collect()
        } else {
            BTreeSet::new()
        };
        entries.extend(files_relative_to(root, root));
        write_archive(archive, &entries);
        ToolOutput::default()
    }
}

#[async_trait]
impl ProcessRunner for FakeTools {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(command.clone());
        let output = match command.program.file_name() {
            Some("CreationKit.exe") => self.creation_kit(command),
            Some("Archive2.exe") => self.archive2(command),
            Some("BSArch.exe") => self.bsarch(command),
            _ => ToolOutput::default(),
        };
        Ok(output)
    }

    async fn spawn(&self, command: &ToolCommand) -> Result<()> {
        self.calls.lock().unwrap().push(command.clone());
        if command.program.file_name() == Some("FO4Edit.exe") {
            if let (Some(log), Some(text)) = (command.arg_value("-log:"), &self.editor_log_text) {
                fs::write(log, text).unwrap();
            }
        }
        Ok(())
    }
}

/// Window automation that always finds the dialog and counts calls.
#[derive(Default)]
pub struct FakeWindows {
    pub confirms: AtomicUsize,
    pub closes: AtomicUsize,
    pub window_present: bool,
}

impl FakeWindows {
    pub fn new() -> Self {
        Self {
            window_present: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl WindowAutomation for FakeWindows {
    async fn locate_window(&self, _process: &str, _title: &str) -> Result<bool> {
        Ok(self.window_present)
    }

    async fn send_confirm(&self, _process: &str, _title: &str) -> Result<()> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_or_kill(&self, _process: &str) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Operator with scripted answers that records what it was asked.
pub struct ScriptedOperator {
    pub wipe: bool,
    pub cleanup: bool,
    pub asked: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new(wipe: bool, cleanup: bool) -> Self {
        Self {
            wipe,
            cleanup,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Operator for ScriptedOperator {
    fn confirm_wipe(&self, _dir: &Utf8Path, label: &str) -> bool {
        self.asked.lock().unwrap().push(format!("wipe {label}"));
        self.wipe
    }

    fn confirm_xprevispatch(&self, found: &[String]) -> bool {
        self.asked
            .lock()
            .unwrap()
            .push(format!("xprevispatch {}", found.join(",")));
        true
    }

    fn confirm_missing_plugin(&self, plugin: &str) -> bool {
        self.asked.lock().unwrap().push(format!("missing {plugin}"));
        true
    }

    fn confirm_remove_working_files(&self, files: &[String]) -> bool {
        self.asked
            .lock()
            .unwrap()
            .push(format!("cleanup {}", files.join(",")));
        self.cleanup
    }
}
