use super::build::{ArchiveBackend, BuildMode};
use super::plugin::PluginIdentity;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// DLLs the content tool cannot run with (ENB/ReShade hooks).
pub const DEFAULT_DISABLED_DLLS: &[&str] = &[
    "d3d11.dll",
    "d3d10.dll",
    "d3d9.dll",
    "dxgi.dll",
    "enbimgui.dll",
    "d3dcompiler_46e.dll",
];

/// Persistent settings from `PrevisGen Settings.yaml`.
///
/// Everything is optional on disk; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub game_dir: Option<Utf8PathBuf>,
    pub editor_exe: Option<Utf8PathBuf>,
    pub creation_kit_exe: Option<Utf8PathBuf>,
    pub archive2_exe: Option<Utf8PathBuf>,
    pub bsarch_exe: Option<Utf8PathBuf>,
    pub mo2_exe: Option<Utf8PathBuf>,
    /// MO2 overwrite directory, where tools launched through MO2 write new files.
    pub mo2_data_dir: Option<Utf8PathBuf>,

    pub settle_delay_secs: u64,
    pub dialog_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub editor_settle_secs: u64,
    pub close_grace_secs: u64,

    /// Upper bound on the editor completion-log poll. `None` waits forever.
    pub editor_log_timeout_secs: Option<u64>,

    pub disabled_dlls: Vec<String>,
    pub debug_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            game_dir: None,
            editor_exe: None,
            creation_kit_exe: None,
            archive2_exe: None,
            bsarch_exe: None,
            mo2_exe: None,
            mo2_data_dir: None,
            settle_delay_secs: 5,
            dialog_delay_secs: 3,
            poll_interval_secs: 1,
            editor_settle_secs: 10,
            close_grace_secs: 2,
            editor_log_timeout_secs: None,
            disabled_dlls: DEFAULT_DISABLED_DLLS.iter().map(|s| s.to_string()).collect(),
            debug_mode: false,
        }
    }
}

impl Settings {
    pub fn timings(&self) -> Timings {
        Timings {
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            dialog_delay: Duration::from_secs(self.dialog_delay_secs),
            // A zero interval would spin
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            editor_settle: Duration::from_secs(self.editor_settle_secs),
            close_grace: Duration::from_secs(self.close_grace_secs),
            editor_log_timeout: self.editor_log_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Waits inserted around external tool invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// After the content tool exits, before inspecting its outputs.
    pub settle_delay: Duration,
    /// After launching the editor, before looking for its dialog.
    pub dialog_delay: Duration,
    /// Between checks for the editor completion log.
    pub poll_interval: Duration,
    /// After the completion log appears, before closing the editor.
    pub editor_settle: Duration,
    /// Between the graceful close request and the forced kill.
    pub close_grace: Duration,
    pub editor_log_timeout: Option<Duration>,
}

impl Default for Timings {
    fn default() -> Self {
        Settings::default().timings()
    }
}

impl Timings {
    /// No waiting at all; for test doubles that complete synchronously.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            dialog_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            editor_settle: Duration::ZERO,
            close_grace: Duration::ZERO,
            editor_log_timeout: None,
        }
    }
}

/// Locations of the three external programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub creation_kit: Utf8PathBuf,
    pub editor: Utf8PathBuf,
    /// Archive2 or BSArch, matching [`RunConfig::archive_backend`].
    pub packer: Utf8PathBuf,
    /// Launch every tool through Mod Organizer 2 when set.
    pub mo2: Option<Utf8PathBuf>,
}

/// Log files read or written during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// Per-run log artifact.
    pub run_log: Utf8PathBuf,
    /// Content-tool log configured through CKPE, if any.
    pub content_tool_log: Option<Utf8PathBuf>,
    /// Plugin-selection list handed to the editor.
    pub editor_plugin_list: Utf8PathBuf,
    /// Completion log the editor script writes.
    pub editor_script_log: Utf8PathBuf,
}

impl LogPaths {
    /// Editor files in the system temp directory, run log under `log_dir`.
    pub fn in_dirs(log_dir: &Utf8Path, temp_dir: &Utf8Path, plugin: &PluginIdentity) -> Self {
        Self {
            run_log: log_dir.join(format!("{}-run.log", plugin.base_name())),
            content_tool_log: None,
            editor_plugin_list: temp_dir.join("Plugins.txt"),
            editor_script_log: temp_dir.join("UnattendedScript.log"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{what} not found at: {path}")]
    MissingPath { what: &'static str, path: Utf8PathBuf },

    #[error("Game directory not configured. Use --game-dir or set game_dir in the settings file.")]
    GameDirNotConfigured,
}

/// Fully resolved configuration for one run.
///
/// Owned by the workflow engine; everything below it borrows it read-only.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub game_dir: Utf8PathBuf,
    pub data_root: Utf8PathBuf,
    pub build_mode: BuildMode,
    pub archive_backend: ArchiveBackend,
    pub plugin: PluginIdentity,
    pub tools: ToolPaths,
    pub logs: LogPaths,
    pub timings: Timings,
    pub disabled_dlls: Vec<String>,
    /// MO2 overwrite directory. New tool output lands here instead of the data root.
    pub mo2_data_dir: Option<Utf8PathBuf>,
}

/// Where new tool output may appear: the data root, and the MO2 overwrite
/// directory that mirrors it when tools run through MO2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoots {
    pub data_root: Utf8PathBuf,
    pub overwrite: Option<Utf8PathBuf>,
}

impl OutputRoots {
    /// `path` (under the data root) followed by its mirror in the overwrite
    /// directory. Paths outside the data root are returned alone.
    pub fn candidates(&self, path: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut candidates = vec![path.to_path_buf()];
        if let (Some(overwrite), Ok(rel)) = (&self.overwrite, path.strip_prefix(&self.data_root)) {
            candidates.push(overwrite.join(rel));
        }
        candidates
    }

    /// The first candidate for `path` that exists, or `path` itself.
    pub fn locate(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.candidates(path)
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }
}

impl RunConfig {
    pub fn output_roots(&self) -> OutputRoots {
        OutputRoots {
            data_root: self.data_root.clone(),
            overwrite: self.mo2_data_dir.clone(),
        }
    }

    /// Data-root file `name`, or its copy in the MO2 overwrite directory if
    /// only that exists.
    pub fn locate_output(&self, name: &str) -> Utf8PathBuf {
        self.output_roots().locate(&self.data_file(name))
    }

    pub fn precombined_dir(&self) -> Utf8PathBuf {
        self.data_root.join(PRECOMBINED_RELPATH)
    }

    pub fn vis_dir(&self) -> Utf8PathBuf {
        self.data_root.join(VIS_RELPATH)
    }

    pub fn data_file(&self, name: &str) -> Utf8PathBuf {
        self.data_root.join(name)
    }

    pub fn plugin_path(&self) -> Utf8PathBuf {
        self.data_file(&self.plugin.file_name())
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.data_file(&self.plugin.archive_name())
    }

    /// Directory the content tool runs from; the DLL guard operates here.
    pub fn content_tool_dir(&self) -> Utf8PathBuf {
        self.tools
            .creation_kit
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| self.game_dir.clone())
    }

    /// Check that every configured path exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &Utf8Path); 5] = [
            ("Game directory", &self.game_dir),
            ("Data directory", &self.data_root),
            ("Creation Kit", &self.tools.creation_kit),
            ("xEdit", &self.tools.editor),
            (self.archive_backend.tool_name(), &self.tools.packer),
        ];

        for (what, path) in required {
            if !path.exists() {
                return Err(ConfigError::MissingPath {
                    what,
                    path: path.to_path_buf(),
                });
            }
        }

        if let Some(mo2) = &self.tools.mo2 {
            if !mo2.exists() {
                return Err(ConfigError::MissingPath {
                    what: "Mod Organizer 2",
                    path: mo2.clone(),
                });
            }
        }

        if let Some(overwrite) = &self.mo2_data_dir {
            if !overwrite.is_dir() {
                return Err(ConfigError::MissingPath {
                    what: "MO2 overwrite directory",
                    path: overwrite.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Precombined mesh output, relative to the data root.
pub const PRECOMBINED_RELPATH: &str = "meshes/precombined";

/// Visibility data output, relative to the data root.
pub const VIS_RELPATH: &str = "vis";

/// Working plugin the content tool writes precombine records into.
pub const COMBINED_OBJECTS_PLUGIN: &str = "CombinedObjects.esp";

/// Working plugin the content tool writes previs records into.
pub const PREVIS_PLUGIN: &str = "Previs.esp";
