//! Creation Kit Platform Extended (CKPE) configuration.
//!
//! CKPE is the Creation Kit patch that raises the reference-handle limit and
//! redirects the tool's log to a file. Both matter here: precombine
//! generation exhausts handles without the extended limit, and the log file
//! is what the content-tool runner scans for fatal signatures.

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::sync::LazyLock;
use thiserror::Error;

/// Config files in the game directory, most preferred first.
pub const CKPE_CONFIG_FILES: &[&str] = &[
    "CreationKitPlatformExtended.toml",
    "CreationKitPlatformExtended.ini",
    "fallout4_test.ini",
];

/// Spellings of the handle-limit switch across CKPE versions ("Extremly" is the real key).
const POINTER_HANDLE_KEYS: &[&str] = &[
    "bBSPointerHandleExtremly",
    "bBSPointerHandleExtremely",
    "bBSPointerHandle",
];

const LOG_FILE_KEYS: &[&str] = &["sOutputFile", "OutputFile", "sLogFile"];

static SECTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\s*([^\]]+?)\s*\]$").expect("Invalid section regex"));

static KEY_VALUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.]+)\s*=\s*(.*?)\s*$").expect("Invalid key/value regex")
});

#[derive(Error, Debug)]
pub enum CkpeError {
    #[error("Failed to read CKPE config {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "bBSPointerHandleExtremly is not enabled in {path}. \
         Precombine generation needs it: set bBSPointerHandleExtremly=true"
    )]
    PointerHandleDisabled { path: Utf8PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CkpeConfigKind {
    Toml,
    Ini,
    /// `fallout4_test.ini` from older CKPE builds
    LegacyIni,
}

impl CkpeConfigKind {
    fn from_path(path: &Utf8Path) -> Self {
        let name = path.file_name().unwrap_or_default();
        if name.eq_ignore_ascii_case("fallout4_test.ini") {
            CkpeConfigKind::LegacyIni
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        {
            CkpeConfigKind::Toml
        } else {
            CkpeConfigKind::Ini
        }
    }

    /// Section the log-file key lives in; `None` means anywhere.
    fn log_section(&self) -> Option<&'static str> {
        match self {
            CkpeConfigKind::Toml => None,
            CkpeConfigKind::Ini => Some("Log"),
            CkpeConfigKind::LegacyIni => Some("CreationKit_Log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CkpeConfig {
    pub path: Utf8PathBuf,
    pub kind: CkpeConfigKind,
    pub pointer_handle_enabled: bool,
    /// As written in the config; may be relative to the game directory
    pub log_file: Option<Utf8PathBuf>,
}

impl CkpeConfig {
    /// First CKPE config present in `game_dir`.
    pub fn locate(game_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        CKPE_CONFIG_FILES
            .iter()
            .map(|name| game_dir.join(name))
            .find(|path| path.is_file())
    }

    pub fn load(path: &Utf8Path) -> Result<Self, CkpeError> {
        let content = fs::read(path).map_err(|source| CkpeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(path, &String::from_utf8_lossy(&content)))
    }

    pub fn parse(path: &Utf8Path, content: &str) -> Self {
        let kind = CkpeConfigKind::from_path(path);
        let mut section = String::new();
        let mut pointer_handle_enabled = false;
        let mut log_file = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(caps) = SECTION_PATTERN.captures(line) {
                section = caps[1].to_string();
                continue;
            }

            let Some(caps) = KEY_VALUE_PATTERN.captures(line) else {
                continue;
            };
            let key = &caps[1];
            let value = strip_value(&caps[2]);

            if POINTER_HANDLE_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)) {
                pointer_handle_enabled = value.eq_ignore_ascii_case("true") || value == "1";
                continue;
            }

            let in_log_section = kind
                .log_section()
                .is_none_or(|wanted| section.eq_ignore_ascii_case(wanted));
            if log_file.is_none()
                && in_log_section
                && LOG_FILE_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
                && !value.is_empty()
                && !value.eq_ignore_ascii_case("none")
            {
                log_file = Some(Utf8PathBuf::from(value));
            }
        }

        Self {
            path: path.to_path_buf(),
            kind,
            pointer_handle_enabled,
            log_file,
        }
    }

    pub fn validate(&self) -> Result<(), CkpeError> {
        if self.pointer_handle_enabled {
            Ok(())
        } else {
            Err(CkpeError::PointerHandleDisabled {
                path: self.path.clone(),
            })
        }
    }

    /// Log file resolved against `game_dir` when relative.
    pub fn resolved_log_file(&self, game_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        self.log_file.as_ref().map(|log| {
            if log.is_absolute() || log.as_str().contains(':') {
                log.clone()
            } else {
                game_dir.join(log)
            }
        })
    }
}

/// Drop inline comments and surrounding quotes from a value.
fn strip_value(raw: &str) -> &str {
    let raw = raw.trim();
    if let Some(quoted) = raw.strip_prefix('"') {
        return quoted.split('"').next().unwrap_or_default();
    }
    raw.split([';', '#']).next().unwrap_or_default().trim()
}
