//! Filesystem checks that gate each workflow step.
//!
//! All queries are read-only. Deleting a non-empty gating directory is never
//! done here; the engine asks the operator first.

use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobMatcher};
use std::fs;
use walkdir::WalkDir;

/// True if `path` (recursively) contains at least one regular file whose
/// name matches the glob `pattern` (e.g. `"*.nif"`). Matching is
/// case-insensitive. A missing directory has no files.
pub fn directory_has_files(path: &Utf8Path, pattern: &str) -> bool {
    let Some(matcher) = compile(pattern) else {
        tracing::warn!("Invalid file pattern '{}', treating {} as empty", pattern, path);
        return false;
    };

    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .any(|e| matcher.is_match(e.file_name()))
}

/// Count files under `path` matching `pattern`.
pub fn count_files(path: &Utf8Path, pattern: &str) -> usize {
    let Some(matcher) = compile(pattern) else {
        return 0;
    };

    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| matcher.is_match(e.file_name()))
        .count()
}

/// True if `path` exists and is a regular file.
pub fn file_exists(path: &Utf8Path) -> bool {
    path.is_file()
}

/// True if `path` is missing or has no entries at all.
pub fn is_directory_empty(path: &Utf8Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            // Unreadable is not empty; refuse to treat it as safe to write into
            tracing::warn!("Failed to read directory '{}': {}", path, e);
            false
        }
    }
}

/// Plugin files in `data_root` whose name contains `needle` (case-insensitive).
pub fn find_plugins_containing(data_root: &Utf8Path, needle: &str) -> Vec<String> {
    let needle = needle.to_lowercase();
    let Ok(entries) = data_root.read_dir_utf8() else {
        return Vec::new();
    };

    let mut found: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string())
        .filter(|name| {
            let lower = name.to_lowercase();
            (lower.ends_with(".esp") || lower.ends_with(".esm") || lower.ends_with(".esl"))
                && lower.contains(&needle)
        })
        .collect();
    found.sort();
    found
}

fn compile(pattern: &str) -> Option<GlobMatcher> {
    globset::GlobBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .ok()
        .map(|g: Glob| g.compile_matcher())
}

/// A single gating condition checked before a step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Directory must be missing or empty. Unmet is operator-correctable.
    EmptyDirectory { dir: Utf8PathBuf, label: String },
    /// At least one of `dirs` must contain files matching `pattern`.
    HasFiles {
        dirs: Vec<Utf8PathBuf>,
        pattern: String,
        label: String,
    },
    /// At least one of `candidates` must exist as a file.
    FileExists { candidates: Vec<Utf8PathBuf> },
}

/// Verdict on an unmet [`Precondition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmet {
    /// Leftovers present; the operator may confirm deleting `dir`.
    Recoverable { dir: Utf8PathBuf, label: String },
    /// Required input missing; only fixing the external cause helps.
    Missing(String),
}

impl Precondition {
    pub fn empty_directory(dir: Utf8PathBuf, label: &str) -> Self {
        Self::EmptyDirectory {
            dir,
            label: label.to_string(),
        }
    }

    pub fn has_files(dirs: Vec<Utf8PathBuf>, pattern: &str, label: &str) -> Self {
        Self::HasFiles {
            dirs,
            pattern: pattern.to_string(),
            label: label.to_string(),
        }
    }

    pub fn file_exists(candidates: Vec<Utf8PathBuf>) -> Self {
        Self::FileExists { candidates }
    }

    pub fn check(&self) -> Result<(), Unmet> {
        match self {
            Precondition::EmptyDirectory { dir, label } => {
                if is_directory_empty(dir) {
                    Ok(())
                } else {
                    Err(Unmet::Recoverable {
                        dir: dir.clone(),
                        label: label.clone(),
                    })
                }
            }
            Precondition::HasFiles {
                dirs,
                pattern,
                label,
            } => {
                if dirs.iter().any(|dir| directory_has_files(dir, pattern)) {
                    Ok(())
                } else {
                    Err(Unmet::Missing(format!("No {pattern} files found in {label}")))
                }
            }
            Precondition::FileExists { candidates } => {
                if candidates.iter().any(|path| file_exists(path)) {
                    Ok(())
                } else {
                    let paths: Vec<&str> = candidates.iter().map(|p| p.as_str()).collect();
                    Err(Unmet::Missing(format!(
                        "Required file not found: {}",
                        paths.join(" or ")
                    )))
                }
            }
        }
    }
}
