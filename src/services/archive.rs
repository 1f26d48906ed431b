//! BA2 archive creation over two packers.
//!
//! - **Archive2** (primary) can create and extract but not append. Append is
//!   emulated: extract into place, set the old archive aside as `.bak`,
//!   recreate over the union, and only then delete the `.bak`.
//! - **BSArch** (community) packs a directory and merges into an existing
//!   archive. Sources are moved into a staging root first and moved back if
//!   packing fails, since the move consumes the only copy.
//!
//! When tools run through MO2 their output lands in the overwrite directory.
//! Before packing, files under each source there are copied into the data
//! root; after a successful pack the overwrite copies are removed, and after
//! a failed one the data-root copies are.
//!
//! Every operation returns a [`StepOutcome`]; `Err` is left for plumbing
//! failures that happen before anything was touched.

use super::process::{ProcessRunner, ToolCommand, ToolOutput};
use super::run_log::RunLog;
use crate::models::{ArchiveBackend, BuildMode, RunConfig, StepOutcome};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use walkdir::WalkDir;

/// Extraction root for the primary append emulation, inside the data root.
pub const EXTRACT_ROOT: &str = "_previsgen_extract";

/// Staging root for the community packer, inside the data root.
pub const STAGE_ROOT: &str = "_previsgen_stage";

pub const BACKUP_SUFFIX: &str = ".bak";

pub struct ArchiveService {
    process: Arc<dyn ProcessRunner>,
    run_log: RunLog,
    backend: ArchiveBackend,
    packer: Utf8PathBuf,
    data_root: Utf8PathBuf,
    archive: Utf8PathBuf,
    xbox: bool,
    overwrite: Option<Utf8PathBuf>,
}

/// Files copied out of the MO2 overwrite directory for one operation.
#[derive(Debug, Default)]
struct Collected {
    /// Data-root copies
    copied: Vec<Utf8PathBuf>,
    /// Data-root source directories that did not exist before collecting
    created_dirs: Vec<Utf8PathBuf>,
    /// Overwrite directories the copies came from
    origins: Vec<Utf8PathBuf>,
}

impl ArchiveService {
    pub fn new(config: &RunConfig, process: Arc<dyn ProcessRunner>, run_log: RunLog) -> Self {
        Self {
            process,
            run_log,
            backend: config.archive_backend,
            packer: config.tools.packer.clone(),
            data_root: config.data_root.clone(),
            archive: config.archive_path(),
            xbox: config.build_mode == BuildMode::Xbox,
            overwrite: config.mo2_data_dir.clone(),
        }
    }

    pub fn archive_path(&self) -> &Utf8Path {
        &self.archive
    }

    pub fn backup_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}{}", self.archive, BACKUP_SUFFIX))
    }

    /// Pack `sources` (relative to the data root) into a new archive.
    pub async fn create(&self, sources: &[&str]) -> Result<StepOutcome> {
        self.run_log
            .section(&format!("{}: create {}", self.backend.tool_name(), self.archive))?;

        if self.archive.exists() {
            return Ok(StepOutcome::fatal(format!(
                "Archive already exists: {} (remove it or resume from a later step)",
                self.archive
            )));
        }

        let collected = match self.collect_from_overwrite(sources) {
            Ok(collected) => collected,
            Err(e) => return Ok(StepOutcome::fatal(format!("{:#}", e))),
        };

        let present: Vec<&str> = sources
            .iter()
            .copied()
            .filter(|rel| self.data_root.join(rel).exists())
            .collect();
        if present.is_empty() {
            return Ok(StepOutcome::fatal(format!(
                "Nothing to archive: none of {} exist in {}",
                sources.join(", "),
                self.data_root
            )));
        }

        let outcome = match self.backend {
            ArchiveBackend::Primary => self.primary_create(&present).await,
            ArchiveBackend::Community => self.community_pack(&present).await,
        };
        self.settle_collected(outcome, &collected)
    }

    /// Add `new_sources` to the existing archive.
    pub async fn append(&self, new_sources: &[&str]) -> Result<StepOutcome> {
        self.run_log
            .section(&format!("{}: append to {}", self.backend.tool_name(), self.archive))?;

        if !self.archive.is_file() {
            return Ok(StepOutcome::fatal(format!(
                "Archive does not exist: {}",
                self.archive
            )));
        }

        let collected = match self.collect_from_overwrite(new_sources) {
            Ok(collected) => collected,
            Err(e) => return Ok(StepOutcome::fatal(format!("{:#}", e))),
        };

        let present: Vec<&str> = new_sources
            .iter()
            .copied()
            .filter(|rel| self.data_root.join(rel).exists())
            .collect();
        if present.is_empty() {
            return Ok(StepOutcome::fatal(format!(
                "Nothing to add: none of {} exist in {}",
                new_sources.join(", "),
                self.data_root
            )));
        }

        let outcome = if self.backend.supports_append() {
            self.community_pack(&present).await
        } else if self.backend.supports_extract() {
            self.primary_append(&present).await
        } else {
            Ok(StepOutcome::fatal(format!(
                "{} can neither append nor extract",
                self.backend.tool_name()
            )))
        };
        self.settle_collected(outcome, &collected)
    }

    // ---- MO2 overwrite --------------------------------------------------

    /// Copy files under each of `sources` in the overwrite directory into
    /// the data root. Existing data-root files are kept.
    fn collect_from_overwrite(&self, sources: &[&str]) -> Result<Collected> {
        let mut collected = Collected::default();
        let Some(overwrite) = &self.overwrite else {
            return Ok(collected);
        };

        for rel in sources {
            let origin = overwrite.join(rel);
            let files = files_under(&origin);
            if files.is_empty() {
                tracing::debug!("Nothing to collect from {}", origin);
                continue;
            }

            let dest = self.data_root.join(rel);
            if !dest.exists() {
                collected.created_dirs.push(dest.clone());
            }
            if let Err(e) = copy_files_into(&origin, &files, &dest, &mut collected.copied) {
                discard_copies(&collected);
                return Err(e.context(format!("Failed to collect {} from MO2 overwrite", rel)));
            }
            tracing::info!("Collected {} file(s) from {}", files.len(), origin);
            collected.origins.push(origin);
        }
        Ok(collected)
    }

    /// Finish an operation that may have used collected files: on success
    /// the overwrite originals go, on failure the data-root copies do.
    fn settle_collected(&self, outcome: Result<StepOutcome>, collected: &Collected) -> Result<StepOutcome> {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                discard_copies(collected);
                return Err(e);
            }
        };

        if outcome.is_fatal() {
            discard_copies(collected);
            return Ok(outcome);
        }

        let mut outcome = outcome;
        for origin in &collected.origins {
            // Loose files in the overwrite would shadow the archive in game
            if let Err(e) = remove_path(origin) {
                outcome = outcome.and(StepOutcome::warning(format!(
                    "Archived but failed to remove {} from the MO2 overwrite: {}",
                    origin, e
                )));
            }
        }
        Ok(outcome)
    }

    // ---- Archive2 -------------------------------------------------------

    fn archive2_create_command(&self, sources: &[&str]) -> ToolCommand {
        let joined = sources
            .iter()
            .map(|rel| native(rel))
            .collect::<Vec<_>>()
            .join(",");
        let mut cmd = ToolCommand::new(self.packer.clone())
            .arg(joined)
            .arg(format!("-c={}", self.archive))
            .args(["-f=General", "-q"])
            .current_dir(self.data_root.clone());
        if self.xbox {
            cmd = cmd.arg("-compression=XBox");
        }
        cmd
    }

    fn archive2_extract_command(&self, source: &Utf8Path, dest: &Utf8Path) -> ToolCommand {
        ToolCommand::new(self.packer.clone())
            .arg(source.as_str())
            .arg(format!("-e={}", dest))
            .arg("-q")
            .current_dir(self.data_root.clone())
    }

    async fn primary_create(&self, sources: &[&str]) -> Result<StepOutcome> {
        let output = self.invoke(&self.archive2_create_command(sources)).await?;

        if !output.success() {
            return Ok(StepOutcome::fatal(format!(
                "Archive2 exited with code {} creating {}",
                output.exit_code, self.archive
            )));
        }
        if !self.archive.is_file() {
            return Ok(StepOutcome::fatal(format!(
                "Archive2 did not create {}",
                self.archive
            )));
        }

        tracing::info!("Created archive: {}", self.archive);

        // Loose files would override the archive in game
        let mut outcome = StepOutcome::Success;
        for rel in sources {
            let dir = self.data_root.join(rel);
            if let Err(e) = remove_path(&dir) {
                outcome = outcome.and(StepOutcome::warning(format!(
                    "Archived but failed to remove loose files in {}: {}",
                    dir, e
                )));
            }
        }
        Ok(outcome)
    }

    async fn primary_append(&self, new_sources: &[&str]) -> Result<StepOutcome> {
        let extract_root = self.data_root.join(EXTRACT_ROOT);
        if extract_root.exists() {
            return Ok(StepOutcome::fatal(format!(
                "Leftover extraction directory from an earlier run: {} (inspect and remove it)",
                extract_root
            )));
        }
        let backup = self.backup_path();
        if backup.exists() {
            return Ok(StepOutcome::fatal(format!(
                "Backup from an interrupted append already exists: {} (it may be the only good copy; \
                 restore or remove it)",
                backup
            )));
        }

        fs::create_dir_all(&extract_root)
            .with_context(|| format!("Failed to create {}", extract_root))?;

        tracing::info!("Archive2 cannot append; extracting {}", self.archive);
        let output = self
            .invoke(&self.archive2_extract_command(&self.archive, &extract_root))
            .await?;
        if !output.success() {
            discard_dir(&extract_root);
            return Ok(StepOutcome::fatal(format!(
                "Archive2 exited with code {} extracting {}",
                output.exit_code, self.archive
            )));
        }

        let extracted = files_under(&extract_root);
        if extracted.is_empty() {
            discard_dir(&extract_root);
            return Ok(StepOutcome::fatal(format!(
                "Extracting {} produced no files; archive left untouched",
                self.archive
            )));
        }
        tracing::info!("Extracted {} file(s)", extracted.len());

        let original_roots = source_roots(&extracted);
        if let Err(e) = move_files_into(&extract_root, &extracted, &self.data_root) {
            return Ok(StepOutcome::fatal(format!(
                "Failed to move extracted files into place ({:#}); archive left untouched, \
                 partial extraction in {}",
                e, extract_root
            )));
        }
        discard_dir(&extract_root);

        if let Err(e) = fs::rename(&self.archive, &backup) {
            return Ok(StepOutcome::fatal(format!(
                "Failed to set aside {} as {}: {}",
                self.archive, backup, e
            )));
        }

        let mut union: Vec<&str> = original_roots.iter().map(String::as_str).collect();
        for rel in new_sources {
            if !union.contains(rel) {
                union.push(*rel);
            }
        }

        let outcome = match self.primary_create(&union).await {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::fatal(format!("{:#}", e)),
        };

        if outcome.is_fatal() {
            self.restore_backup(&backup);
            return Ok(outcome);
        }

        if let Err(e) = fs::remove_file(&backup) {
            return Ok(outcome.and(StepOutcome::warning(format!(
                "New archive written but failed to delete {}: {}",
                backup, e
            ))));
        }
        Ok(outcome)
    }

    fn restore_backup(&self, backup: &Utf8Path) {
        if self.archive.exists() {
            if let Err(e) = fs::remove_file(&self.archive) {
                tracing::error!("Failed to remove incomplete {}: {}", self.archive, e);
                return;
            }
        }
        match fs::rename(backup, &self.archive) {
            Ok(()) => tracing::info!("Restored previous archive {}", self.archive),
            Err(e) => tracing::error!(
                "Failed to restore {} from {}: {}",
                self.archive,
                backup,
                e
            ),
        }
    }

    // ---- BSArch ---------------------------------------------------------

    fn bsarch_pack_command(&self, root: &Utf8Path) -> ToolCommand {
        ToolCommand::new(self.packer.clone())
            .arg("pack")
            .arg(root.as_str())
            .arg(self.archive.as_str())
            .args(["-mt", "-fo4", "-z"])
            .current_dir(self.data_root.clone())
    }

    /// Move `sources` into the staging root and pack it. On failure every
    /// moved path is put back.
    async fn community_pack(&self, sources: &[&str]) -> Result<StepOutcome> {
        let stage = self.data_root.join(STAGE_ROOT);
        if stage.exists() {
            return Ok(StepOutcome::fatal(format!(
                "Leftover staging directory from an earlier run: {} (move its contents back and remove it)",
                stage
            )));
        }

        let mut outcome = StepOutcome::Success;
        if self.xbox {
            let msg = "BSArch has no Xbox compression option; archive uses the default format";
            tracing::warn!("{}", msg);
            outcome = StepOutcome::warning(msg);
        }

        let mut moved: Vec<&str> = Vec::new();
        for rel in sources {
            if let Err(e) = move_path(&self.data_root, &stage, rel) {
                self.unstage(&stage, &moved);
                return Ok(StepOutcome::fatal(format!(
                    "Failed to stage {}: {:#}",
                    rel, e
                )));
            }
            moved.push(*rel);
        }

        let packed = match self.invoke(&self.bsarch_pack_command(&stage)).await {
            Ok(output) if output.success() && self.archive.is_file() => Ok(()),
            Ok(output) if output.success() => Err(format!("BSArch did not create {}", self.archive)),
            Ok(output) => Err(format!(
                "BSArch exited with code {} packing {}",
                output.exit_code, self.archive
            )),
            Err(e) => Err(format!("{:#}", e)),
        };

        if let Err(reason) = packed {
            self.unstage(&stage, &moved);
            return Ok(StepOutcome::fatal(reason));
        }

        tracing::info!("Packed {} into {}", sources.join(", "), self.archive);
        if let Err(e) = fs::remove_dir_all(&stage) {
            outcome = outcome.and(StepOutcome::warning(format!(
                "Archive written but failed to remove staging directory {}: {}",
                stage, e
            )));
        }
        Ok(outcome)
    }

    fn unstage(&self, stage: &Utf8Path, moved: &[&str]) {
        for rel in moved {
            match move_path(stage, &self.data_root, rel) {
                Ok(()) => tracing::info!("Moved {} back out of staging", rel),
                Err(e) => tracing::error!(
                    "Failed to move {} back from {}: {:#}",
                    rel,
                    stage,
                    e
                ),
            }
        }
        if moved.iter().all(|rel| !stage.join(rel).exists()) {
            discard_dir(stage);
        }
    }

    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput> {
        self.run_log.command(command)?;
        let output = self.process.run(command).await?;
        self.run_log.output(&output)?;
        Ok(output)
    }
}

/// `meshes/precombined` with the platform separator.
fn native(rel: &str) -> String {
    rel.replace('/', std::path::MAIN_SEPARATOR_STR)
}

/// Every regular file under `root`, relative to it, `/`-separated.
fn files_under(root: &Utf8Path) -> Vec<Utf8PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?;
            Utf8PathBuf::from_path_buf(rel.to_path_buf()).ok()
        })
        .collect()
}

/// Smallest set of directories covering every file in `files`.
///
/// Files at the top level are returned as themselves.
pub fn source_roots(files: &[Utf8PathBuf]) -> Vec<String> {
    let dirs: BTreeSet<String> = files
        .iter()
        .map(|f| match f.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.as_str().replace('\\', "/"),
            _ => f.as_str().replace('\\', "/"),
        })
        .collect();

    dirs.iter()
        .filter(|dir| {
            !dirs
                .iter()
                .any(|other| other != *dir && dir.starts_with(&format!("{}/", other)))
        })
        .cloned()
        .collect()
}

/// Copy each relative file from `from_root` to `to_root`, recording every
/// copy made. Existing destination files are kept.
fn copy_files_into(
    from_root: &Utf8Path,
    files: &[Utf8PathBuf],
    to_root: &Utf8Path,
    copied: &mut Vec<Utf8PathBuf>,
) -> Result<()> {
    for rel in files {
        let dst = to_root.join(rel);
        if dst.exists() {
            tracing::warn!("Keeping existing data file over MO2 overwrite copy: {}", dst);
            continue;
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent))?;
        }
        let src = from_root.join(rel);
        fs::copy(&src, &dst).with_context(|| format!("Failed to copy {} to {}", src, dst))?;
        copied.push(dst);
    }
    Ok(())
}

/// Remove the data-root copies of a collection, then any source directory
/// the collection created that is left without files.
fn discard_copies(collected: &Collected) {
    for copy in &collected.copied {
        if let Err(e) = fs::remove_file(copy) {
            tracing::warn!("Failed to remove collected copy {}: {}", copy, e);
        }
    }
    for dir in &collected.created_dirs {
        if dir.exists() && files_under(dir).is_empty() {
            discard_dir(dir);
        }
    }
}

/// Move each relative file from `from_root` to `to_root`. Existing
/// destination files are kept; the loose copy is the newer one.
fn move_files_into(from_root: &Utf8Path, files: &[Utf8PathBuf], to_root: &Utf8Path) -> Result<()> {
    for rel in files {
        let dst = to_root.join(rel);
        if dst.exists() {
            tracing::warn!("Keeping existing loose file over archived copy: {}", dst);
            continue;
        }
        move_path(from_root, to_root, rel.as_str())?;
    }
    Ok(())
}

fn move_path(from_root: &Utf8Path, to_root: &Utf8Path, rel: &str) -> Result<()> {
    let src = from_root.join(rel);
    let dst = to_root.join(rel);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent))?;
    }
    fs::rename(&src, &dst).with_context(|| format!("Failed to move {} -> {}", src, dst))
}

fn remove_path(path: &Utf8Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    }
}

fn discard_dir(path: &Utf8Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path, e);
        }
    }
}
