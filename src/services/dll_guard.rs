//! Scoped disable/restore of graphics-hook DLLs around content-tool runs.
//!
//! The Creation Kit crashes when ENB/ReShade style hooks (`d3d11.dll`,
//! `dxgi.dll`, ...) sit next to it. [`DllDisableSet`] renames them by appending
//! [`DISABLED_SUFFIX`] and puts them back when released or dropped.
//!
//! Both directions are idempotent: a file already in disabled form is left
//! alone on acquire and picked up for restore, so a set acquired after a crashed
//! run also repairs what that run left behind.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::future::Future;

pub const DISABLED_SUFFIX: &str = "-PJMdisabled";

/// `d3d11.dll` -> `d3d11.dll-PJMdisabled`
pub fn disabled_path(dll: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{dll}{DISABLED_SUFFIX}"))
}

/// DLLs currently renamed to their disabled form.
///
/// Created on content-tool entry; restored on every exit path. Dropping the
/// set restores too, so an early `?` return inside the guarded body cannot
/// leave DLLs disabled.
#[derive(Debug)]
pub struct DllDisableSet {
    /// Original (enabled) paths of every DLL this set is responsible for
    disabled: Vec<Utf8PathBuf>,
    released: bool,
}

impl DllDisableSet {
    /// Disable every DLL in `names` present in `tool_dir`.
    ///
    /// If a rename fails part-way, the DLLs already renamed are restored
    /// before the error is returned.
    pub fn acquire(tool_dir: &Utf8Path, names: &[String]) -> Result<Self> {
        let mut set = Self {
            disabled: Vec::new(),
            released: false,
        };

        for name in names {
            let live = tool_dir.join(name);
            let parked = disabled_path(&live);

            match (live.is_file(), parked.is_file()) {
                (true, true) => {
                    bail!(
                        "Both {} and {} exist; remove one of them before running the Creation Kit",
                        live,
                        parked
                    );
                }
                (true, false) => {
                    fs::rename(&live, &parked).with_context(|| {
                        format!("Failed to disable DLL: {} -> {}", live, parked)
                    })?;
                    tracing::info!("Disabled DLL: {}", name);
                    set.disabled.push(live);
                }
                (false, true) => {
                    tracing::info!("DLL already disabled, will restore afterwards: {}", name);
                    set.disabled.push(live);
                }
                (false, false) => {}
            }
        }

        if !set.disabled.is_empty() {
            tracing::info!("DLL Guard: {} DLL(s) disabled", set.disabled.len());
        }

        Ok(set)
    }

    /// Paths (in enabled form) this set will restore.
    pub fn disabled(&self) -> &[Utf8PathBuf] {
        &self.disabled
    }

    /// Rename every disabled DLL back. Returns the number restored.
    ///
    /// Every DLL is attempted even if an earlier one fails; the first failure
    /// is reported.
    pub fn restore(mut self) -> Result<usize> {
        self.released = true;
        restore_all(&self.disabled)
    }
}

impl Drop for DllDisableSet {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match restore_all(&self.disabled) {
            Ok(count) if count > 0 => tracing::info!("DLL Guard: Restored {} DLL(s)", count),
            Ok(_) => {}
            Err(e) => tracing::warn!("DLL Guard: Failed to restore DLLs: {:#}", e),
        }
    }
}

fn restore_all(dlls: &[Utf8PathBuf]) -> Result<usize> {
    let mut restored = 0;
    let mut first_error = None;

    for live in dlls {
        let parked = disabled_path(live);
        if !parked.is_file() {
            tracing::warn!("Disabled DLL not found, skipping: {}", parked);
            continue;
        }
        if live.exists() {
            tracing::warn!("{} reappeared while disabled, leaving {} in place", live, parked);
            continue;
        }

        match fs::rename(&parked, live) {
            Ok(()) => {
                tracing::info!("Restored DLL: {}", live.file_name().unwrap_or(live.as_str()));
                restored += 1;
            }
            Err(e) => {
                let err = anyhow::Error::new(e)
                    .context(format!("Failed to restore DLL: {} -> {}", parked, live));
                tracing::warn!("{:#}", err);
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(restored),
    }
}

/// Run `body` with the DLLs in `names` disabled in `tool_dir`.
///
/// The DLLs are restored whether `body` succeeds or fails. A restore failure
/// is only reported when `body` itself succeeded; otherwise the body's error
/// wins and the restore failure is logged.
pub async fn with_dlls_disabled<F, Fut, T>(tool_dir: &Utf8Path, names: &[String], body: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let set = DllDisableSet::acquire(tool_dir, names)?;
    let result = body().await;
    let restored = set.restore();

    match (result, restored) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(restore_err)) => Err(restore_err),
        (Err(body_err), Ok(_)) => Err(body_err),
        (Err(body_err), Err(restore_err)) => {
            tracing::warn!("DLL restore also failed: {:#}", restore_err);
            Err(body_err)
        }
    }
}
