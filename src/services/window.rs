//! Synthetic desktop input for the editor's module-selection dialog.
//!
//! The editor has no headless mode: a dialog must be confirmed by keypress and
//! the main window does not close itself after the script finishes.
//! [`WindowAutomation`] is the seam the editor runner drives; tests substitute
//! it with a double that never touches a real window.
//!
//! [`DesktopAutomation`] talks to the Win32 API directly. Windows are matched
//! by owning executable as well as title, so a dialog with the same caption in
//! another program is never touched.

use super::process::{ProcessRunner, ToolCommand};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Window-level capabilities needed to drive the editor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WindowAutomation: Send + Sync {
    /// True if `process` owns a visible window titled `title`.
    async fn locate_window(&self, process: &str, title: &str) -> Result<bool>;

    /// Focus `process`'s `title` window and press Enter.
    async fn send_confirm(&self, process: &str, title: &str) -> Result<()>;

    /// Ask every window of `process` to close, then force-terminate it by
    /// name. Both steps are always attempted.
    async fn close_or_kill(&self, process: &str) -> Result<()>;
}

/// A visible top-level window and the executable that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    /// Raw `HWND` value
    pub handle: isize,
    pub title: String,
    /// File name of the owning process image, e.g. `FO4Edit.exe`
    pub image: String,
}

impl WindowInfo {
    /// True if this window belongs to `process` (`FO4Edit` or `FO4Edit.exe`).
    pub fn owned_by(&self, process: &str) -> bool {
        let process = process.to_lowercase();
        let image = self.image.to_lowercase();
        image == process || image == format!("{process}.exe")
    }
}

/// First window owned by `process` whose title is exactly `title`.
pub fn find_window<'a>(windows: &'a [WindowInfo], process: &str, title: &str) -> Option<&'a WindowInfo> {
    windows
        .iter()
        .find(|w| w.owned_by(process) && w.title.trim() == title)
}

/// [`WindowAutomation`] over the Win32 API, with `taskkill` as the last resort.
///
/// Only functional on Windows; elsewhere every call fails, which the editor
/// runner treats the same as "window not found".
pub struct DesktopAutomation {
    runner: Arc<dyn ProcessRunner>,
    close_grace: Duration,
}

impl DesktopAutomation {
    pub fn new(runner: Arc<dyn ProcessRunner>, close_grace: Duration) -> Self {
        Self {
            runner,
            close_grace,
        }
    }
}

async fn visible_windows() -> Result<Vec<WindowInfo>> {
    tokio::task::spawn_blocking(win32::top_level_windows)
        .await
        .context("Window enumeration task panicked")?
}

#[async_trait]
impl WindowAutomation for DesktopAutomation {
    async fn locate_window(&self, process: &str, title: &str) -> Result<bool> {
        let windows = visible_windows().await?;
        Ok(find_window(&windows, process, title).is_some())
    }

    async fn send_confirm(&self, process: &str, title: &str) -> Result<()> {
        let windows = visible_windows().await?;
        let Some(window) = find_window(&windows, process, title) else {
            bail!("No '{}' window owned by {}", title, process);
        };

        tracing::info!("Sending confirmation keypress to '{}' ({})", title, process);
        let handle = window.handle;
        tokio::task::spawn_blocking(move || win32::press_enter(handle))
            .await
            .context("Keyboard input task panicked")?
    }

    async fn close_or_kill(&self, process: &str) -> Result<()> {
        let windows = visible_windows().await?;

        let owned: Vec<&WindowInfo> = windows.iter().filter(|w| w.owned_by(process)).collect();
        if owned.is_empty() {
            tracing::debug!("No windows owned by {}, it may have exited", process);
        }
        for window in owned {
            if let Err(e) = win32::request_close(window.handle) {
                tracing::warn!("Graceful close of '{}' failed: {:#}", window.title, e);
            }
        }
        tokio::time::sleep(self.close_grace).await;

        let kill = ToolCommand::new("taskkill")
            .args(["/F", "/IM"])
            .arg(format!("{process}.exe"));
        let output = self.runner.run(&kill).await?;
        // 128: no such process, i.e. the graceful close worked
        if !output.success() && output.exit_code != 128 {
            tracing::debug!(
                "taskkill for {} exited with code {}: {}",
                process,
                output.exit_code,
                output.stdout.trim()
            );
        }
        Ok(())
    }
}

#[cfg(windows)]
mod win32 {
    use super::WindowInfo;
    use anyhow::{Context, Result, bail};
    use std::thread;
    use std::time::Duration;
    use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, WPARAM};
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
    };
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        INPUT, INPUT_0, INPUT_KEYBOARD, KEYBD_EVENT_FLAGS, KEYBDINPUT, KEYEVENTF_KEYUP, SendInput, VK_RETURN,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
        PostMessageW, SetForegroundWindow, WM_CLOSE,
    };
    use windows::core::{BOOL, PWSTR};

    fn hwnd(handle: isize) -> HWND {
        HWND(handle as *mut _)
    }

    unsafe extern "system" fn collect_handle(window: HWND, lparam: LPARAM) -> BOOL {
        // SAFETY: lparam is the Vec passed to EnumWindows, alive for the whole enumeration
        let handles = unsafe { &mut *(lparam.0 as *mut Vec<isize>) };
        handles.push(window.0 as isize);
        true.into()
    }

    pub fn top_level_windows() -> Result<Vec<WindowInfo>> {
        let mut handles: Vec<isize> = Vec::new();
        // SAFETY: the callback only touches `handles`, which outlives the call
        unsafe {
            EnumWindows(
                Some(collect_handle),
                LPARAM(&mut handles as *mut Vec<isize> as isize),
            )
        }
        .context("EnumWindows failed")?;

        Ok(handles.into_iter().filter_map(describe).collect())
    }

    fn describe(handle: isize) -> Option<WindowInfo> {
        let window = hwnd(handle);
        // SAFETY: a handle that closed since enumeration makes these calls fail, nothing more
        unsafe {
            if !IsWindowVisible(window).as_bool() {
                return None;
            }
            let mut title = [0u16; 512];
            let len = GetWindowTextW(window, &mut title).max(0) as usize;

            let mut pid = 0u32;
            GetWindowThreadProcessId(window, Some(&mut pid as *mut u32));

            Some(WindowInfo {
                handle,
                title: String::from_utf16_lossy(&title[..len]),
                image: process_image(pid)?,
            })
        }
    }

    fn process_image(pid: u32) -> Option<String> {
        // SAFETY: the buffer length is passed in and updated by the call; the handle is closed before returning
        unsafe {
            let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
            let mut buf = [0u16; 1024];
            let mut len = buf.len() as u32;
            let queried = QueryFullProcessImageNameW(
                process,
                PROCESS_NAME_WIN32,
                PWSTR(buf.as_mut_ptr()),
                &mut len,
            );
            let _ = CloseHandle(process);
            queried.ok()?;

            let path = String::from_utf16_lossy(&buf[..len as usize]);
            path.rsplit(['\\', '/']).next().map(str::to_string)
        }
    }

    pub fn press_enter(handle: isize) -> Result<()> {
        let window = hwnd(handle);
        // SAFETY: plain calls on a window handle; failure is detected below
        unsafe {
            let _ = SetForegroundWindow(window);
        }
        thread::sleep(Duration::from_millis(250));

        // SendInput targets whatever has focus
        if unsafe { GetForegroundWindow() } != window {
            bail!("Window did not come to the foreground; not sending input");
        }

        let key = |flags: KEYBD_EVENT_FLAGS| INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VK_RETURN,
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        let inputs = [key(KEYBD_EVENT_FLAGS(0)), key(KEYEVENTF_KEYUP)];

        // SAFETY: `inputs` is a fully initialized INPUT array and cbsize is its element size
        let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            bail!("SendInput delivered {} of {} key events", sent, inputs.len());
        }
        Ok(())
    }

    pub fn request_close(handle: isize) -> Result<()> {
        // SAFETY: posting WM_CLOSE does not wait on the target window
        unsafe { PostMessageW(Some(hwnd(handle)), WM_CLOSE, WPARAM(0), LPARAM(0)) }
            .context("PostMessageW(WM_CLOSE) failed")
    }
}

#[cfg(not(windows))]
mod win32 {
    use super::WindowInfo;
    use anyhow::{Result, bail};

    pub fn top_level_windows() -> Result<Vec<WindowInfo>> {
        bail!("Window automation is only available on Windows")
    }

    pub fn press_enter(_handle: isize) -> Result<()> {
        bail!("Window automation is only available on Windows")
    }

    pub fn request_close(_handle: isize) -> Result<()> {
        bail!("Window automation is only available on Windows")
    }
}
