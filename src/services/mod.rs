//! Services module - the tool-facing building blocks of the pipeline.
//!
//! Nothing here knows about step order; the [`workflow`](crate::workflow)
//! engine sequences these.
//!
//! # Components
//!
//! - [`preconditions`]: read-only filesystem checks gating each step
//! - [`dll_guard`]: [`DllDisableSet`] and [`with_dlls_disabled`], renaming
//!   graphics-hook DLLs out of the Creation Kit's way for one invocation
//! - [`process`]: [`ToolCommand`] and the [`ProcessRunner`] seam, including
//!   Mod Organizer 2 wrapping
//! - [`window`]: the [`WindowAutomation`] seam used to confirm xEdit's
//!   module-selection dialog and close its window
//! - [`run_log`]: the per-run plain-text log artifact
//! - [`content_tool`]: [`ContentToolRunner`], parameterized over the four
//!   Creation Kit operations
//! - [`editor_script`]: [`EditorScriptRunner`] for the two xEdit merge scripts
//! - [`archive`]: [`ArchiveService`] over Archive2 and BSArch
//!
//! # Outcome inference
//!
//! None of the external tools report status reliably. Runners infer
//! [`StepOutcome`](crate::models::StepOutcome) from artifacts on disk and log
//! text, and return `Err` only when the plumbing itself failed (a file could
//! not be deleted, a process could not be launched).

pub mod archive;
pub mod content_tool;
pub mod dll_guard;
pub mod editor_script;
pub mod preconditions;
pub mod process;
pub mod run_log;
pub mod window;

pub use archive::ArchiveService;
pub use content_tool::{ContentToolOperation, ContentToolRunner, ExpectedArtifact};
pub use dll_guard::{DISABLED_SUFFIX, DllDisableSet, with_dlls_disabled};
pub use editor_script::{EditorScriptRunner, SCRIPT_MERGE_COMBINED, SCRIPT_MERGE_PREVIS};
pub use preconditions::{Precondition, Unmet, directory_has_files, file_exists};
pub use process::{ProcessRunner, TokioProcessRunner, ToolCommand, ToolOutput};
pub use run_log::RunLog;
pub use window::{DesktopAutomation, WindowAutomation};
