//! Data models for PrevisGen.
//!
//! - [`BuildMode`], [`ArchiveBackend`] and [`WorkflowStep`]: the fixed enumerations a run is shaped by
//! - [`PluginIdentity`]: a validated target plugin name and the artifact names derived from it
//! - [`RunConfig`]: the fully resolved configuration handed to the workflow engine
//! - [`Settings`]: persistent user settings loaded by [`ConfigManager`](crate::config::ConfigManager)
//! - [`StepOutcome`]: Success / Warning / Fatal result of a tool invocation or step

pub mod build;
pub mod config;
pub mod outcome;
pub mod plugin;

pub use build::{ArchiveBackend, BuildMode, WorkflowStep};
pub use config::{
    COMBINED_OBJECTS_PLUGIN, ConfigError, DEFAULT_DISABLED_DLLS, LogPaths, OutputRoots, PRECOMBINED_RELPATH,
    PREVIS_PLUGIN, RunConfig, Settings, Timings, ToolPaths, VIS_RELPATH,
};
pub use outcome::StepOutcome;
pub use plugin::{PluginIdentity, PluginNameError, RESERVED_NAMES, SEED_PLUGIN};
