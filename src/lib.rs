// PrevisGen - Automated precombine and previs generation for Fallout 4 plugins
//
// This is the library crate containing the workflow engine and the tool runners.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod ui;
pub mod workflow;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{ArchiveBackend, BuildMode, PluginIdentity, RunConfig, Settings, StepOutcome, WorkflowStep};
pub use state::{StateChange, StateManager};
pub use workflow::{Operator, RunReport, WorkflowEngine, WorkflowError};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
