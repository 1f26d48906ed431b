// UI module - command line and terminal interaction
//
// This module contains:
// - Args: clap command line definition
// - DialoguerOperator and prompts: interactive confirmations
// - Progress printer: StateManager events rendered as console lines

pub mod cli;
pub mod progress;
pub mod prompts;

pub use cli::Args;
pub use progress::spawn_progress_printer;
pub use prompts::{DialoguerOperator, prompt_plugin_name, prompt_start_step};
