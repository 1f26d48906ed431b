//! Terminal prompts (dialoguer).

use crate::models::{BuildMode, PluginIdentity, WorkflowStep};
use crate::workflow::Operator;
use anyhow::Result;
use camino::Utf8Path;
use dialoguer::{Confirm, Input, Select};

/// [`Operator`] that asks on the terminal.
///
/// A prompt that cannot be shown (no TTY, Ctrl+C) counts as "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerOperator;

impl DialoguerOperator {
    pub fn new() -> Self {
        Self
    }

    fn confirm(prompt: String, default: bool) -> bool {
        match Confirm::new().with_prompt(prompt).default(default).interact() {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Prompt failed, treating as no: {}", e);
                false
            }
        }
    }
}

impl Operator for DialoguerOperator {
    fn confirm_wipe(&self, dir: &Utf8Path, label: &str) -> bool {
        Self::confirm(
            format!("Directory '{}' ({}) is not empty. Delete its contents?", label, dir),
            false,
        )
    }

    fn confirm_xprevispatch(&self, found: &[String]) -> bool {
        println!();
        for plugin in found {
            println!("  Found: {}", plugin);
        }
        Self::confirm(
            "xPrevisPatch plugins can conflict with the new previs. Continue without renaming them?"
                .to_string(),
            false,
        )
    }

    fn confirm_missing_plugin(&self, plugin: &str) -> bool {
        Self::confirm(
            format!("{} was not found. Continue and let the Creation Kit create it?", plugin),
            false,
        )
    }

    fn confirm_remove_working_files(&self, files: &[String]) -> bool {
        println!();
        println!("The following working files can be removed:");
        for file in files {
            println!("  - {}", file);
        }
        Self::confirm("Remove working files?".to_string(), true)
    }
}

/// Ask for the plugin name until it validates for `mode`.
pub fn prompt_plugin_name(mode: BuildMode) -> Result<PluginIdentity> {
    loop {
        let input: String = Input::new()
            .with_prompt("Plugin to generate precombines and previs for")
            .interact_text()?;

        match PluginIdentity::parse(&input, mode) {
            Ok(plugin) => return Ok(plugin),
            Err(e) => println!("{}", e),
        }
    }
}

/// Ask where to start when the plugin already exists.
///
/// `None` means the operator chose to exit.
pub fn prompt_start_step(plugin: &Utf8Path, mode: BuildMode) -> Result<Option<WorkflowStep>> {
    println!();
    println!("Plugin already exists: {}", plugin);

    let mut items: Vec<String> = WorkflowStep::ALL
        .iter()
        .map(|step| {
            if step.runs_in(mode) {
                step.to_string()
            } else {
                format!("{} (skipped in {} mode)", step, mode)
            }
        })
        .collect();
    items.push("Exit".to_string());

    let selection = Select::new()
        .with_prompt("Start from which step? (step 1 starts over)")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(WorkflowStep::ALL.get(selection).copied())
}
