// Console progress output
//
// Subscribes to StateManager events and prints one line per change, so the
// engine never writes to stdout itself.

use crate::models::StepOutcome;
use crate::state::StateChange;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Text for one state change, or `None` for changes not worth a line.
pub fn describe(change: &StateChange) -> Option<String> {
    let line = match change {
        StateChange::RunStarted {
            plugin,
            build_mode,
            start_step,
        } => format!(
            "Building {} ({} mode), starting at {}",
            plugin, build_mode, start_step
        ),
        StateChange::StepStarted { step } => format!("\n=== {} ===", step),
        StateChange::StepSkipped { step, reason } => format!("Skipped {} ({})", step, reason),
        StateChange::StepFinished { step, outcome } => match outcome {
            StepOutcome::Success => format!("{} completed", step),
            StepOutcome::Warning(message) => format!("{} completed with warning: {}", step, message),
            // RunFailed carries the reason
            StepOutcome::Fatal(_) => return None,
        },
        StateChange::RunCompleted {
            steps_run,
            warnings,
        } => format!(
            "\nAll done: {} steps run, {} with warnings",
            steps_run, warnings
        ),
        StateChange::RunFailed { step, reason } => format!(
            "\n{} failed: {}\nFix the cause and resume with --resume {}",
            step,
            reason,
            step.number()
        ),
    };
    Some(line)
}

/// Print state changes until the channel closes.
pub fn spawn_progress_printer(mut rx: broadcast::Receiver<StateChange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    tracing::trace!("State change received: {:?}", change);
                    if let Some(line) = describe(&change) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Progress output lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildMode, WorkflowStep};

    #[test]
    fn test_describe_failure_names_resume_step() {
        let line = describe(&StateChange::RunFailed {
            step: WorkflowStep::GeneratePrevis,
            reason: "no uvd".to_string(),
        })
        .unwrap();
        assert!(line.contains("--resume 6"));
    }

    #[test]
    fn test_fatal_step_finish_is_silent() {
        assert!(
            describe(&StateChange::StepFinished {
                step: WorkflowStep::GeneratePrevis,
                outcome: StepOutcome::fatal("x"),
            })
            .is_none()
        );
    }

    #[test]
    fn test_describe_run_started() {
        let line = describe(&StateChange::RunStarted {
            plugin: "Foo.esp".to_string(),
            build_mode: BuildMode::Filtered,
            start_step: WorkflowStep::GeneratePrecombines,
        })
        .unwrap();
        assert!(line.contains("Foo.esp"));
        assert!(line.contains("filtered"));
    }
}
