// State management module
//
// StateManager wraps the observable RunState behind Arc<RwLock<T>> and emits
// change events the CLI turns into progress output.

use crate::metrics::Metrics;
use crate::models::{BuildMode, StepOutcome, WorkflowStep};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Where the run is in its lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Observable state of one pipeline run
///
/// This is a view for progress reporting; the workflow engine drives it and
/// never reads decisions back out of it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunState {
    pub phase: RunPhase,
    pub plugin: Option<String>,
    pub build_mode: BuildMode,
    pub start_step: Option<WorkflowStep>,
    pub current_step: Option<WorkflowStep>,

    /// Steps that ran, in order, with their outcome
    pub outcomes: Vec<(WorkflowStep, StepOutcome)>,

    /// Steps passed over, with the reason
    pub skipped: Vec<(WorkflowStep, String)>,

    /// Set when the run stops early
    pub failure: Option<(WorkflowStep, String)>,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.phase == RunPhase::Running
    }

    pub fn warning_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StepOutcome::Warning(_)))
            .count()
    }
}

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    RunStarted {
        plugin: String,
        build_mode: BuildMode,
        start_step: WorkflowStep,
    },

    StepStarted {
        step: WorkflowStep,
    },

    StepSkipped {
        step: WorkflowStep,
        reason: String,
    },

    StepFinished {
        step: WorkflowStep,
        outcome: StepOutcome,
    },

    RunCompleted {
        steps_run: usize,
        warnings: usize,
    },

    RunFailed {
        step: WorkflowStep,
        reason: String,
    },
}

/// Thread-safe run state with event emission
///
/// - [`snapshot()`](Self::snapshot) / [`read()`](Self::read) for reading
/// - [`update()`](Self::update) for mutations; events are derived from the diff
/// - [`subscribe()`](Self::subscribe) for listening
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<RunState>>,
    state_tx: broadcast::Sender<StateChange>,
    metrics: Option<Arc<Metrics>>,
}

impl StateManager {
    /// Create a new StateManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(RunState::default())),
            state_tx,
            metrics: None,
        }
    }

    /// Count broadcasts in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, RunState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, RunState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> RunState {
        self.read_lock().clone()
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RunState) -> R,
    {
        f(&self.read_lock())
    }

    /// Apply `update_fn`, then emit one event per detected change.
    ///
    /// Returns the emitted events.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut RunState),
    {
        let changes = {
            let mut state = self.write_lock();
            let old_state = state.clone();
            update_fn(&mut state);
            Self::detect_changes(&old_state, &state)
        };

        for change in &changes {
            // No subscribers is fine
            let _ = self.state_tx.send(change.clone());
            if let Some(metrics) = &self.metrics {
                metrics.record_state_broadcast();
            }
        }

        changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &RunState, new: &RunState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.phase != RunPhase::Running && new.phase == RunPhase::Running {
            if let Some(start_step) = new.start_step {
                changes.push(StateChange::RunStarted {
                    plugin: new.plugin.clone().unwrap_or_default(),
                    build_mode: new.build_mode,
                    start_step,
                });
            }
        }

        if new.skipped.len() > old.skipped.len() {
            for (step, reason) in &new.skipped[old.skipped.len()..] {
                changes.push(StateChange::StepSkipped {
                    step: *step,
                    reason: reason.clone(),
                });
            }
        }

        if new.outcomes.len() > old.outcomes.len() {
            for (step, outcome) in &new.outcomes[old.outcomes.len()..] {
                changes.push(StateChange::StepFinished {
                    step: *step,
                    outcome: outcome.clone(),
                });
            }
        }

        if new.current_step != old.current_step {
            if let Some(step) = new.current_step {
                changes.push(StateChange::StepStarted { step });
            }
        }

        if old.phase != new.phase {
            match new.phase {
                RunPhase::Completed => changes.push(StateChange::RunCompleted {
                    steps_run: new.outcomes.len(),
                    warnings: new.warning_count(),
                }),
                RunPhase::Failed => {
                    if let Some((step, reason)) = &new.failure {
                        changes.push(StateChange::RunFailed {
                            step: *step,
                            reason: reason.clone(),
                        });
                    }
                }
                RunPhase::Idle | RunPhase::Running => {}
            }
        }

        changes
    }

    // Convenience methods used by the workflow engine

    pub fn start_run(&self, plugin: &str, build_mode: BuildMode, start_step: WorkflowStep) -> Vec<StateChange> {
        self.update(|state| {
            *state = RunState {
                phase: RunPhase::Running,
                plugin: Some(plugin.to_string()),
                build_mode,
                start_step: Some(start_step),
                ..RunState::default()
            };
        })
    }

    pub fn begin_step(&self, step: WorkflowStep) -> Vec<StateChange> {
        self.update(|state| state.current_step = Some(step))
    }

    pub fn skip_step(&self, step: WorkflowStep, reason: impl Into<String>) -> Vec<StateChange> {
        let reason = reason.into();
        self.update(|state| state.skipped.push((step, reason)))
    }

    pub fn finish_step(&self, step: WorkflowStep, outcome: StepOutcome) -> Vec<StateChange> {
        self.update(|state| {
            state.outcomes.push((step, outcome));
            state.current_step = None;
        })
    }

    pub fn complete_run(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = RunPhase::Completed;
            state.current_step = None;
        })
    }

    pub fn fail_run(&self, step: WorkflowStep, reason: impl Into<String>) -> Vec<StateChange> {
        let reason = reason.into();
        self.update(|state| {
            state.phase = RunPhase::Failed;
            state.current_step = None;
            state.failure = Some((step, reason));
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
