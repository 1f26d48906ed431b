// Run metrics module
//
// Lightweight counters for one pipeline run, summarized in the log at the end

use crate::services::process::{ProcessRunner, ToolCommand, ToolOutput};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Per-run metrics
///
/// Uses atomic operations so the engine and the tool runners can record
/// through a shared `Arc<Metrics>` without locks.
#[derive(Debug)]
pub struct Metrics {
    /// Steps that finished with Success
    pub steps_succeeded: AtomicUsize,

    /// Steps that finished with a Warning
    pub steps_warned: AtomicUsize,

    /// Steps skipped (build mode or skip test)
    pub steps_skipped: AtomicUsize,

    /// Steps that ended Fatal
    pub steps_failed: AtomicUsize,

    /// External processes launched (content tool, editor, packer, helpers)
    pub tool_invocations: AtomicU64,

    /// Wall time spent waiting on external processes, in milliseconds
    pub tool_time_ms: AtomicU64,

    /// State events broadcast
    pub state_broadcasts: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            steps_succeeded: AtomicUsize::new(0),
            steps_warned: AtomicUsize::new(0),
            steps_skipped: AtomicUsize::new(0),
            steps_failed: AtomicUsize::new(0),
            tool_invocations: AtomicU64::new(0),
            tool_time_ms: AtomicU64::new(0),
            state_broadcasts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_step_succeeded(&self) {
        self.steps_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_warned(&self) {
        self.steps_warned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_skipped(&self) {
        self.steps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_failed(&self) {
        self.steps_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one external process and how long it ran
    pub fn record_tool_invocation(&self, duration: Duration) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
        self.tool_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_state_broadcast(&self) {
        self.state_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Steps that ran to an outcome (skips excluded)
    pub fn steps_executed(&self) -> usize {
        self.steps_succeeded.load(Ordering::Relaxed)
            + self.steps_warned.load(Ordering::Relaxed)
            + self.steps_failed.load(Ordering::Relaxed)
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Run Metrics Summary ===");
        tracing::info!("Elapsed: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Steps: {} succeeded, {} with warnings, {} skipped, {} failed",
            self.steps_succeeded.load(Ordering::Relaxed),
            self.steps_warned.load(Ordering::Relaxed),
            self.steps_skipped.load(Ordering::Relaxed),
            self.steps_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Tool invocations: {} ({:.2}s total)",
            self.tool_invocations.load(Ordering::Relaxed),
            self.tool_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
        tracing::debug!(
            "State broadcasts: {}",
            self.state_broadcasts.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ProcessRunner`] decorator that records every launch in [`Metrics`].
pub struct MeteredRunner {
    inner: Arc<dyn ProcessRunner>,
    metrics: Arc<Metrics>,
}

impl MeteredRunner {
    pub fn new(inner: Arc<dyn ProcessRunner>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl ProcessRunner for MeteredRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        let start = Instant::now();
        let result = self.inner.run(command).await;
        self.metrics.record_tool_invocation(start.elapsed());
        result
    }

    async fn spawn(&self, command: &ToolCommand) -> Result<()> {
        // Detached; only the launch itself is timed
        let start = Instant::now();
        let result = self.inner.spawn(command).await;
        self.metrics.record_tool_invocation(start.elapsed());
        result
    }
}
