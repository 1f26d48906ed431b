use std::fmt;

/// Result of one tool invocation or one workflow step.
///
/// `Warning` never halts the pipeline; `Fatal` always does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Warning(String),
    Fatal(String),
}

impl StepOutcome {
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Combine two outcomes of the same step, keeping the most severe.
    ///
    /// Two warnings are joined so neither message is lost.
    pub fn and(self, other: StepOutcome) -> StepOutcome {
        match (self, other) {
            (fatal @ StepOutcome::Fatal(_), _) => fatal,
            (_, fatal @ StepOutcome::Fatal(_)) => fatal,
            (StepOutcome::Warning(a), StepOutcome::Warning(b)) => {
                StepOutcome::Warning(format!("{a}; {b}"))
            }
            (warning @ StepOutcome::Warning(_), StepOutcome::Success) => warning,
            (StepOutcome::Success, other) => other,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Success => f.write_str("success"),
            StepOutcome::Warning(message) => write!(f, "warning: {message}"),
            StepOutcome::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}
