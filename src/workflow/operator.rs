use camino::Utf8Path;

/// Decisions only the person running the build may make.
///
/// Every method is a yes/no question; `false` always means "do not touch
/// anything". Implementations may block (terminal prompts), which is fine
/// since the engine runs one step at a time.
#[cfg_attr(test, mockall::automock)]
pub trait Operator: Send + Sync {
    /// `dir` must be empty for the step to run. Delete it?
    fn confirm_wipe(&self, dir: &Utf8Path, label: &str) -> bool;

    /// Other xPrevisPatch plugins are present in the data directory. Continue anyway?
    fn confirm_xprevispatch(&self, found: &[String]) -> bool;

    /// Neither the target plugin nor the seed plugin exists. Continue and let
    /// the Creation Kit create it?
    fn confirm_missing_plugin(&self, plugin: &str) -> bool;

    /// The build finished. Delete these working plugins?
    fn confirm_remove_working_files(&self, files: &[String]) -> bool;
}

/// Gives the same answer to every question.
///
/// `AutoOperator::declining()` is what `--yes` uses: it never deletes
/// anything but also never stops for a missing plugin or a stray patch.
#[derive(Debug, Clone, Copy)]
pub struct AutoOperator {
    destructive: bool,
}

impl AutoOperator {
    /// Confirm everything, deletions included.
    pub fn accepting() -> Self {
        Self { destructive: true }
    }

    /// Continue past warnings but refuse every deletion.
    pub fn declining() -> Self {
        Self { destructive: false }
    }
}

impl Operator for AutoOperator {
    fn confirm_wipe(&self, dir: &Utf8Path, label: &str) -> bool {
        if !self.destructive {
            tracing::warn!("Not deleting {} ({}) without confirmation", label, dir);
        }
        self.destructive
    }

    fn confirm_xprevispatch(&self, found: &[String]) -> bool {
        tracing::warn!("Continuing despite xPrevisPatch plugins: {}", found.join(", "));
        true
    }

    fn confirm_missing_plugin(&self, plugin: &str) -> bool {
        tracing::warn!("{} not found, the Creation Kit will create it", plugin);
        true
    }

    fn confirm_remove_working_files(&self, _files: &[String]) -> bool {
        self.destructive
    }
}
