use serde::{Deserialize, Serialize};
use std::fmt;

/// Build mode for precombine/previs generation.
///
/// Fixed for the whole run. Clean mode adds the geometry compression and
/// index build steps and forbids whitespace in the plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Clean,
    Filtered,
    Xbox,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Clean => "clean",
            BuildMode::Filtered => "filtered",
            BuildMode::Xbox => "xbox",
        }
    }

    /// Mode qualifier passed to the content tool for precombine generation.
    ///
    /// Xbox builds generate precombines the same way filtered builds do.
    pub fn precombine_qualifier(&self) -> &'static str {
        match self {
            BuildMode::Clean => "clean",
            BuildMode::Filtered | BuildMode::Xbox => "filtered",
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, BuildMode::Clean)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archive packer backend, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ArchiveBackend {
    /// Archive2: create and extract, no append.
    #[default]
    Primary,
    /// BSArch: pack only, appends by staging new content.
    Community,
}

impl ArchiveBackend {
    pub fn tool_name(&self) -> &'static str {
        match self {
            ArchiveBackend::Primary => "Archive2",
            ArchiveBackend::Community => "BSArch",
        }
    }

    pub fn supports_extract(&self) -> bool {
        matches!(self, ArchiveBackend::Primary)
    }

    pub fn supports_append(&self) -> bool {
        matches!(self, ArchiveBackend::Community)
    }
}

impl fmt::Display for ArchiveBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// The eight ordered steps of the pipeline.
///
/// Steps 4 and 5 only run in [`BuildMode::Clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkflowStep {
    GeneratePrecombines = 1,
    MergePrecombines = 2,
    ArchivePrecombines = 3,
    CompressGeometry = 4,
    BuildIndex = 5,
    GeneratePrevis = 6,
    MergePrevis = 7,
    ArchivePrevis = 8,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 8] = [
        WorkflowStep::GeneratePrecombines,
        WorkflowStep::MergePrecombines,
        WorkflowStep::ArchivePrecombines,
        WorkflowStep::CompressGeometry,
        WorkflowStep::BuildIndex,
        WorkflowStep::GeneratePrevis,
        WorkflowStep::MergePrevis,
        WorkflowStep::ArchivePrevis,
    ];

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneratePrecombines => "Generate Precombines Via CK",
            Self::MergePrecombines => "Merge CombinedObjects.esp Via xEdit",
            Self::ArchivePrecombines => "Create BA2 Archive from Precombines",
            Self::CompressGeometry => "Compress PSG Via CK",
            Self::BuildIndex => "Build CDX Via CK",
            Self::GeneratePrevis => "Generate Previs Via CK",
            Self::MergePrevis => "Merge Previs.esp Via xEdit",
            Self::ArchivePrevis => "Add Previs files to BA2 Archive",
        }
    }

    pub fn is_clean_mode_only(&self) -> bool {
        matches!(self, Self::CompressGeometry | Self::BuildIndex)
    }

    /// Whether this step runs at all under `mode`.
    pub fn runs_in(&self, mode: BuildMode) -> bool {
        !self.is_clean_mode_only() || mode.is_clean()
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {} - {}", self.number(), self.name())
    }
}
