use crate::models::{ArchiveBackend, BuildMode, WorkflowStep};
use camino::Utf8PathBuf;
use clap::Parser;

/// Command line for the `previsgen` binary.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "previsgen",
    version,
    about = "Generate precombines and previs for a Fallout 4 plugin"
)]
pub struct Args {
    /// Plugin to build (e.g. MyMod.esp). Prompted for when omitted.
    #[arg(value_name = "PLUGIN")]
    pub plugin: Option<String>,

    /// Clean build: also compresses geometry and builds the CDX (default)
    #[arg(short = 'c', long, conflicts_with_all = ["filtered", "xbox"])]
    pub clean: bool,

    /// Filtered build
    #[arg(short = 'f', long, conflicts_with_all = ["clean", "xbox"])]
    pub filtered: bool,

    /// Xbox build: filtered precombines, Xbox archive compression
    #[arg(short = 'x', long, conflicts_with_all = ["clean", "filtered"])]
    pub xbox: bool,

    /// Pack archives with BSArch instead of Archive2
    #[arg(long)]
    pub bsarch: bool,

    /// Fallout 4 install directory (overrides the settings file)
    #[arg(long, value_name = "PATH")]
    pub game_dir: Option<Utf8PathBuf>,

    /// Launch every tool through this ModOrganizer.exe
    #[arg(long, value_name = "EXE")]
    pub mo2: Option<Utf8PathBuf>,

    /// MO2 overwrite directory to collect generated files from before archiving
    #[arg(long, value_name = "PATH")]
    pub mo2_data_dir: Option<Utf8PathBuf>,

    /// Directory holding the settings file and logs
    #[arg(long, value_name = "PATH", default_value = "PrevisGen Data")]
    pub config_dir: Utf8PathBuf,

    /// Resume at this step instead of starting from step 1
    #[arg(long, value_name = "STEP", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub resume: Option<u8>,

    /// Never prompt. Destructive confirmations are declined.
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Debug-level logging, also echoed to the console
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn build_mode(&self) -> BuildMode {
        if self.filtered {
            BuildMode::Filtered
        } else if self.xbox {
            BuildMode::Xbox
        } else {
            BuildMode::Clean
        }
    }

    pub fn archive_backend(&self) -> ArchiveBackend {
        if self.bsarch {
            ArchiveBackend::Community
        } else {
            ArchiveBackend::Primary
        }
    }

    pub fn resume_step(&self) -> Option<WorkflowStep> {
        self.resume.and_then(WorkflowStep::from_number)
    }

    pub fn interactive(&self) -> bool {
        !self.yes
    }
}
