use super::build::BuildMode;
use std::fmt;
use thiserror::Error;

/// Plugin base names the pipeline itself creates or consumes.
pub const RESERVED_NAMES: &[&str] = &["previs", "combinedobjects", "xprevispatch"];

/// Extensions accepted as a plugin file. The first one is the default.
pub const PLUGIN_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];

/// File name of the seed plugin copied to the target name on a fresh run.
pub const SEED_PLUGIN: &str = "xPrevisPatch.esp";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginNameError {
    #[error("Plugin name cannot be empty")]
    Empty,

    #[error("Plugin name '{0}' is reserved (previs, combinedobjects and xprevispatch are used by the build)")]
    Reserved(String),

    #[error("Plugin name '{0}' cannot contain spaces in clean mode. Rename the plugin or use filtered mode.")]
    WhitespaceInCleanMode(String),

    #[error("Plugin name '{0}' cannot contain path separators")]
    PathSeparator(String),
}

/// A validated plugin name: base name plus extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginIdentity {
    base: String,
    extension: String,
}

impl PluginIdentity {
    /// Validate `name` for `mode`.
    ///
    /// A missing extension defaults to `.esp`. The reserved-name check compares
    /// the base name case-insensitively. Surrounding whitespace is trimmed
    /// except in clean mode, where any whitespace is an error.
    pub fn parse(name: &str, mode: BuildMode) -> Result<Self, PluginNameError> {
        let raw = name;
        let name = name.trim();
        if name.is_empty() {
            return Err(PluginNameError::Empty);
        }
        if name.contains(['/', '\\']) {
            return Err(PluginNameError::PathSeparator(name.to_string()));
        }

        let identity = Self::split(name);
        if identity.base.is_empty() {
            return Err(PluginNameError::Empty);
        }

        let base_lower = identity.base.to_lowercase();
        if RESERVED_NAMES.contains(&base_lower.as_str()) {
            return Err(PluginNameError::Reserved(identity.file_name()));
        }

        if mode.is_clean() && raw.chars().any(char::is_whitespace) {
            return Err(PluginNameError::WhitespaceInCleanMode(raw.to_string()));
        }

        Ok(identity)
    }

    /// The seed plugin. Bypasses the reserved-name rule.
    pub fn seed() -> Self {
        Self::split(SEED_PLUGIN)
    }

    fn split(name: &str) -> Self {
        if let Some((base, ext)) = name.rsplit_once('.') {
            let ext_lower = ext.to_lowercase();
            if PLUGIN_EXTENSIONS.contains(&ext_lower.as_str()) {
                return Self {
                    base: base.to_string(),
                    extension: ext.to_string(),
                };
            }
        }

        Self {
            base: name.to_string(),
            extension: PLUGIN_EXTENSIONS[0].to_string(),
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `<base>.<ext>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base, self.extension)
    }

    /// `<base> - Main.ba2`
    pub fn archive_name(&self) -> String {
        format!("{} - Main.ba2", self.base)
    }

    /// Uncompressed geometry written by precombine generation in clean mode.
    pub fn geometry_psg_name(&self) -> String {
        format!("{} - Geometry.psg", self.base)
    }

    /// Compressed geometry written by step 4.
    pub fn geometry_csg_name(&self) -> String {
        format!("{} - Geometry.csg", self.base)
    }

    /// Combined-object index written by step 5.
    pub fn index_name(&self) -> String {
        format!("{}.cdx", self.base)
    }
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.base, self.extension)
    }
}
