pub mod ckpe;

pub use ckpe::{CKPE_CONFIG_FILES, CkpeConfig, CkpeConfigKind, CkpeError};

use crate::models::{ArchiveBackend, Settings, ToolPaths};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

pub const SETTINGS_FILE: &str = "PrevisGen Settings.yaml";

/// Prefix for environment overrides, e.g. `PREVISGEN_SETTLE_DELAY_SECS=10`.
pub const ENV_PREFIX: &str = "PREVISGEN";

/// Configuration manager for the persistent settings file.
///
/// Settings are layered: built-in defaults, then `PrevisGen Settings.yaml`
/// (optional), then `PREVISGEN_*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, creating `config_dir` if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join(SETTINGS_FILE),
            config_dir,
        })
    }

    /// Load settings from defaults, the settings file and the process environment.
    pub fn load_settings(&self) -> Result<Settings> {
        self.load_settings_with_env(None)
    }

    /// Like [`load_settings`](Self::load_settings) but reading environment
    /// overrides from `env` instead of the process environment when given.
    pub fn load_settings_with_env(
        &self,
        env: Option<config::Map<String, String>>,
    ) -> Result<Settings> {
        if self.settings_path.exists() {
            tracing::info!("Loading settings from {}", self.settings_path);
        } else {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let defaults = config::Config::try_from(&Settings::default())
            .context("Failed to build default settings")?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(self.settings_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to load settings: {}", self.settings_path))?;

        let settings: Settings = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        Ok(settings)
    }

    /// Write `settings` to the settings file.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Write a default settings file if none exists yet.
    pub fn ensure_settings_file(&self) -> Result<bool> {
        if self.settings_path.exists() {
            return Ok(false);
        }
        self.save_settings(&Settings::default())?;
        Ok(true)
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}

/// Tool locations from settings, falling back to the standard install layout
/// under `game_dir`.
pub fn resolve_tool_paths(
    settings: &Settings,
    game_dir: &Utf8Path,
    backend: ArchiveBackend,
    mo2_override: Option<Utf8PathBuf>,
) -> ToolPaths {
    let creation_kit = settings
        .creation_kit_exe
        .clone()
        .unwrap_or_else(|| game_dir.join("CreationKit.exe"));

    let editor = settings
        .editor_exe
        .clone()
        .unwrap_or_else(|| game_dir.join("FO4Edit.exe"));

    let packer = match backend {
        ArchiveBackend::Primary => settings
            .archive2_exe
            .clone()
            .unwrap_or_else(|| game_dir.join("Tools").join("Archive2").join("Archive2.exe")),
        ArchiveBackend::Community => settings
            .bsarch_exe
            .clone()
            .unwrap_or_else(|| game_dir.join("Tools").join("BSArch").join("BSArch.exe")),
    };

    ToolPaths {
        creation_kit,
        editor,
        packer,
        mo2: mo2_override.or_else(|| settings.mo2_exe.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_create_config_manager_creates_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested = Utf8PathBuf::try_from(temp_dir.path().join("PrevisGen Data")).unwrap();
        let manager = ConfigManager::new(&nested).unwrap();
        assert!(manager.config_dir().is_dir());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let settings = manager
            .load_settings_with_env(Some(config::Map::new()))
            .unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_save_settings() {
        let (manager, _temp_dir) = create_test_config_manager();

        let settings = Settings {
            settle_delay_secs: 12,
            game_dir: Some(Utf8PathBuf::from("C:/Games/Fallout 4")),
            ..Settings::default()
        };
        manager.save_settings(&settings).unwrap();

        let loaded = manager
            .load_settings_with_env(Some(config::Map::new()))
            .unwrap();
        assert_eq!(loaded.settle_delay_secs, 12);
        assert_eq!(loaded.game_dir, Some(Utf8PathBuf::from("C:/Games/Fallout 4")));
        assert_eq!(loaded.dialog_delay_secs, 3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.settings_path(), "poll_interval_secs: 2\n").unwrap();

        let loaded = manager
            .load_settings_with_env(Some(config::Map::new()))
            .unwrap();
        assert_eq!(loaded.poll_interval_secs, 2);
        assert_eq!(loaded.settle_delay_secs, 5);
        assert_eq!(loaded.disabled_dlls.len(), 6);
    }

    #[test]
    fn test_environment_overrides_file() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.settings_path(), "settle_delay_secs: 7\n").unwrap();

        let mut env = config::Map::new();
        env.insert("PREVISGEN_SETTLE_DELAY_SECS".to_string(), "20".to_string());
        let loaded = manager.load_settings_with_env(Some(env)).unwrap();
        assert_eq!(loaded.settle_delay_secs, 20);
    }

    #[test]
    fn test_ensure_settings_file() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.ensure_settings_file().unwrap());
        assert!(!manager.ensure_settings_file().unwrap());
        assert!(manager.settings_path().is_file());
    }

    #[test]
    fn test_resolve_tool_paths_defaults() {
        let game = Utf8Path::new("C:/Games/Fallout 4");
        let tools = resolve_tool_paths(&Settings::default(), game, ArchiveBackend::Primary, None);
        assert_eq!(tools.creation_kit, game.join("CreationKit.exe"));
        assert_eq!(tools.packer, game.join("Tools/Archive2/Archive2.exe"));
        assert!(tools.mo2.is_none());

        let settings = Settings {
            bsarch_exe: Some(Utf8PathBuf::from("D:/BSArch.exe")),
            mo2_exe: Some(Utf8PathBuf::from("D:/MO2/ModOrganizer.exe")),
            ..Settings::default()
        };
        let tools = resolve_tool_paths(&settings, game, ArchiveBackend::Community, None);
        assert_eq!(tools.packer, Utf8PathBuf::from("D:/BSArch.exe"));
        assert_eq!(tools.mo2, Some(Utf8PathBuf::from("D:/MO2/ModOrganizer.exe")));
    }
}
