use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Notedesk";
const APP_NAME: &str = "notedesk";
const NOTES_DIR_NAME: &str = "NoteMarkdown";

pub const CONFIG_ENV: &str = "NOTEDESK_CONFIG";
pub const NOTES_ENV: &str = "NOTEDESK_NOTES";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Reads the config file, writing the defaults out first when there is none yet.
    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if self.paths.config_file.exists() {
            return self.load();
        }
        let defaults = AppConfig::default();
        self.persist(&defaults)?;
        tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
        Ok(AppConfig::resolved(defaults, &self.paths))
    }

    pub fn load(&self) -> Result<AppConfig> {
        let file = &self.paths.config_file;
        let raw = fs::read_to_string(file)
            .with_context(|| format!("reading config {}", file.display()))?;
        let parsed: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", file.display()))?;
        Ok(AppConfig::resolved(parsed, &self.paths))
    }

    fn persist(&self, cfg: &AppConfig) -> Result<()> {
        let file = &self.paths.config_file;
        let rendered = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        fs::write(file, rendered).with_context(|| format!("writing config {}", file.display()))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    /// Default notes root, used when `notes.root_dir` is left empty.
    pub notes_dir: PathBuf,
    pub export_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_notes = env::var(NOTES_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;
        let base_dirs = BaseDirs::new().context("resolving home directory")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let notes_dir =
            override_notes.unwrap_or_else(|| base_dirs.home_dir().join(NOTES_DIR_NAME));

        let data_dir = project_dirs.data_dir().to_path_buf();
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("state"));
        let log_dir = state_dir.join("logs");
        let export_dir = data_dir.join("exports");

        Ok(Self {
            config_dir,
            config_file,
            notes_dir,
            export_dir,
            log_dir,
            state_dir,
        })
    }

    /// Lays every directory out under `root`; handy for tests and portable installs.
    pub fn rooted_at(root: &Path) -> Self {
        let config_dir = root.join("config");
        let state_dir = root.join("state");
        Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            notes_dir: root.join("notes"),
            export_dir: root.join("exports"),
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.log_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("notedesk.log")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub notes: NotesOptions,
    pub auto_save: AutoSaveConfig,
    pub performance: PerformanceConfig,
}

impl AppConfig {
    /// Defaults rooted at `paths`, without touching disk.
    pub fn for_paths(paths: &ConfigPaths) -> Self {
        Self::resolved(Self::default(), paths)
    }

    /// Fills path defaults from `paths` and repairs values that cannot work.
    fn resolved(mut self, paths: &ConfigPaths) -> Self {
        self.notes.resolve(paths);
        if self.notes.welcome_title.trim().is_empty() {
            tracing::warn!("empty welcome note title in config, falling back to default");
            self.notes.welcome_title = NotesOptions::default().welcome_title;
        }
        if self.performance.interval_secs == 0 {
            tracing::warn!("performance interval of 0s is not allowed, using 1s");
            self.performance.interval_secs = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesOptions {
    /// Overrides the notes root; empty means `~/NoteMarkdown` (or `NOTEDESK_NOTES`).
    pub root_dir: PathBuf,
    pub welcome_title: String,
    pub export_dir: PathBuf,
}

impl Default for NotesOptions {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::new(),
            welcome_title: "Welcome".to_string(),
            export_dir: PathBuf::new(),
        }
    }
}

impl NotesOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.root_dir.as_os_str().is_empty() || env::var_os(NOTES_ENV).is_some() {
            self.root_dir = paths.notes_dir.clone();
        }
        if self.export_dir.as_os_str().is_empty() {
            self.export_dir = paths.export_dir.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub throttle_ms: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_ms: 1000,
        }
    }
}

impl AutoSaveConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub memory_alert_percent: f32,
    pub cpu_alert_percent: f32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            memory_alert_percent: 90.0,
            cpu_alert_percent: 85.0,
        }
    }
}

impl PerformanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_defaults_and_roots_notes_dir() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        let loader = ConfigLoader::from_paths(paths.clone());

        let cfg = loader.load_or_init()?;
        assert!(paths.config_file.exists());
        assert_eq!(cfg.notes.welcome_title, "Welcome");
        assert_eq!(cfg.auto_save.throttle(), Duration::from_millis(1000));
        if env::var_os(NOTES_ENV).is_none() {
            assert_eq!(cfg.notes.root_dir, paths.notes_dir);
        }
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_sections() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "[performance]\ninterval_secs = 0\n\n[notes]\nwelcome_title = \"Start here\"\n",
        )?;

        let cfg = ConfigLoader::from_paths(paths).load()?;
        assert_eq!(cfg.notes.welcome_title, "Start here");
        assert_eq!(cfg.performance.interval_secs, 1);
        assert!(cfg.auto_save.enabled);
        Ok(())
    }
}
