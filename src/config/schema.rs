use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_HISTORY: usize = 200;
const DEFAULT_KEEP_ON_TRUNCATE: usize = 100;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionsConfig {
    /// Override for the sessions directory. Defaults to `<workspace>/sessions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// History length that triggers truncation.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Number of recent messages to retain when truncating.
    #[serde(default = "default_keep_on_truncate")]
    pub keep_on_truncate: usize,
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_keep_on_truncate() -> usize {
    DEFAULT_KEEP_ON_TRUNCATE
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_history: DEFAULT_MAX_HISTORY,
            keep_on_truncate: DEFAULT_KEEP_ON_TRUNCATE,
        }
    }
}

// ── Observability ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// "log" | "none"
    #[serde(default = "default_observability_backend")]
    pub backend: String,
}

fn default_observability_backend() -> String {
    "log".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_observability_backend(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let turnkeeper_dir = home.join(".turnkeeper");

        Self {
            workspace_dir: turnkeeper_dir.join("workspace"),
            config_path: turnkeeper_dir.join("config.toml"),
            sessions: SessionsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let turnkeeper_dir = home.join(".turnkeeper");
        let config_path = turnkeeper_dir.join("config.toml");

        if !turnkeeper_dir.exists() {
            fs::create_dir_all(&turnkeeper_dir)
                .context("Failed to create .turnkeeper directory")?;
            fs::create_dir_all(turnkeeper_dir.join("workspace"))
                .context("Failed to create workspace directory")?;
        }

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config {
                config_path: config_path.clone(),
                ..Config::default()
            };
            config.save()?;
            config
        };
        config.workspace_dir = turnkeeper_dir.join("workspace");
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a config file from an explicit path. The workspace defaults to a
    /// `workspace` directory next to the file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        config.workspace_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("workspace"), |p| p.join("workspace"));
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // Workspace directory: TURNKEEPER_WORKSPACE
        if let Ok(workspace) = std::env::var("TURNKEEPER_WORKSPACE") {
            if !workspace.is_empty() {
                self.workspace_dir = PathBuf::from(workspace);
            }
        }

        // Sessions directory: TURNKEEPER_SESSIONS_DIR
        if let Ok(dir) = std::env::var("TURNKEEPER_SESSIONS_DIR") {
            if !dir.is_empty() {
                self.sessions.dir = Some(PathBuf::from(dir));
            }
        }

        // Truncation budget: TURNKEEPER_MAX_HISTORY
        if let Ok(raw) = std::env::var("TURNKEEPER_MAX_HISTORY") {
            match raw.parse::<usize>() {
                Ok(max) if max > 0 => self.sessions.max_history = max,
                _ => tracing::warn!(value = %raw, "ignoring invalid TURNKEEPER_MAX_HISTORY"),
            }
        }
    }

    /// Effective sessions directory.
    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions
            .dir
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("sessions"))
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e).with_context(|| {
                format!(
                    "Failed to atomically replace config file: {}",
                    self.config_path.display()
                )
            });
        }

        Ok(())
    }
}
