use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error from saving a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to create config directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write temp config: {0}")]
    Write(#[source] std::io::Error),
    #[error("Failed to rename config file: {0}")]
    Rename(#[source] std::io::Error),
}

/// Get the config directory using the platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/blockflow/`
/// - Linux: `~/.config/blockflow/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/blockflow/`
///
/// Falls back to `~/.blockflow/` if the platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("blockflow"))
        .unwrap_or_else(|| home_dir().join(".blockflow"))
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Load a JSON config file, returning Default if missing or corrupt.
/// Logs warnings when the file exists but cannot be read or parsed,
/// so corrupt files are visible in logs instead of silently resetting state.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Could not read config: {e}");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %path.display(), "Corrupt config: {e}. Using defaults.");
            T::default()
        }
    }
}

/// Save a JSON config file atomically (temp file + rename).
pub fn save_json_config<T: Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(ConfigError::CreateDir)?;

    let json = serde_json::to_string_pretty(config)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.json".to_string());
    let temp = dir.join(format!("{}.tmp.{}", file_name, std::process::id()));

    std::fs::write(&temp, &json).map_err(ConfigError::Write)?;

    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        ConfigError::Rename(e)
    })
}

// ---------------------------------------------------------------------------
// Runtime settings
// ---------------------------------------------------------------------------

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
pub const DEFAULT_PREVIEW_PORT: u16 = 8000;

/// Process-wide knobs for the installation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Root of the git clone cache. Each repo lives under `<root>/<repo id>`.
    pub blocks_temp_path: PathBuf,
    pub registry: String,
    pub cancel_grace_ms: u64,
    pub preview_port: u16,
    /// Treat `childRoutes` like `routes` when matching route nodes.
    pub child_routes_compat: bool,
    /// Forces every git block onto this branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_override: Option<String>,
    /// Mirror host substituted for `github.com` unless the project opts out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_mirror: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blocks_temp_path: home_dir().join(".umi3").join("blocks"),
            registry: DEFAULT_REGISTRY.to_string(),
            cancel_grace_ms: 2000,
            preview_port: DEFAULT_PREVIEW_PORT,
            child_routes_compat: false,
            branch_override: None,
            github_mirror: None,
        }
    }
}

impl Settings {
    /// Settings from `<config_dir>/settings.json`, then the environment.
    pub fn load() -> Self {
        Self::load_from(&config_dir().join(SETTINGS_FILE))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut settings: Self = load_json_config(path);
        settings.apply_env();
        settings
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        save_json_config(&config_dir().join(SETTINGS_FILE), self)
    }

    /// `BASE_PORT` wins over `PORT`; `BIGFISH_COMPAT` and
    /// `BLOCK_REPO_BRANCH` switch their matching knobs.
    pub fn apply_env(&mut self) {
        let port = std::env::var("BASE_PORT")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("PORT").ok().filter(|v| !v.is_empty()));
        if let Some(port) = port {
            match port.parse() {
                Ok(p) => self.preview_port = p,
                Err(_) => tracing::warn!(port = %port, "Ignoring invalid preview port"),
            }
        }
        if std::env::var("BIGFISH_COMPAT").is_ok_and(|v| !v.is_empty()) {
            self.child_routes_compat = true;
        }
        if let Ok(branch) = std::env::var("BLOCK_REPO_BRANCH")
            && !branch.is_empty()
        {
            self.branch_override = Some(branch);
        }
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Dev-server URL where a generated block can be viewed.
    pub fn preview_url(&self, path: &str) -> String {
        format!(
            "http://localhost:{}{}",
            self.preview_port,
            path.to_lowercase()
        )
    }
}

// ---------------------------------------------------------------------------
// Project block config
// ---------------------------------------------------------------------------

pub const DEFAULT_GIT_URL: &str = "https://github.com/machinaai/umi-blocks";

/// The host project's `block` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npm_client: Option<String>,
    pub default_git_url: String,
    pub close_fast_github: bool,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            npm_client: None,
            default_git_url: DEFAULT_GIT_URL.to_string(),
            close_fast_github: false,
        }
    }
}
