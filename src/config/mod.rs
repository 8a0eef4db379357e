//! Persisted client settings.
//!
//! One small JSON file in the data directory. The only setting the session
//! core cares about is the optional `backend_url` override; everything else
//! (theme, layout, ...) belongs to the rendering shell.

pub mod paths;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// Compiled-in default backend origin used when no override is stored.
pub const DEFAULT_BACKEND_URL: &str = "https://uplink-demo.hf.space";

/// Client settings persisted as `uplink_settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Overrides the compiled-in backend origin when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
}

impl ClientConfig {
    /// Backend origin to use: the stored override or the compiled-in default.
    pub fn effective_backend_url(&self) -> &str {
        self.backend_url.as_deref().unwrap_or(DEFAULT_BACKEND_URL)
    }
}

/// Path to uplink_settings.json.
pub fn config_path() -> PathBuf {
    get_data_dir().join("uplink_settings.json")
}

/// Read the client settings from the data directory.
pub fn read_config() -> ClientConfig {
    read_config_from(&config_path())
}

/// Read settings from an explicit path. Missing or corrupt files fall back
/// to defaults.
pub fn read_config_from(path: &Path) -> ClientConfig {
    read_json_file(path).unwrap_or_default()
}

/// Write the client settings to the data directory.
pub fn write_config(config: &ClientConfig) -> anyhow::Result<()> {
    write_config_to(&config_path(), config)
}

/// Write settings to an explicit path via a temp file + rename.
pub fn write_config_to(path: &Path, config: &ClientConfig) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".uplink_settings.{}.tmp", std::process::id()));
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
