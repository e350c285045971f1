use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub undo: UndoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Suppress the overwrite notice on the first sync of a project, when
    /// everything is an import and nothing local can have been overwritten.
    #[serde(default = "default_true")]
    pub silent_first_run: bool,
    /// Minimum number of overwritten items before a notice is raised.
    #[serde(default = "default_notice_threshold")]
    pub notice_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            silent_first_run: default_true(),
            notice_threshold: default_notice_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoConfig {
    /// Whether a pre-sync snapshot is captured at all.
    #[serde(default = "default_true")]
    pub snapshot_before_sync: bool,
    /// How many snapshots to keep before the oldest is dropped.
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            snapshot_before_sync: default_true(),
            snapshot_depth: default_snapshot_depth(),
        }
    }
}

/// Load `drift.toml` from the given root; absent file means defaults.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn load_engine_config(root: &Path) -> Result<EngineConfig> {
    let path = root.join("drift.toml");
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_true() -> bool {
    true
}

const fn default_notice_threshold() -> u32 {
    1
}

const fn default_snapshot_depth() -> usize {
    8
}
