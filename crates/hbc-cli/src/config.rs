//! Configuration file parsing for hbc.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: Option<String>,

    /// Patch settings
    #[serde(default)]
    pub patch: PatchConfig,

    /// Directory the config was loaded from; relative paths resolve against it
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

/// Patch configuration.
#[derive(Debug, Deserialize)]
pub struct PatchConfig {
    /// JSON patch definition files applied by `hbc patch`
    #[serde(default)]
    pub defs: Vec<PathBuf>,

    /// Re-parse and rewrite the patched output to check it is stable
    #[serde(default = "default_true")]
    pub verify_roundtrip: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            defs: Vec::new(),
            verify_roundtrip: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Patch definition files with relative paths resolved
    pub fn patch_defs(&self) -> Vec<PathBuf> {
        self.patch
            .defs
            .iter()
            .map(|path| match &self.root {
                Some(root) if path.is_relative() => root.join(path),
                _ => path.clone(),
            })
            .collect()
    }
}

/// Names tried in each directory, in order
const CONFIG_NAMES: [&str; 2] = ["hbc.toml", ".hbc.toml"];

/// Load `path`, or the nearest `hbc.toml` above the working directory.
///
/// With neither, every setting takes its default.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let found = match path {
        Some(path) if !path.exists() => anyhow::bail!("Config file {} does not exist", path.display()),
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir().ok().and_then(|cwd| nearest_config(&cwd)),
    };
    let Some(path) = found else {
        return Ok(Config::default());
    };

    let content = std::fs::read_to_string(&path)?;
    let mut config: Config =
        toml::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    config.root = path.parent().map(Path::to_path_buf);
    Ok(config)
}

fn nearest_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}
