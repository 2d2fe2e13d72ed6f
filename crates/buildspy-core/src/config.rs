use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// File name looked up when no config path is given.
pub const CONFIG_FILE_NAME: &str = "buildspy.yaml";
/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "BUILDSPY_CONFIG";

pub const DEFAULT_SESSION_NAME: &str = "build";
pub const DEFAULT_DOWNLOAD_NODE_NAME: &str = "Downloading dependencies";

/// Parser settings read from `buildspy.yaml`.
///
/// Every key is optional:
/// ```yaml
/// sessionName: nightly
/// downloadNodeName: Fetching artifacts
/// forwardOutput: true
/// matchers:
///   javac: true
///   kotlin: false
///   compilationFailure: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserConfig {
    /// Name carried by the session finish event
    pub session_name: String,

    /// Name of the node that groups artifact downloads
    pub download_node_name: String,

    /// Forward plain output lines to the open entries
    pub forward_output: bool,

    /// Built-in matcher toggles
    pub matchers: MatcherToggles,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            download_node_name: DEFAULT_DOWNLOAD_NODE_NAME.to_string(),
            forward_output: true,
            matchers: MatcherToggles::default(),
        }
    }
}

/// Which built-in matchers are registered.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatcherToggles {
    pub javac: bool,
    pub kotlin: bool,
    pub compilation_failure: bool,
}

impl Default for MatcherToggles {
    fn default() -> Self {
        Self {
            javac: true,
            kotlin: true,
            compilation_failure: true,
        }
    }
}

/// Where the effective config came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicit path (CLI flag or environment variable)
    Explicit(PathBuf),
    /// `buildspy.yaml` found walking up from the working directory
    Discovered(PathBuf),
    /// No file, built-in defaults
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Discovered(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Parse a config file.
pub fn parse_config(path: &Path) -> Result<ParserConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse config YAML. An empty document yields the defaults.
pub fn parse_config_str(content: &str) -> Result<ParserConfig> {
    if content.trim().is_empty() {
        return Ok(ParserConfig::default());
    }
    let config: ParserConfig = yaml_serde::from_str(content)?;
    Ok(config)
}

/// Walk up from `start` looking for `buildspy.yaml`.
pub fn find_config_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Resolve and load the config.
///
/// Priority: `explicit` (CLI flag) > `BUILDSPY_CONFIG` > `buildspy.yaml` in the
/// working directory or an ancestor > defaults. A file that exists but does
/// not parse is an error.
pub fn load(explicit: Option<&Path>) -> Result<(ParserConfig, ConfigSource)> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    load_from(explicit, env_path.as_deref(), &cwd)
}

/// [`load`] with the environment and working directory passed in.
pub fn load_from(
    explicit: Option<&Path>,
    env_path: Option<&Path>,
    cwd: &Path,
) -> Result<(ParserConfig, ConfigSource)> {
    if let Some(path) = explicit.or(env_path) {
        let config = parse_config(path)?;
        return Ok((config, ConfigSource::Explicit(path.to_path_buf())));
    }
    match find_config_from(cwd) {
        Some(path) => {
            let config = parse_config(&path)?;
            Ok((config, ConfigSource::Discovered(path)))
        }
        None => Ok((ParserConfig::default(), ConfigSource::Defaults)),
    }
}
