//! Configuration types for `ifcgen.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    /// Additional directories to search when resolving header paths. Each
    /// entry is tried in order after `base_dir` (the TOML file's parent
    /// directory).
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    pub output: OutputConfig,
    #[serde(default)]
    pub group: Vec<GroupConfig>,
}

/// Supported API version span.
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Lowest API version the caller still supports.
    pub min: u32,
    /// Highest API version declared anywhere.
    pub max: u32,
    /// When true, an exported declaration without `__INTRODUCED_IN` is
    /// treated as present since `api.min` instead of being reported as
    /// malformed.
    #[serde(default)]
    pub allow_unversioned: bool,
}

/// Output file settings.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Target file for struct wrappers referenced from more than one header.
    #[serde(default = "default_shared_structs")]
    pub shared_structs: PathBuf,
}

fn default_shared_structs() -> PathBuf {
    PathBuf::from("shared/ifc_structs.h")
}

/// A single header group — one header mapped to its caller-side and
/// callee-side target files.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    /// Group identifier used in emitted enum/table names (e.g. `network_h`).
    pub name: String,
    /// The C header to scan for declarations.
    pub header: PathBuf,
    /// Caller-side stub file (marshalling functions exported to the plugin).
    pub caller: PathBuf,
    /// Callee-side dispatch file (message handler switch on the host).
    pub callee: PathBuf,
    /// Shared tuple/wrapper header for this group.
    pub shared: PathBuf,
}

impl Config {
    /// Fatal when the configured version span is unusable; the whole run
    /// stops rather than producing stubs with wrong version metadata.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.min == 0 || self.api.max < self.api.min {
            anyhow::bail!(
                "invalid api span: min={} max={} (min must be >= 1 and max >= min)",
                self.api.min,
                self.api.max
            );
        }
        if self.group.is_empty() {
            anyhow::bail!("no [[group]] entries configured, nothing to generate");
        }
        Ok(())
    }
}

/// Resolve a header path by searching `base_dir` first, then each
/// `include_paths` entry. Absolute paths are returned as-is. If the file is
/// not found anywhere, falls back to `base_dir.join(path)` so the caller
/// gets a meaningful read error with context.
pub fn resolve_header(path: &Path, base_dir: &Path, include_paths: &[PathBuf]) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let candidate = base_dir.join(path);
    if candidate.exists() {
        return candidate;
    }
    for inc in include_paths {
        let candidate = inc.join(path);
        if candidate.exists() {
            return candidate;
        }
    }
    base_dir.join(path)
}

/// Load and parse an `ifcgen.toml` configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
    config.validate()?;
    Ok(config)
}
