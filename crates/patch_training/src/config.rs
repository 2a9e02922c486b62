use std::path::{Path, PathBuf};

use patch_models::PatchProducerConfig;
use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "patchtrain.toml";
const CONFIG_ENV: &str = "PATCHTRAIN_CONFIG";

/// Run settings that are not per-invocation flags. CLI flags override these.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub output_root: PathBuf,
    pub data_root: PathBuf,
    pub seed: u64,
    pub patch: PatchProducerConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("trained_models"),
            data_root: PathBuf::from("assets/tiles"),
            seed: 42,
            patch: PatchProducerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    output_root: Option<String>,
    data_root: Option<String>,
    seed: Option<u64>,
    patch: Option<PatchSection>,
}

#[derive(Debug, Deserialize, Default)]
struct PatchSection {
    metadata_dim: Option<usize>,
    patch_size: Option<usize>,
    strength: Option<f32>,
}

impl RunConfig {
    /// Reads `$PATCHTRAIN_CONFIG`, else `patchtrain.toml` in the working directory, else defaults.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        match Self::from_path(&path) {
            Some(cfg) => {
                tracing::debug!(path = %path.display(), "loaded run config");
                cfg
            }
            None => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), "unreadable run config; using defaults");
                }
                Self::default()
            }
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Option<Self> {
        let file: RunConfigFile = toml::from_str(raw).ok()?;
        Some(Self::from_file(file))
    }

    fn from_file(file: RunConfigFile) -> Self {
        let defaults = Self::default();
        let patch = file.patch.unwrap_or_default();
        Self {
            output_root: file
                .output_root
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            data_root: file
                .data_root
                .map(PathBuf::from)
                .unwrap_or(defaults.data_root),
            seed: file.seed.unwrap_or(defaults.seed),
            patch: PatchProducerConfig {
                metadata_dim: patch.metadata_dim.unwrap_or(defaults.patch.metadata_dim),
                patch_size: patch.patch_size.unwrap_or(defaults.patch.patch_size),
                strength: patch.strength.unwrap_or(defaults.patch.strength),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(RunConfig::from_toml(""), Some(RunConfig::default()));
    }

    #[test]
    fn partial_patch_section() {
        let cfg = RunConfig::from_toml(
            "output_root = \"runs\"\nseed = 7\n[patch]\npatch_size = 8\n",
        )
        .expect("parse");
        assert_eq!(cfg.output_root, PathBuf::from("runs"));
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.patch.patch_size, 8);
        assert_eq!(cfg.patch.metadata_dim, 36);
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert_eq!(RunConfig::from_toml("seed = \"nope\""), None);
    }
}
