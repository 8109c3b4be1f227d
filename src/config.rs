use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::CliArgs;
use crate::refresh::{DEFAULT_CYCLE_TIMEOUT, Intervals};

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings after merging CLI flags, the config file and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source: Option<PathBuf>,
    pub intervals: Intervals,
    pub cycle_timeout: Duration,
    pub sync_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: None,
            intervals: Intervals::default(),
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
struct KtopConfigFile {
    refresh: RefreshSpec,
    #[serde(alias = "cycle_timeout")]
    cycle_timeout: Option<u64>,
    #[serde(alias = "sync_timeout")]
    sync_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RefreshSpec {
    pods: Option<u64>,
    nodes: Option<u64>,
    summary: Option<u64>,
}

impl Settings {
    /// Loads the discovered config file, if any, and applies CLI overrides.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let file = match discover_config_path() {
            Some(path) => Some((read_config(&path)?, path)),
            None => None,
        };
        Ok(Self::merge(args, file))
    }

    fn merge(args: &CliArgs, file: Option<(KtopConfigFile, PathBuf)>) -> Self {
        let defaults = Self::default();
        let (file, source) = match file {
            Some((file, path)) => (file, Some(path)),
            None => (KtopConfigFile::default(), None),
        };

        let pick = |flag: Option<u64>, configured: Option<u64>, fallback: Duration| {
            flag.or(configured)
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(fallback)
        };

        Self {
            source,
            intervals: Intervals {
                pods: pick(args.pods_refresh, file.refresh.pods, defaults.intervals.pods),
                nodes: pick(args.nodes_refresh, file.refresh.nodes, defaults.intervals.nodes),
                summary: pick(
                    args.summary_refresh,
                    file.refresh.summary,
                    defaults.intervals.summary,
                ),
            },
            cycle_timeout: pick(args.cycle_timeout, file.cycle_timeout, defaults.cycle_timeout),
            sync_timeout: pick(args.sync_timeout, file.sync_timeout, defaults.sync_timeout),
        }
    }
}

fn read_config(path: &Path) -> Result<KtopConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(KtopConfigFile::default());
    }
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KTOP_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [PathBuf::from("ktop.yaml"), PathBuf::from(".ktop.yaml")];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let candidate = PathBuf::from(home).join(".config/ktop/config.yaml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
