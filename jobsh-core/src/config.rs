//! Shell configuration, read from `$XDG_CONFIG_HOME/jobsh/config.yaml`.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::history::DEFAULT_HISTORY_SIZE;

pub const CONFIG_FILE: &str = "config.yaml";

/// Job ids are allocated below this bound unless configured otherwise.
pub const DEFAULT_MAX_JOBS: u32 = 1 << 16;

/// Smallest usable bound: ids start at 1 and the bound is exclusive.
pub const MIN_MAX_JOBS: u32 = 2;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {}", path.display())]
    #[diagnostic(help("see the `ShellConfig` fields: max_jobs, history_size, prompt, notify_done"))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("max_jobs in {} is {max_jobs}, leaving no job ids", path.display())]
    #[diagnostic(help("max_jobs is an exclusive bound and must be at least 2"))]
    MaxJobs { path: PathBuf, max_jobs: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// `user@host in dir> `
    #[default]
    Full,
    /// `jobsh> `
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Upper bound (exclusive) for job ids.
    pub max_jobs: u32,
    /// Number of input lines kept for `history` and `!` expansion.
    pub history_size: usize,
    pub prompt: PromptStyle,
    /// Announce background jobs that finish.
    pub notify_done: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            history_size: DEFAULT_HISTORY_SIZE,
            prompt: PromptStyle::default(),
            notify_done: true,
        }
    }
}

impl ShellConfig {
    /// The user's config file, if one exists.
    pub fn default_path() -> Option<PathBuf> {
        xdg::BaseDirectories::with_prefix("jobsh").find_config_file(CONFIG_FILE)
    }

    /// Load `path`, or the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; an explicitly requested
    /// file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        if config.max_jobs < MIN_MAX_JOBS {
            return Err(ConfigError::MaxJobs {
                path,
                max_jobs: config.max_jobs,
            });
        }
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }
}
