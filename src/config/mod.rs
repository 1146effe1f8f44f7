//! Run configuration.
//!
//! A run is described by one TOML file: a `[run]` table of options and any
//! number of `[[pools]]` tables (see [`pool_config`]). Command-line arguments
//! override file values through [`RunOptions::merge_cli`], an explicit
//! per-field merge so every override is visible at compile time.

pub mod cli_args;
pub mod pool_config;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::cli_args::CliArgs;
use crate::config::pool_config::PoolConfig;
use crate::utils;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run: RunOptions,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        utils::read_toml_from_file(path)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .with_context(|| format!("failed to load run configuration {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunOptions {
    /// How many failures one test case may accumulate before its result is
    /// final. 1 means a single re-run after the first failure.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Upper bound for one blocking poll on the work queue.
    #[serde(with = "humantime_serde", default = "default_poll_timeout")]
    pub poll_timeout: Duration,

    /// Upper bound for one executed test command.
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Command template for the default runner. `{package}`, `{class}`,
    /// `{method}` and `{serial}` are substituted per dispatch.
    #[serde(default = "default_command_template")]
    pub command_template: String,

    /// Test case manifest path.
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Regex over `class#method` selecting which test cases run.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            retry_limit: default_retry_limit(),
            poll_timeout: default_poll_timeout(),
            command_timeout: default_command_timeout(),
            output_dir: default_output_dir(),
            command_template: default_command_template(),
            manifest: None,
            filter: None,
        }
    }
}

impl RunOptions {
    /// Folds command-line overrides into the file-loaded options, field by
    /// field. Flags that were not given leave the file value untouched.
    pub fn merge_cli(mut self, args: &CliArgs) -> Self {
        if let Some(retry) = args.retry {
            self.retry_limit = retry;
        }
        if let Some(timeout) = args.timeout {
            self.command_timeout = Duration::from_secs(timeout);
        }
        if let Some(poll_timeout) = args.poll_timeout {
            self.poll_timeout = Duration::from_secs(poll_timeout);
        }
        if let Some(output) = &args.output {
            self.output_dir = output.clone();
        }
        if let Some(manifest) = &args.manifest {
            self.manifest = Some(manifest.clone());
        }
        if let Some(filter) = &args.filter {
            self.filter = Some(filter.clone());
        }
        self
    }
}

fn default_retry_limit() -> u32 {
    1
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("testpool-reports")
}

fn default_command_template() -> String {
    "echo {package}.{class}#{method}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_run_table_with_durations() {
        let config: RunConfig = toml::from_str(
            r#"
            [run]
            retry_limit = 2
            poll_timeout = "3s"
            command_timeout = "10m"
            manifest = "tests.toml"

            [[pools]]
            name = "default"
            "#,
        )
        .unwrap();
        assert_eq!(config.run.retry_limit, 2);
        assert_eq!(config.run.poll_timeout, Duration::from_secs(3));
        assert_eq!(config.run.command_timeout, Duration::from_secs(600));
        assert_eq!(config.pools.len(), 1);
    }

    #[test]
    fn cli_overrides_win_field_by_field() {
        let args = CliArgs::parse_from([
            "testpool",
            "--retry",
            "5",
            "--timeout",
            "30",
            "--filter",
            "Smoke.*",
        ]);
        let options = RunOptions {
            retry_limit: 1,
            filter: Some("ignored".to_string()),
            ..RunOptions::default()
        }
        .merge_cli(&args);
        assert_eq!(options.retry_limit, 5);
        assert_eq!(options.command_timeout, Duration::from_secs(30));
        assert_eq!(options.filter.as_deref(), Some("Smoke.*"));
        // Untouched fields keep their file values.
        assert_eq!(options.poll_timeout, Duration::from_secs(10));
    }
}
