use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use zgrun::engine::config::{EngineConfig, EngineConfigBuilder};

/// Engine settings as read from a TOML file; every key is optional.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PartialEngineConfig {
    #[serde(rename = "zgoubi-path")]
    zgoubi_path: Option<PathBuf>,
    #[serde(rename = "tmp-dir")]
    tmp_dir: Option<PathBuf>,
    #[serde(rename = "label-width")]
    label_width: Option<usize>,
    #[serde(rename = "poll-interval-ms")]
    poll_interval_ms: Option<u64>,
    #[serde(rename = "shutdown-grace-ms")]
    shutdown_grace_ms: Option<u64>,
    #[serde(rename = "max-particles-per-task")]
    max_particles_per_task: Option<usize>,
    #[serde(rename = "check-lines")]
    check_lines: Option<bool>,
}

impl PartialEngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolves the final engine settings. Values given on the command line win over
    /// the file; anything left unset falls back to the engine defaults.
    pub fn merge_with_cli(self, cli: &Cli) -> Result<EngineConfig> {
        let mut builder = EngineConfigBuilder::new();

        if let Some(path) = cli.zgoubi.clone().or(self.zgoubi_path) {
            builder = builder.zgoubi_path(path);
        }
        if let Some(dir) = cli.tmp_dir.clone().or(self.tmp_dir) {
            builder = builder.tmp_dir(dir);
        }
        if let Some(width) = self.label_width {
            builder = builder.label_width(width);
        }
        if let Some(ms) = self.poll_interval_ms {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.shutdown_grace_ms {
            builder = builder.shutdown_grace(Duration::from_millis(ms));
        }

        let cli_max_particles = match &cli.command {
            Commands::Track(args) => args.max_particles,
            Commands::Run(_) => None,
        };
        if let Some(n) = cli_max_particles.or(self.max_particles_per_task) {
            builder = builder.max_particles_per_task(n);
        }

        if cli.check_lines {
            builder = builder.check_lines(true);
        } else if let Some(enabled) = self.check_lines {
            builder = builder.check_lines(enabled);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }
}
