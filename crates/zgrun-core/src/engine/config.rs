use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
}

pub const DEFAULT_ZGOUBI_PATH: &str = "zgoubi";
/// Label field width of current engine versions; older versions used 8.
pub const DEFAULT_LABEL_WIDTH: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_PARTICLES_PER_TASK: usize = 1000;

/// Settings shared by every engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Engine executable, looked up through `PATH` when not a path.
    pub zgoubi_path: PathBuf,
    /// Directory under which run directories are created.
    pub tmp_dir: PathBuf,
    /// Fallback label width for trajectory tables whose labels cannot be measured.
    pub label_width: usize,
    /// How long an idle tracking worker waits for work before checking for shutdown.
    pub poll_interval: Duration,
    /// Pause after a worker failure before the error is returned.
    pub shutdown_grace: Duration,
    pub max_particles_per_task: usize,
    /// Check every line for structural problems before running it.
    pub check_lines: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zgoubi_path: PathBuf::from(DEFAULT_ZGOUBI_PATH),
            tmp_dir: std::env::temp_dir(),
            label_width: DEFAULT_LABEL_WIDTH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_particles_per_task: DEFAULT_MAX_PARTICLES_PER_TASK,
            check_lines: false,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

#[derive(Default, Debug, Clone)]
pub struct EngineConfigBuilder {
    zgoubi_path: Option<PathBuf>,
    tmp_dir: Option<PathBuf>,
    label_width: Option<usize>,
    poll_interval: Option<Duration>,
    shutdown_grace: Option<Duration>,
    max_particles_per_task: Option<usize>,
    check_lines: Option<bool>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zgoubi_path(mut self, path: PathBuf) -> Self {
        self.zgoubi_path = Some(path);
        self
    }
    pub fn tmp_dir(mut self, dir: PathBuf) -> Self {
        self.tmp_dir = Some(dir);
        self
    }
    pub fn label_width(mut self, width: usize) -> Self {
        self.label_width = Some(width);
        self
    }
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }
    pub fn max_particles_per_task(mut self, n: usize) -> Self {
        self.max_particles_per_task = Some(n);
        self
    }
    pub fn check_lines(mut self, enabled: bool) -> Self {
        self.check_lines = Some(enabled);
        self
    }

    /// Fills unset values with defaults and validates the result.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            zgoubi_path: self.zgoubi_path.unwrap_or(defaults.zgoubi_path),
            tmp_dir: self.tmp_dir.unwrap_or(defaults.tmp_dir),
            label_width: self.label_width.unwrap_or(defaults.label_width),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            shutdown_grace: self.shutdown_grace.unwrap_or(defaults.shutdown_grace),
            max_particles_per_task: self
                .max_particles_per_task
                .unwrap_or(defaults.max_particles_per_task),
            check_lines: self.check_lines.unwrap_or(defaults.check_lines),
        };

        if config.zgoubi_path.as_os_str().is_empty() {
            return Err(invalid("zgoubi_path", "must not be empty"));
        }
        if config.label_width == 0 {
            return Err(invalid("label_width", "must be at least 1"));
        }
        if config.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be longer than zero"));
        }
        if config.max_particles_per_task == 0 {
            return Err(invalid("max_particles_per_task", "must be at least 1"));
        }
        Ok(config)
    }
}

fn invalid(parameter: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter,
        reason: reason.to_string(),
    }
}
