use super::config::EngineConfig;
use super::error::{RunFailure, ZgoubiError};
use super::results::{OutputFile, Results, RunTimings};
use crate::core::io::input::INPUT_FILE_NAME;
use crate::core::io::res_log::LogScan;
use crate::core::io::traits::{EngineInput, EngineOutput};
use crate::core::io::workspace::RunDirectory;
use crate::core::models::line::Line;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub const STDOUT_FILE_NAME: &str = "zgoubi.stdout";
pub const STDERR_FILE_NAME: &str = "zgoubi.stderr";
const RUN_DIR_PREFIX: &str = "zgoubi_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Capture engine stdout/stderr in the run directory instead of inheriting them.
    pub silence: bool,
}

/// Runs the engine once on `line` and returns the store owning its run directory.
///
/// The line is never modified; only a non-owning record of the new run directory is
/// added to [`Line::runs`].
///
/// # Errors
///
/// Returns [`ZgoubiError::Run`] for a recognized bad exit code or a fatal log line,
/// even if the engine exited with 0. Other nonzero exit codes are logged and the
/// store is returned so the caller can inspect it.
#[instrument(skip_all, name = "zgoubi_run", fields(line = %line.name()))]
pub fn run(line: &Line, config: &EngineConfig, options: &RunOptions) -> Result<Results, ZgoubiError> {
    let setup_start = Instant::now();
    if config.check_lines {
        line.check_line();
    }

    let run_dir = RunDirectory::create_in(&config.tmp_dir, RUN_DIR_PREFIX).map_err(
        ZgoubiError::io(format!(
            "create a run directory under {}",
            config.tmp_dir.display()
        )),
    )?;
    let run_dir = Arc::new(run_dir);
    let dir = run_dir.path();

    stage_input_files(line.input_files(), dir)?;
    for element in line.elements() {
        element.setup(dir).map_err(ZgoubiError::io(format!(
            "stage side files of {}",
            element.keyword()
        )))?;
    }
    line.write_to_path(dir.join(INPUT_FILE_NAME))
        .map_err(ZgoubiError::io(format!("write {INPUT_FILE_NAME}")))?;
    let setup = setup_start.elapsed();

    let run_start = Instant::now();
    let status = spawn_engine(config, dir, options)?;
    let run = run_start.elapsed();

    let code = exit_code(status);
    if code != 0 {
        if options.silence {
            log_captured_stderr(dir);
        }
        match classify_exit_code(code) {
            Some(kind) => {
                error!(code, dir = %dir.display(), "zgoubi failed: {}", kind);
                return Err(ZgoubiError::Run {
                    kind,
                    detail: format!("exit code {code} in {}", dir.display()),
                });
            }
            None => error!(code, dir = %dir.display(), "zgoubi exited with a nonzero code"),
        }
    }

    scan_run_log(dir)?;

    let results = Results::new(Arc::clone(&run_dir), element_types(line), config.label_width)
        .with_timings(RunTimings { setup, run });
    line.runs().register(&run_dir);
    info!(
        dir = %dir.display(),
        setup_ms = setup.as_millis() as u64,
        run_ms = run.as_millis() as u64,
        "zgoubi run finished"
    );
    Ok(results)
}

/// Places every declared input file in the run directory, by symlink when possible.
fn stage_input_files(files: &[PathBuf], dir: &Path) -> Result<(), ZgoubiError> {
    if files.is_empty() {
        return Ok(());
    }
    let cwd = std::env::current_dir().map_err(ZgoubiError::io("read the current directory"))?;
    for file in files {
        let source = cwd.join(file);
        let Some(name) = source.file_name() else {
            return Err(ZgoubiError::BadLine(format!(
                "input file '{}' has no file name",
                file.display()
            )));
        };
        if !source.exists() {
            warn!(file = %source.display(), "Declared input file does not exist");
        }
        let destination = dir.join(name);
        if fs::symlink_metadata(&destination).is_ok() {
            fs::remove_file(&destination).map_err(ZgoubiError::io(format!(
                "replace {}",
                destination.display()
            )))?;
        }
        link_or_copy(&source, &destination).map_err(ZgoubiError::io(format!(
            "stage {} into {}",
            source.display(),
            dir.display()
        )))?;
        debug!(file = %source.display(), "Staged input file");
    }
    Ok(())
}

#[cfg(unix)]
fn link_or_copy(source: &Path, destination: &Path) -> io::Result<()> {
    match std::os::unix::fs::symlink(source, destination) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "Symlink failed, copying instead");
            fs::copy(source, destination).map(|_| ())
        }
    }
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, destination: &Path) -> io::Result<()> {
    fs::copy(source, destination).map(|_| ())
}

fn spawn_engine(
    config: &EngineConfig,
    dir: &Path,
    options: &RunOptions,
) -> Result<ExitStatus, ZgoubiError> {
    let mut command = Command::new(&config.zgoubi_path);
    command.current_dir(dir).stdin(Stdio::null());
    if options.silence {
        let stdout = File::create(dir.join(STDOUT_FILE_NAME))
            .map_err(ZgoubiError::io(format!("create {STDOUT_FILE_NAME}")))?;
        let stderr = File::create(dir.join(STDERR_FILE_NAME))
            .map_err(ZgoubiError::io(format!("create {STDERR_FILE_NAME}")))?;
        command.stdout(stdout).stderr(stderr);
    }
    debug!(executable = %config.zgoubi_path.display(), "Starting zgoubi");
    command.status().map_err(ZgoubiError::io(format!(
        "launch {}",
        config.zgoubi_path.display()
    )))
}

/// Exit code of the process; a process killed by a signal reports the negated signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Maps the exit codes with a known cause. 32512 is the raw wait status of a shell
/// that could not load the executable, 127 its decoded form.
pub fn classify_exit_code(code: i32) -> Option<RunFailure> {
    match code {
        32512 | 127 => Some(RunFailure::MissingRuntimeLibraries),
        -9 => Some(RunFailure::OutOfMemory),
        2 => Some(RunFailure::RuntimeFault),
        _ => None,
    }
}

fn log_captured_stderr(dir: &Path) {
    match fs::read_to_string(dir.join(STDERR_FILE_NAME)) {
        Ok(text) if !text.trim().is_empty() => error!(stderr = %text.trim_end(), "zgoubi stderr"),
        Ok(_) => {}
        Err(e) => debug!(error = %e, "No captured stderr"),
    }
}

fn scan_run_log(dir: &Path) -> Result<(), ZgoubiError> {
    let log_name = OutputFile::Res.file_name();
    let scan = match LogScan::read_from_path(dir.join(log_name)) {
        Ok(scan) => scan,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ZgoubiError::MissingFile {
                file: log_name,
                dir: dir.to_path_buf(),
            });
        }
        Err(e) => return Err(ZgoubiError::io(format!("scan {log_name}"))(e)),
    };
    for finding in &scan.findings {
        warn!(line = finding.line_number, "zgoubi.res: {}", finding.text);
    }
    match scan.fatal {
        Some(fatal) => {
            error!(line = fatal.line_number, "zgoubi.res: {}", fatal.text);
            Err(ZgoubiError::Run {
                kind: RunFailure::FatalLogLine,
                detail: fatal.text,
            })
        }
        None => Ok(()),
    }
}

/// Distinct element type names of the flattened line, in first-seen order.
fn element_types(line: &Line) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for element in line.elements() {
        let name = element.type_name();
        if !types.iter().any(|t| t == name) {
            types.push(name.to_string());
        }
    }
    types
}
