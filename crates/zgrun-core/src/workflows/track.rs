use crate::core::models::bunch::{Bunch, Particle};
use crate::core::models::element::Element;
use crate::core::models::line::{Line, LineItem};
use crate::engine::config::EngineConfig;
use crate::engine::error::ZgoubiError;
use crate::engine::executor::{self, RunOptions};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::results::{OutputFile, Results};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};

/// Label of the marker the tracked bunch is recorded at. Also the title of the
/// generated program.
pub const TRACK_MARKER_LABEL: &str = "trackbun";
const TRACK_OUTPUT: OutputFile = OutputFile::Fai;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackOptions {
    pub run: RunOptions,
    /// Drop particles whose loss code is not "surviving".
    pub drop_lost: bool,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            drop_lost: true,
        }
    }
}

/// Tracks `bunch` through `line` on `n_threads` threads, or in a single run when
/// `n_threads` is at most 1.
pub fn track(
    line: &Line,
    bunch: &Bunch,
    n_threads: usize,
    config: &EngineConfig,
    options: &TrackOptions,
    reporter: &ProgressReporter,
) -> Result<Bunch, ZgoubiError> {
    if n_threads <= 1 {
        track_bunch(line, bunch, config, options)
    } else {
        track_bunch_mt(line, bunch, n_threads, config, options, reporter)
    }
}

/// Tracks `bunch` once through `line` and returns the particles recorded at its end.
///
/// `line` must not define its own OBJET; the bunch, its particle definition, the
/// recording marker and END are added around it.
///
/// # Errors
///
/// [`ZgoubiError::BadLine`] for a full line, [`ZgoubiError::EmptyBunch`] for a bunch
/// without particles, plus any failure of the run itself.
pub fn track_bunch(
    line: &Line,
    bunch: &Bunch,
    config: &EngineConfig,
    options: &TrackOptions,
) -> Result<Bunch, ZgoubiError> {
    track_bunch_with_results(line, bunch, config, options).map(|(tracked, _)| tracked)
}

/// Like [`track_bunch`], also returning the store of the run so its directory can be
/// inspected or kept.
#[instrument(skip_all, name = "track_bunch", fields(line = %line.name(), particles = bunch.len()))]
pub fn track_bunch_with_results(
    line: &Line,
    bunch: &Bunch,
    config: &EngineConfig,
    options: &TrackOptions,
) -> Result<(Bunch, Results), ZgoubiError> {
    if bunch.is_empty() {
        return Err(ZgoubiError::EmptyBunch);
    }
    let segment = tracking_segment(line)?;
    let program = tracking_program(segment, bunch);
    let (tracked, results) = run_and_extract(&program, bunch, config, options)?;
    if tracked.len() < bunch.len() {
        warn!(
            started = bunch.len(),
            finished = tracked.len(),
            "Particles lost during tracking"
        );
    }
    Ok((tracked, results))
}

/// `line` followed by the elements that record the bunch at its end.
fn tracking_segment(line: &Line) -> Result<Line, ZgoubiError> {
    if line.is_full_line() {
        return Err(ZgoubiError::BadLine(format!(
            "line '{}' defines its own OBJET; tracking needs a line without one",
            line.name()
        )));
    }
    let mut segment = Line::new(line.name());
    segment.push(line.clone()).extend([
        Element::marker(TRACK_MARKER_LABEL),
        Element::faiscnl(TRACK_OUTPUT.file_name()),
        Element::end(),
    ]);
    Ok(segment)
}

fn tracking_program(segment: impl Into<LineItem>, bunch: &Bunch) -> Line {
    let mut program = Line::new(TRACK_MARKER_LABEL);
    program
        .extend([
            Element::objet_bunch(bunch.clone()),
            Element::particul(bunch.mass(), bunch.charge()),
        ])
        .push(segment);
    program
}

fn run_and_extract(
    program: &Line,
    bunch: &Bunch,
    config: &EngineConfig,
    options: &TrackOptions,
) -> Result<(Bunch, Results), ZgoubiError> {
    let results = executor::run(program, config, &options.run)?;
    let tracked = results.get_bunch(
        TRACK_OUTPUT,
        Some(TRACK_MARKER_LABEL),
        Some(bunch),
        options.drop_lost,
    )?;
    Ok((tracked, results))
}

/// The tracking segment rendered once, with the side files its elements stage.
struct SharedSegment {
    text: Arc<str>,
    input_files: Vec<PathBuf>,
    _staging: Option<TempDir>,
}

impl SharedSegment {
    fn prepare(segment: &Line, config: &EngineConfig) -> Result<Self, ZgoubiError> {
        let staging = tempfile::Builder::new()
            .prefix("zgoubi_shared_")
            .tempdir_in(&config.tmp_dir)
            .map_err(ZgoubiError::io("create a staging directory"))?;
        for element in segment.elements() {
            element
                .setup(staging.path())
                .map_err(ZgoubiError::io(format!("stage side files of {}", element.keyword())))?;
        }
        let mut staged = fs::read_dir(staging.path())
            .map_err(ZgoubiError::io("list the staging directory"))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ZgoubiError::io("list the staging directory"))?;
        staged.sort();

        let mut input_files = segment.input_files().to_vec();
        let staging = if staged.is_empty() {
            None
        } else {
            debug!(files = staged.len(), "Staged shared side files");
            input_files.extend(staged);
            Some(staging)
        };
        Ok(Self {
            text: segment.output().into(),
            input_files,
            _staging: staging,
        })
    }

    fn program_for(&self, bunch: &Bunch) -> Line {
        let mut program = tracking_program(Element::raw(Arc::clone(&self.text)), bunch);
        program.add_input_files(self.input_files.iter().cloned());
        program
    }
}

struct Task {
    start_index: usize,
    bunch: Bunch,
}

enum TaskOutcome {
    Done {
        start_index: usize,
        particles: Vec<Particle>,
    },
    Failed {
        start_index: usize,
        error: ZgoubiError,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Worker {
    tasks: Arc<Mutex<Receiver<Task>>>,
    outcomes: Sender<TaskOutcome>,
    stop: Arc<AtomicBool>,
    segment: Arc<SharedSegment>,
    config: Arc<EngineConfig>,
    options: TrackOptions,
}

impl Worker {
    /// Pulls tasks until the stop flag is raised and the queue is empty.
    fn run(self) {
        loop {
            let next = lock(&self.tasks).recv_timeout(self.config.poll_interval);
            match next {
                Ok(task) => {
                    let outcome = self.process(task);
                    if self.outcomes.send(outcome).is_err() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.stop.load(Ordering::Acquire) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn process(&self, task: Task) -> TaskOutcome {
        let start_index = task.start_index;
        let tracked = panic::catch_unwind(AssertUnwindSafe(|| {
            let program = self.segment.program_for(&task.bunch);
            run_and_extract(&program, &task.bunch, &self.config, &self.options)
        }));
        match tracked {
            Ok(Ok((bunch, _results))) => TaskOutcome::Done {
                start_index,
                particles: bunch.into_particles(),
            },
            Ok(Err(error)) => {
                error!(start_index, error = %error, "Tracking task failed");
                TaskOutcome::Failed { start_index, error }
            }
            Err(_) => {
                error!(start_index, "Tracking task panicked");
                TaskOutcome::Failed {
                    start_index,
                    error: ZgoubiError::Internal("tracking worker panicked".to_string()),
                }
            }
        }
    }
}

/// Tracks `bunch` through `line` with up to `n_threads` engine processes at once.
///
/// The bunch is split into contiguous slices of at most
/// [`EngineConfig::max_particles_per_task`] particles, each tracked in its own run.
/// Survivors keep their original relative order whatever order the slices finish in.
///
/// # Errors
///
/// The first failed slice stops the remaining work and is returned as
/// [`ZgoubiError::Worker`]; see [`track_bunch`] for the other errors.
#[instrument(skip_all, name = "track_bunch_mt", fields(line = %line.name(), particles = bunch.len(), threads = n_threads))]
pub fn track_bunch_mt(
    line: &Line,
    bunch: &Bunch,
    n_threads: usize,
    config: &EngineConfig,
    options: &TrackOptions,
    reporter: &ProgressReporter,
) -> Result<Bunch, ZgoubiError> {
    if bunch.is_empty() {
        return Err(ZgoubiError::EmptyBunch);
    }
    let n_threads = n_threads.max(1);
    let segment = Arc::new(SharedSegment::prepare(&tracking_segment(line)?, config)?);
    let config = Arc::new(config.clone());

    reporter.report(Progress::PhaseStart { name: "Tracking" });
    let (task_tx, task_rx) = mpsc::channel::<Task>();
    let task_rx = Arc::new(Mutex::new(task_rx));
    let (outcome_tx, outcome_rx) = mpsc::channel::<TaskOutcome>();
    let stop = Arc::new(AtomicBool::new(false));

    let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(n_threads);
    for n in 0..n_threads {
        let worker = Worker {
            tasks: Arc::clone(&task_rx),
            outcomes: outcome_tx.clone(),
            stop: Arc::clone(&stop),
            segment: Arc::clone(&segment),
            config: Arc::clone(&config),
            options: *options,
        };
        let spawned = thread::Builder::new()
            .name(format!("track-worker-{n}"))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                stop.store(true, Ordering::Release);
                return Err(ZgoubiError::io("spawn a tracking worker")(e));
            }
        }
    }
    drop(outcome_tx);

    let total = bunch.len();
    let mut start_index = 0;
    let mut n_tasks = 0;
    for slice in bunch.split(config.max_particles_per_task, n_threads) {
        let len = slice.len();
        let task = Task {
            start_index,
            bunch: slice,
        };
        if task_tx.send(task).is_err() {
            stop.store(true, Ordering::Release);
            return Err(ZgoubiError::Internal(
                "tracking workers exited before receiving work".to_string(),
            ));
        }
        start_index += len;
        n_tasks += 1;
    }
    info!(tasks = n_tasks, workers = workers.len(), "Queued tracking tasks");
    reporter.report(Progress::TaskStart {
        total_steps: n_tasks as u64,
    });

    let mut particles = vec![Particle::default(); total];
    let mut survived = vec![false; total];
    for _ in 0..n_tasks {
        let outcome = outcome_rx.recv().map_err(|_| {
            ZgoubiError::Internal("tracking workers exited with tasks outstanding".to_string())
        })?;
        match outcome {
            TaskOutcome::Done {
                start_index,
                particles: tracked,
            } => {
                let end = start_index + tracked.len();
                if end > total {
                    stop.store(true, Ordering::Release);
                    return Err(ZgoubiError::Internal(format!(
                        "task at {start_index} returned {} particles, past the end of the bunch",
                        tracked.len()
                    )));
                }
                particles[start_index..end].copy_from_slice(&tracked);
                survived[start_index..end].fill(true);
                reporter.report(Progress::TaskIncrement {
                    particles: tracked.len() as u64,
                });
            }
            TaskOutcome::Failed { start_index, error } => {
                stop.store(true, Ordering::Release);
                let drained = drain(&task_rx);
                error!(
                    start_index,
                    skipped_tasks = drained,
                    "Stopping tracking workers after a failed task"
                );
                thread::sleep(config.shutdown_grace);
                reporter.report(Progress::TaskFinish);
                reporter.report(Progress::PhaseFinish);
                return Err(ZgoubiError::Worker {
                    start_index,
                    source: Box::new(error),
                });
            }
        }
    }

    stop.store(true, Ordering::Release);
    drop(task_tx);
    for handle in workers {
        if handle.join().is_err() {
            warn!("A tracking worker panicked while shutting down");
        }
    }
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    let survivors: Vec<Particle> = particles
        .into_iter()
        .zip(survived)
        .filter_map(|(particle, kept)| kept.then_some(particle))
        .collect();
    if survivors.len() < total {
        warn!(
            started = total,
            finished = survivors.len(),
            "Particles lost during tracking"
        );
    }
    Ok(Bunch::from_particles(
        survivors,
        bunch.rigidity(),
        bunch.mass(),
        bunch.charge(),
    ))
}

/// Empties the work queue, returning the number of tasks discarded.
fn drain(tasks: &Mutex<Receiver<Task>>) -> usize {
    let receiver = lock(tasks);
    let mut drained = 0;
    while receiver.try_recv().is_ok() {
        drained += 1;
    }
    drained
}
