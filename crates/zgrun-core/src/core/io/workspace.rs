use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tempfile::TempDir;
use tracing::{debug, warn};

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A uniquely named scratch directory holding one engine run.
///
/// The directory is removed by [`RunDirectory::clean`] or when the handle is dropped,
/// unless it was detached with [`RunDirectory::keep`].
#[derive(Debug)]
pub struct RunDirectory {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl RunDirectory {
    /// Creates a fresh directory named `<prefix><random>` under `root`.
    pub fn create_in(root: &Path, prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
        debug!(path = %dir.path().display(), "Created run directory");
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` once the directory has been removed or detached.
    pub fn is_released(&self) -> bool {
        lock_ignoring_poison(&self.dir).is_none()
    }

    /// Removes the directory. Calling it again, or after the directory vanished, is a no-op.
    pub fn clean(&self) {
        let Some(dir) = lock_ignoring_poison(&self.dir).take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(path = %self.path.display(), "Removed run directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove run directory"),
        }
    }

    /// Detaches the directory so it survives this handle, returning its path.
    pub fn keep(&self) -> PathBuf {
        match lock_ignoring_poison(&self.dir).take() {
            Some(dir) => dir.keep(),
            None => self.path.clone(),
        }
    }
}

/// Non-owning record of the run directories produced from one line.
///
/// Entries never extend a directory's lifetime; sweeping skips the ones whose owner
/// already dropped them.
#[derive(Debug, Default)]
pub struct RunRegistry {
    entries: Mutex<Vec<Weak<RunDirectory>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dir: &Arc<RunDirectory>) {
        let mut entries = lock_ignoring_poison(&self.entries);
        entries.retain(|entry| entry.strong_count() > 0);
        entries.push(Arc::downgrade(dir));
    }

    /// Number of registered directories whose owner is still alive.
    pub fn live_count(&self) -> usize {
        lock_ignoring_poison(&self.entries)
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    /// Cleans every still-alive directory and empties the registry.
    ///
    /// # Return
    ///
    /// The number of directories that were cleaned.
    pub fn sweep(&self) -> usize {
        let entries = std::mem::take(&mut *lock_ignoring_poison(&self.entries));
        let mut cleaned = 0;
        for dir in entries.iter().filter_map(Weak::upgrade) {
            if !dir.is_released() {
                dir.clean();
                cleaned += 1;
            }
        }
        cleaned
    }
}
