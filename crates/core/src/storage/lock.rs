use anyhow::Context;
use std::fs::{File, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

// Log files are read-modify-written wholesale, so two drivers on one data directory would
// interleave and lose records. This guards against concurrent runs for the same directory.
const LOCK_FILE_NAME: &str = ".forecast-run.lock";

/// An exclusive advisory lock on the data directory's lock file.
///
/// The kernel drops the lock when the file is closed, including when the process is killed, so a
/// lock file left behind by a dead run never blocks the next one. The file itself stays in place.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

/// Takes the run lock for `data_dir`. Returns `None` when another run holds it.
pub fn try_acquire_run_lock(data_dir: &Path) -> anyhow::Result<Option<RunLock>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let path = data_dir.join(LOCK_FILE_NAME);

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file {}", path.display()))?;

    match file.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => return Ok(None),
        Err(TryLockError::Error(err)) => {
            return Err(err).with_context(|| format!("failed to lock {}", path.display()))
        }
    }

    // Holder's pid, for whoever finds the directory busy.
    file.set_len(0)
        .and_then(|_| writeln!(file, "{}", std::process::id()))
        .with_context(|| format!("failed to write lock file {}", path.display()))?;

    Ok(Some(RunLock { path, file }))
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) -> anyhow::Result<()> {
        self.file
            .unlock()
            .with_context(|| format!("failed to release run lock {}", self.path.display()))
    }
}
