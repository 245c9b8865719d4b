//! Advisory exclusive locking on a single file with a bounded wait.
//!
//! The lock is taken on the data file itself through `flock`-style advisory
//! locking, so it serializes access between tasks of one process and between
//! independent processes alike. Acquisition never blocks in the kernel: it
//! polls with a fixed backoff until the timeout elapses.

use crate::models::error::StoreError;
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Open an existing file for reading only.
    Read,
    /// Open for reading and rewriting, creating the file and its parent
    /// directories when missing.
    ReadWrite,
}

/// An open file holding an exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: Utf8PathBuf,
}

impl LockedFile {
    /// Opens `path` and waits up to `timeout` for the exclusive lock.
    ///
    /// Returns `Ok(None)` for [`Access::Read`] when the file does not exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockTimeout`] when another holder keeps the lock for the
    /// whole `timeout`, [`StoreError::Io`] when the file cannot be opened.
    #[tracing::instrument(level = "debug")]
    pub fn acquire(
        path: &Utf8Path,
        access: Access,
        timeout: Duration,
    ) -> Result<Option<Self>, StoreError> {
        let file = match access {
            Access::Read => match File::open(path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(%path, "File does not exist");
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            },
            Access::ReadWrite => {
                if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)?
            }
        };

        lock_with_timeout(&file, path, timeout)?;
        debug!(%path, "File lock acquired");

        Ok(Some(Self {
            file,
            path: path.to_owned(),
        }))
    }

    /// Reads and parses the whole file.
    ///
    /// Empty files read as `None`. Invalid JSON is logged and also reads as
    /// `None`: a corrupt log is treated as having no data.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when reading fails.
    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, StoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        self.file.read_to_string(&mut content)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                error!(path = %self.path, %err, "Invalid JSON in file, treating as empty");
                Ok(None)
            }
        }
    }

    /// Whether the file holds nothing but whitespace.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when reading fails.
    pub fn is_blank(&mut self) -> Result<bool, StoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut content = Vec::new();
        self.file.read_to_end(&mut content)?;
        Ok(content.iter().all(u8::is_ascii_whitespace))
    }

    /// Truncates the file and writes `value` as pretty JSON, then syncs it to disk.
    ///
    /// # Errors
    ///
    /// [`StoreError::SerdeJson`] or [`StoreError::Io`].
    pub fn rewrite_json<T: Serialize>(&mut self, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        let mut writer = BufWriter::new(&self.file);
        writer.write_all(&bytes)?;
        writer.flush()?;
        drop(writer);
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => debug!(path = %self.path, "File lock released"),
            Err(err) => warn!(path = %self.path, %err, "Error releasing file lock"),
        }
    }
}

fn lock_with_timeout(file: &File, path: &Utf8Path, timeout: Duration) -> Result<(), StoreError> {
    let contended = fs2::lock_contended_error().raw_os_error();
    let started = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(err) if err.raw_os_error() == contended || err.kind() == io::ErrorKind::WouldBlock => {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    error!(%path, ?timeout, "Failed to acquire file lock within timeout");
                    return Err(StoreError::LockTimeout {
                        path: path.to_owned(),
                        timeout,
                    });
                }
                thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - elapsed));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "missing.json");

        let locked = LockedFile::acquire(&path, Access::Read, DEFAULT_LOCK_TIMEOUT).unwrap();

        assert!(locked.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn read_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "nested/deeper/events.json");

        let mut locked = LockedFile::acquire(&path, Access::ReadWrite, DEFAULT_LOCK_TIMEOUT)
            .unwrap()
            .unwrap();
        locked.rewrite_json(&vec![1, 2, 3]).unwrap();
        drop(locked);

        let mut locked = LockedFile::acquire(&path, Access::Read, DEFAULT_LOCK_TIMEOUT)
            .unwrap()
            .unwrap();
        assert_eq!(locked.read_json::<Vec<i32>>().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn rewrite_truncates_longer_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "events.json");
        fs::write(&path, "[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]").unwrap();

        let mut locked = LockedFile::acquire(&path, Access::ReadWrite, DEFAULT_LOCK_TIMEOUT)
            .unwrap()
            .unwrap();
        locked.rewrite_json(&vec![1]).unwrap();
        drop(locked);

        let written: Vec<i32> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, vec![1]);
    }

    #[test]
    fn corrupt_json_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "events.json");
        fs::write(&path, "[{\"timestamp\": ").unwrap();

        let mut locked = LockedFile::acquire(&path, Access::Read, DEFAULT_LOCK_TIMEOUT)
            .unwrap()
            .unwrap();

        assert_eq!(locked.read_json::<Vec<serde_json::Value>>().unwrap(), None);
    }

    #[test]
    fn blank_only_when_nothing_but_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "events.json");
        let mut locked = LockedFile::acquire(&path, Access::ReadWrite, DEFAULT_LOCK_TIMEOUT)
            .unwrap()
            .unwrap();

        assert!(locked.is_blank().unwrap());
        fs::write(&path, " \n\t").unwrap();
        assert!(locked.is_blank().unwrap());
        fs::write(&path, "{not json").unwrap();
        assert!(!locked.is_blank().unwrap());
    }

    #[test]
    fn held_lock_times_out_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "events.json");
        fs::write(&path, "[]").unwrap();

        let holder = File::open(&path).unwrap();
        holder.lock_exclusive().unwrap();

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let out = LockedFile::acquire(&path, Access::Read, timeout);
        let elapsed = started.elapsed();

        assert!(matches!(out, Err(StoreError::LockTimeout { .. })));
        assert!(elapsed >= timeout, "gave up too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "hung for {elapsed:?}");

        holder.unlock().unwrap();
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "events.json");

        let first = LockedFile::acquire(&path, Access::ReadWrite, DEFAULT_LOCK_TIMEOUT).unwrap();
        drop(first);

        let second = LockedFile::acquire(&path, Access::ReadWrite, Duration::from_millis(100));
        assert!(second.unwrap().is_some());
    }

    #[test]
    fn waits_for_holder_to_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "events.json");
        fs::write(&path, "[]").unwrap();

        let holder = File::open(&path).unwrap();
        holder.lock_exclusive().unwrap();
        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            holder.unlock().unwrap();
        });

        let out = LockedFile::acquire(&path, Access::Read, Duration::from_secs(5));

        assert!(out.unwrap().is_some());
        release.join().unwrap();
    }
}
