//! Single-file JSON stores for development and small installations.
//!
//! Every operation takes an advisory lock on a sibling `.lock` file, reads
//! the current state from disk, and (for mutations) rewrites it via a
//! temporary file and a rename before releasing the lock. Several processes
//! can share one file: each sees the others' committed changes, and a crash
//! leaves either the old or the new file on disk, never a torn one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod card_store;
pub mod job_repository;

pub use card_store::JsonFileCardStore;
pub use job_repository::JsonFileJobRepository;

#[derive(Debug, Error)]
pub enum JsonFileError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> JsonFileError + '_ {
    move |source| JsonFileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A JSON state file guarded by an advisory lock file.
#[derive(Debug, Clone)]
pub(crate) struct LockedJsonFile {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Held for the duration of one operation; dropping it releases the lock.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock too.
        let _ = FileExt::unlock(&self.file);
    }
}

impl LockedJsonFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("json.lock");
        Self { path, lock_path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, exclusive: bool) -> Result<FileLock, JsonFileError> {
        if let Some(dir) = self.lock_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(io_error(&self.lock_path))?;
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(io_error(&self.lock_path))?;
        Ok(FileLock { file })
    }

    /// Read the current state under a shared lock.
    pub(crate) fn read<T, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, JsonFileError>
    where
        T: DeserializeOwned + Default,
    {
        let _lock = self.lock(false)?;
        let state: T = load(&self.path)?;
        Ok(f(&state))
    }

    /// Read, mutate and persist the state under an exclusive lock.
    ///
    /// Nothing is written when `f` fails.
    pub(crate) fn update<T, R, E>(
        &self,
        to_err: impl Fn(JsonFileError) -> E,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _lock = self.lock(true).map_err(&to_err)?;
        let mut state: T = load(&self.path).map_err(&to_err)?;
        let out = f(&mut state)?;
        persist(&self.path, &state).map_err(&to_err)?;
        Ok(out)
    }
}

/// Load the state at `path`, or the default state if there is no file yet.
pub(crate) fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T, JsonFileError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(io_error(path)(e)),
    };
    serde_json::from_slice(&bytes).map_err(|source| JsonFileError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace the file at `path` with `value`.
pub(crate) fn persist<T: Serialize>(path: &Path, value: &T) -> Result<(), JsonFileError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp).map_err(io_error(&tmp))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, value).map_err(|source| JsonFileError::Json {
            path: tmp.clone(),
            source,
        })?;
        out.flush().map_err(io_error(&tmp))?;
        out.get_ref().sync_all().map_err(io_error(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_error(path))
}
