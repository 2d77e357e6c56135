//! Filesystem layout and I/O for the cache directory.
//!
//! This module maps a cache root directory to the files it holds and provides
//! the small set of blocking I/O primitives the cache store needs:
//!
//! - [`write_atomic`] writes a whole file with write-then-rename semantics, so
//!   a reader never observes a half-written cache entry.
//! - [`read_all_bytes`] reads a whole file, reporting a missing file as
//!   `Ok(None)` rather than an error.
//! - [`remove_file`] deletes an entry for manual invalidation.
//!
//! The columnar encoding of cache entries lives in [`columnar`].
//!
//! Single-process, single-writer usage is assumed; there is no locking.

pub mod columnar;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use snafu::{Backtrace, prelude::*};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of the cache directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLocation {
    /// A cache stored on the local filesystem at the given path.
    Local(PathBuf),
}

impl CacheLocation {
    /// Creates a new `CacheLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        CacheLocation::Local(root.into())
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        match self {
            CacheLocation::Local(root) => root,
        }
    }

    /// Join the root with a relative path.
    pub fn join(&self, rel: &Path) -> PathBuf {
        self.root().join(rel)
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// An I/O error occurred on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Encoding or decoding the columnar cache format failed.
    #[snafu(display("Columnar format error at {path}: {source}"))]
    Columnar {
        /// The file being encoded or decoded.
        path: String,
        /// Underlying format error.
        source: columnar::ColumnarError,
    },
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).context(OtherIoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Temporary file that is deleted on drop unless it was renamed into place.
struct PendingFile {
    path: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit_to(mut self, target: &Path) -> StorageResult<()> {
        fs::rename(&self.path, target).context(OtherIoSnafu {
            path: target.display().to_string(),
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload is written to a temporary file next to the target, synced,
/// and renamed into place. Parent directories are created as needed.
pub fn write_atomic(location: &CacheLocation, rel_path: &Path, contents: &[u8]) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs)?;

    let pending = PendingFile::new(abs.with_extension("tmp"));
    let tmp = pending.path.display().to_string();

    let mut file = fs::File::create(&pending.path).context(OtherIoSnafu { path: &tmp })?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .context(OtherIoSnafu { path: &tmp })?;
    drop(file);

    pending.commit_to(&abs)
}

/// Read the full contents of the file at `rel_path`.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_all_bytes(location: &CacheLocation, rel_path: &Path) -> StorageResult<Option<Bytes>> {
    let abs = location.join(rel_path);
    match fs::read(&abs) {
        Ok(bytes) => Ok(Some(Bytes::from(bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(OtherIoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

/// Delete the file at `rel_path`. Returns whether a file was removed.
pub fn remove_file(location: &CacheLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = location.join(rel_path);
    match fs::remove_file(&abs) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(OtherIoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn write_atomic_creates_parents_and_replaces() -> TestResult {
        let tmp = TempDir::new()?;
        let location = CacheLocation::local(tmp.path());
        let rel = Path::new("nested/dir/entry.parquet");

        write_atomic(&location, rel, b"first")?;
        write_atomic(&location, rel, b"second")?;

        let bytes = read_all_bytes(&location, rel)?.ok_or("missing file")?;
        assert_eq!(&bytes[..], b"second");

        // no temp file left behind
        assert!(!location.join(Path::new("nested/dir/entry.tmp")).exists());
        Ok(())
    }

    #[test]
    fn missing_file_reads_as_none() -> TestResult {
        let tmp = TempDir::new()?;
        let location = CacheLocation::local(tmp.path());
        assert!(read_all_bytes(&location, Path::new("nope.parquet"))?.is_none());
        Ok(())
    }

    #[test]
    fn remove_reports_whether_anything_was_deleted() -> TestResult {
        let tmp = TempDir::new()?;
        let location = CacheLocation::local(tmp.path());
        let rel = Path::new("x.parquet");

        assert!(!remove_file(&location, rel)?);
        write_atomic(&location, rel, b"x")?;
        assert!(remove_file(&location, rel)?);
        assert!(read_all_bytes(&location, rel)?.is_none());
        Ok(())
    }
}
