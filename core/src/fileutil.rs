//! File Utility Functions

use crate::error::{Result, RtError};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Returns the absolute path after resolving the given path. The file need
/// not exist, but its parent directory must.
///
/// * `path` - The path.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Ok(p);
    }
    let name = path
        .file_name()
        .ok_or_else(|| RtError::Usage(format!("invalid path {}", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent
        .canonicalize()
        .map(|p| p.join(name))
        .map_err(|e| RtError::system(&format!("invalid path {}", path.display()), e))
}

/// Returns `path` with `suffix` appended to its file name, e.g.
/// `amb.dat` + `.lock` gives `amb.dat.lock`.
///
/// * `path`   - The path.
/// * `suffix` - Suffix to append.
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

/// An advisory lock on a file, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until an exclusive lock on `path` is held. Creates the file if
    /// needed.
    ///
    /// * `path` - The lock file.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock()
            .map_err(|e| RtError::system(&format!("cannot lock {}", path.display()), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Blocks until a shared lock on `path` is held. Creates the file if
    /// needed.
    ///
    /// * `path` - The lock file.
    pub fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_shared()
            .map_err(|e| RtError::system(&format!("cannot lock {}", path.display()), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns an exclusive lock if nobody else holds one, `None` otherwise.
    ///
    /// * `path` - The lock file.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(std::fs::TryLockError::WouldBlock) => Ok(None),
            Err(std::fs::TryLockError::Error(e)) => {
                Err(RtError::system(&format!("cannot lock {}", path.display()), e))
            }
        }
    }

    /// Returns the locked path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| RtError::system(&format!("cannot open lock file {}", path.display()), e))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("unlock {}: {e}", self.path.display());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
