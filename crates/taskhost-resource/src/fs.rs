//! Filesystem capability and atomic configuration delivery.
//!
//! Resources never touch the disk directly; they go through an injected
//! [`Filesystem`], which lets tests substitute failures at any step.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use taskhost_common::constants::{CONFIG_FILE_MODE, TEMP_CONFIG_FILE_PREFIX};
use taskhost_common::error::{Result, TaskhostError};
use tempfile::NamedTempFile;

/// A temporary file that can be moved onto its final path.
///
/// Dropping a staged file without persisting it removes it.
pub trait StagedFile: Send {
    /// Returns the writer for the file's content.
    fn writer(&mut self) -> &mut dyn Write;

    /// Sets the file's permission bits.
    ///
    /// # Errors
    ///
    /// Returns an error if the permissions cannot be changed.
    fn set_mode(&mut self, mode: u32) -> io::Result<()>;

    /// Flushes content and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&mut self) -> io::Result<()>;

    /// Atomically renames the file to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails, in which case the staged file
    /// is removed and `dest` is left untouched.
    fn persist(self: Box<Self>, dest: &Path) -> io::Result<()>;
}

/// Filesystem operations needed to provision and remove resources.
pub trait Filesystem: Send + Sync {
    /// Creates `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Removes `path` and everything below it. An absent path is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates a uniquely named temporary file inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn staged_file(&self, dir: &Path, prefix: &str) -> io::Result<Box<dyn StagedFile>>;
}

/// [`Filesystem`] backed by the host's real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_dir_all(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn staged_file(&self, dir: &Path, prefix: &str) -> io::Result<Box<dyn StagedFile>> {
        let file = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
        Ok(Box::new(OsStagedFile(file)))
    }
}

struct OsStagedFile(NamedTempFile);

impl StagedFile for OsStagedFile {
    fn writer(&mut self) -> &mut dyn Write {
        &mut self.0
    }

    #[cfg(unix)]
    fn set_mode(&mut self, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        self.0
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&mut self, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.0.as_file().sync_all()
    }

    fn persist(self: Box<Self>, dest: &Path) -> io::Result<()> {
        let _ = self.0.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Writes configuration files so that readers only ever see complete content.
///
/// Content is produced into a temporary file inside the staging directory,
/// given explicit permissions, flushed to disk, and renamed onto the
/// destination. No step is retried.
#[derive(Clone)]
pub struct AtomicConfigWriter {
    fs: Arc<dyn Filesystem>,
    staging_dir: PathBuf,
    mode: u32,
}

impl AtomicConfigWriter {
    /// Creates a writer staging its temporary files in `staging_dir`.
    ///
    /// The staging directory must be on the same filesystem as every
    /// destination for the final rename to be atomic.
    #[must_use]
    pub fn new(fs: Arc<dyn Filesystem>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            staging_dir: staging_dir.into(),
            mode: CONFIG_FILE_MODE,
        }
    }

    /// Returns the directory temporary files are created in.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Produces the content of `dest` through `produce` and moves it into place.
    ///
    /// # Errors
    ///
    /// Returns the error of `produce` unchanged, or
    /// [`TaskhostError::Provisioning`] if staging, chmod, sync, or rename
    /// fails. The destination keeps its previous content on every failure.
    pub fn write<F>(&self, dest: &Path, produce: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let mut staged = self
            .fs
            .staged_file(&self.staging_dir, TEMP_CONFIG_FILE_PREFIX)
            .map_err(|e| provisioning("unable to create temp file in", &self.staging_dir, e))?;

        produce(staged.writer())?;

        staged
            .writer()
            .flush()
            .map_err(|e| provisioning("unable to flush", dest, e))?;
        staged
            .set_mode(self.mode)
            .map_err(|e| provisioning("unable to set permissions for", dest, e))?;
        staged
            .sync()
            .map_err(|e| provisioning("unable to sync", dest, e))?;
        staged
            .persist(dest)
            .map_err(|e| provisioning("unable to rename temp file to", dest, e))?;

        tracing::debug!(path = %dest.display(), "wrote config file");
        Ok(())
    }
}

impl std::fmt::Debug for AtomicConfigWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicConfigWriter")
            .field("staging_dir", &self.staging_dir)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish_non_exhaustive()
    }
}

/// Builds a [`TaskhostError::Provisioning`] for `path`.
pub(crate) fn provisioning(action: &'static str, path: &Path, source: io::Error) -> TaskhostError {
    TaskhostError::Provisioning {
        action,
        path: path.to_path_buf(),
        source,
    }
}
