//! The scratch directory that holds every artifact of a run.

use std::io;
use std::ops::Deref;
use std::path::Path;
use std::path::PathBuf;

use tempdir::TempDir;
use tracing::info;

/// The prefix of freshly created run directories.
const PREFIX: &str = "copyseg";

/// An error related to a [`RunDirectory`].
#[derive(Debug)]
pub enum Error {
    /// The scratch root does not exist or is not a directory.
    InvalidScratchRoot(PathBuf),

    /// The directory to resume does not exist or is not a directory.
    InvalidResumeDirectory(PathBuf),

    /// An I/O error.
    Io(PathBuf, io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidScratchRoot(path) => write!(
                f,
                "scratch root `{}` does not exist or is not a directory",
                path.display()
            ),
            Error::InvalidResumeDirectory(path) => write!(
                f,
                "run directory `{}` does not exist or is not a directory",
                path.display()
            ),
            Error::Io(path, err) => write!(f, "i/o error with `{}`: {err}", path.display()),
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

/// The directory holding the artifacts of a single run.
///
/// The directory is never removed implicitly: only a call to
/// [`RunDirectory::finish()`] on a successful run removes it, so a failed run
/// can always be inspected or resumed.
#[derive(Debug)]
pub struct RunDirectory {
    /// The directory.
    path: PathBuf,

    /// Whether the artifacts are kept after a successful run.
    keep: bool,

    /// Whether the directory was inherited from a previous run.
    resumed: bool,
}

impl RunDirectory {
    /// Creates a new, uniquely named run directory within `root`.
    pub fn create_in(root: impl AsRef<Path>, keep: bool) -> Result<Self> {
        let root = root.as_ref();

        if !root.is_dir() {
            return Err(Error::InvalidScratchRoot(root.to_path_buf()));
        }

        let path = TempDir::new_in(root, PREFIX)
            .map_err(|err| Error::Io(root.to_path_buf(), err))?
            .into_path();

        info!("created run directory `{}`", path.display());

        Ok(Self {
            path,
            keep,
            resumed: false,
        })
    }

    /// Resumes a run in an existing directory.
    ///
    /// The contents of the directory are not inspected here: each stage
    /// decides for itself whether its artifact is already complete.
    pub fn resume(path: impl Into<PathBuf>, keep: bool) -> Result<Self> {
        let path = path.into();

        if !path.is_dir() {
            return Err(Error::InvalidResumeDirectory(path));
        }

        info!("resuming run in `{}`", path.display());

        Ok(Self {
            path,
            keep,
            resumed: true,
        })
    }

    /// Gets the path of the directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the artifacts are kept after a successful run.
    pub fn keep(&self) -> bool {
        self.keep
    }

    /// Returns whether the directory was inherited from a previous run.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Gets the path of an artifact within the directory.
    pub fn artifact(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Tears down the directory after a successful run.
    ///
    /// The directory and everything in it is removed unless the artifacts are
    /// to be kept, in which case the directory is returned.
    pub fn finish(self) -> Result<Option<PathBuf>> {
        if self.keep {
            info!("keeping run directory `{}`", self.path.display());
            return Ok(Some(self.path));
        }

        std::fs::remove_dir_all(&self.path).map_err(|err| Error::Io(self.path.clone(), err))?;
        info!("removed run directory `{}`", self.path.display());
        Ok(None)
    }
}

impl Deref for RunDirectory {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_unique_directories() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new("workdir")?;

        let a = RunDirectory::create_in(root.path(), false)?;
        let b = RunDirectory::create_in(root.path(), false)?;

        assert_ne!(a.path(), b.path());
        assert!(a.is_dir());
        assert!(b.is_dir());
        assert!(a.path().starts_with(root.path()));
        assert!(!a.resumed());
        Ok(())
    }

    #[test]
    fn test_missing_scratch_root() {
        let err = RunDirectory::create_in("/copyseg/does/not/exist", false).unwrap_err();
        assert!(matches!(err, Error::InvalidScratchRoot(_)));
    }

    #[test]
    fn test_resume() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new("workdir")?;
        std::fs::write(root.path().join("sample.pileup"), "a\nb\n")?;

        let dir = RunDirectory::resume(root.path(), true)?;
        assert!(dir.resumed());
        assert_eq!(dir.artifact("sample.pileup"), root.path().join("sample.pileup"));
        assert!(dir.artifact("sample.pileup").exists());

        let err = RunDirectory::resume(root.path().join("missing"), true).unwrap_err();
        assert!(matches!(err, Error::InvalidResumeDirectory(_)));
        Ok(())
    }

    #[test]
    fn test_finish_removes() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new("workdir")?;
        let dir = RunDirectory::create_in(root.path(), false)?;
        let path = dir.path().to_path_buf();
        std::fs::write(dir.artifact("sample.pileup"), "a\nb\n")?;

        assert_eq!(dir.finish()?, None);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_finish_keeps() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new("workdir")?;
        let dir = RunDirectory::create_in(root.path(), true)?;
        let path = dir.path().to_path_buf();

        assert_eq!(dir.finish()?, Some(path.clone()));
        assert!(path.is_dir());
        Ok(())
    }
}
