//! Artifacts produced by pipeline stages.
//!
//! Every stage of a run writes exactly one artifact, and the validity of that
//! artifact is the only record of whether the stage completed. Several of the
//! wrapped tools write a single diagnostic line to their output path instead of
//! exiting with a non-zero status, so an artifact is only considered valid when
//! it holds strictly more than one line.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

/// The suffix appended to outputs left behind by a failed tool invocation.
pub const FAILED_SUFFIX: &str = "failed";

/// Returns whether the artifact at `path` exists and contains more than one
/// line.
///
/// A final line without a trailing newline still counts as a line. Anything
/// that cannot be opened and read as a regular file (including directories and
/// dangling links) is invalid.
///
/// # Examples
///
/// ```
/// let dir = tempdir::TempDir::new("artifact")?;
/// let path = dir.path().join("out.txt");
/// assert!(!copyseg::artifact::is_valid(&path));
///
/// std::fs::write(&path, "only one line\n")?;
/// assert!(!copyseg::artifact::is_valid(&path));
///
/// std::fs::write(&path, "header\nrecord")?;
/// assert!(copyseg::artifact::is_valid(&path));
///
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn is_valid(path: impl AsRef<Path>) -> bool {
    count_lines_up_to(path.as_ref(), 2)
        .map(|lines| lines >= 2)
        .unwrap_or(false)
}

/// Counts the lines in a file, stopping once `limit` lines have been read.
fn count_lines_up_to(path: &Path, limit: usize) -> io::Result<usize> {
    if !path.metadata()?.is_file() {
        return Ok(0);
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = Vec::new();
    let mut lines = 0;

    while lines < limit {
        buffer.clear();

        match reader.read_until(b'\n', &mut buffer)? {
            0 => break,
            _ => lines += 1,
        }
    }

    Ok(lines)
}

/// Returns the path a failed output is moved to.
pub fn failed_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(FAILED_SUFFIX);
    path.with_file_name(name)
}

/// Moves an output written by a failed invocation out of the way so that it
/// can be inspected but is never picked up as a completed artifact.
///
/// Returns the new location, or [`None`] if there was nothing to move.
pub fn quarantine(path: &Path) -> io::Result<Option<PathBuf>> {
    if path.symlink_metadata().is_err() {
        return Ok(None);
    }

    let destination = failed_path(path);
    std::fs::rename(path, &destination)?;
    Ok(Some(destination))
}

/// Makes `alias` refer to the artifact at `original` without copying it.
///
/// When both paths share a parent directory, the link is relative so that the
/// run directory can be moved as a whole. Any stale entry at `alias` is
/// replaced.
pub fn alias(original: &Path, alias: &Path) -> io::Result<()> {
    if alias.symlink_metadata().is_ok() {
        std::fs::remove_file(alias)?;
    }

    let target = match (original.parent(), alias.parent(), original.file_name()) {
        (Some(a), Some(b), Some(name)) if a == b => PathBuf::from(name),
        _ => original.to_path_buf(),
    };

    link(&target, original, alias)
}

/// Creates the alias as a symbolic link to `target`.
#[cfg(unix)]
fn link(target: &Path, _original: &Path, alias: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, alias)
}

/// Creates the alias as a hard link to `original`.
#[cfg(not(unix))]
fn link(_target: &Path, original: &Path, alias: &Path) -> io::Result<()> {
    std::fs::hard_link(original, alias)
}
