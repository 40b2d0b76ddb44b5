//! Deciding whether (and in which direction) to recenter copy-number calls.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use crate::segment;
use crate::segment::Layout;
use crate::segment::SegmentRecord;

/// The magnitude a delta must exceed before the calls are recentered.
pub const THRESHOLD: f64 = 0.2;

/// An error related to computing a recentering delta.
#[derive(Debug)]
pub enum Error {
    /// An I/O error.
    Io(PathBuf, io::Error),

    /// A record could not be parsed.
    InvalidRecord {
        /// The file.
        path: PathBuf,

        /// The line number.
        line_no: usize,

        /// The parse error.
        err: segment::ParseError,
    },

    /// The called segments did not cover every expected chromosome.
    MissingChromosomes(PathBuf, Vec<String>),

    /// There were no called segments at all.
    NoSegments(PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(path, err) => write!(f, "i/o error reading `{}`: {err}", path.display()),
            Error::InvalidRecord { path, line_no, err } => write!(
                f,
                "invalid record at line {line_no} of `{}`: {err}",
                path.display()
            ),
            Error::MissingChromosomes(path, missing) => write!(
                f,
                "the called segments in `{}` do not cover every chromosome (missing: {}), so no \
                 recentering delta can be computed",
                path.display(),
                missing.join(", ")
            ),
            Error::NoSegments(path) => {
                write!(f, "no called segments found in `{}`", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

/// How the copy-number calls should be recentered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    /// Shift the calls down by the given magnitude.
    ShiftDown(f64),

    /// Shift the calls up by the given magnitude.
    ShiftUp(f64),

    /// Leave the calls as they are.
    NoShift,
}

impl Decision {
    /// Classifies a delta.
    ///
    /// The thresholds are exclusive: a delta of exactly `-0.2` or `0.2` is not
    /// shifted.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::recenter::Decision;
    ///
    /// assert_eq!(Decision::from_delta(-0.2001), Decision::ShiftDown(0.2001));
    /// assert_eq!(Decision::from_delta(0.2001), Decision::ShiftUp(0.2001));
    /// assert_eq!(Decision::from_delta(-0.2), Decision::NoShift);
    /// assert_eq!(Decision::from_delta(0.0), Decision::NoShift);
    /// ```
    pub fn from_delta(delta: f64) -> Self {
        if delta < -THRESHOLD {
            Decision::ShiftDown(delta.abs())
        } else if delta > THRESHOLD {
            Decision::ShiftUp(delta)
        } else {
            Decision::NoShift
        }
    }

    /// Gets the segment caller option and value that apply this decision, if
    /// any.
    pub fn caller_option(&self) -> Option<(&'static str, f64)> {
        match self {
            Decision::ShiftDown(magnitude) => Some(("--recenter-down", *magnitude)),
            Decision::ShiftUp(magnitude) => Some(("--recenter-up", *magnitude)),
            Decision::NoShift => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::ShiftDown(magnitude) => write!(f, "shift down by {magnitude}"),
            Decision::ShiftUp(magnitude) => write!(f, "shift up by {magnitude}"),
            Decision::NoShift => write!(f, "no shift"),
        }
    }
}

/// Reads every record of a segment table, skipping the header.
fn records(path: &Path, layout: &Layout) -> Result<Vec<SegmentRecord>> {
    let reader = File::open(path)
        .map(BufReader::new)
        .map_err(|err| Error::Io(path.to_path_buf(), err))?;

    let mut records = Vec::new();

    for (i, result) in reader.lines().enumerate() {
        let line = result.map_err(|err| Error::Io(path.to_path_buf(), err))?;

        if (i == 0 && segment::is_header(&line, layout)) || line.is_empty() {
            continue;
        }

        let record = SegmentRecord::parse(&line, layout).map_err(|err| Error::InvalidRecord {
            path: path.to_path_buf(),
            line_no: i + 1,
            err,
        })?;

        records.push(record);
    }

    Ok(records)
}

/// Gets the distinct chromosomes of a segment table.
pub fn chromosomes(path: impl AsRef<Path>, layout: &Layout) -> Result<BTreeSet<String>> {
    Ok(records(path.as_ref(), layout)?
        .into_iter()
        .map(|record| record.chromosome().name().to_string())
        .collect())
}

/// Computes the recentering delta of a called segment table.
///
/// The delta is the median, across chromosomes, of each chromosome's mean log
/// ratio. Every chromosome in `expected` must have at least one segment.
pub fn compute_delta(called: impl AsRef<Path>, expected: &BTreeSet<String>) -> Result<f64> {
    let called = called.as_ref();
    let records = records(called, &Layout::CALLED)?;

    let mut sums = BTreeMap::<&str, (f64, usize)>::new();
    for record in &records {
        let entry = sums.entry(record.chromosome().name()).or_default();
        entry.0 += record.log_ratio();
        entry.1 += 1;
    }

    let missing = expected
        .iter()
        .filter(|name| !sums.contains_key(name.as_str()))
        .cloned()
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        return Err(Error::MissingChromosomes(called.to_path_buf(), missing));
    }

    let means = sums
        .values()
        .map(|(sum, n)| sum / *n as f64)
        .collect::<Vec<_>>();

    median(means).ok_or_else(|| Error::NoSegments(called.to_path_buf()))
}

/// Computes the median of a list of values.
fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;

    match values.len() % 2 {
        0 => Some((values[mid - 1] + values[mid]) / 2.0),
        _ => Some(values[mid]),
    }
}
