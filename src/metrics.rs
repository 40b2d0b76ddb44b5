//! Alignment statistics and the normalization ratio derived from them.

use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

/// Matches the mapped read line of an alignment statistics report, for
/// example `88 + 0 mapped (97.78% : N/A)` or `88 mapped (97.78%)`.
static MAPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?: \+ \d+)? mapped \(").unwrap());

/// An error related to alignment statistics.
#[derive(Debug)]
pub enum Error {
    /// The report could not be read.
    Io(PathBuf, std::io::Error),

    /// The report did not contain a mapped read count.
    MissingMappedCount(PathBuf),

    /// The mapped read count was not a valid number.
    InvalidMappedCount(PathBuf, std::num::ParseIntError),

    /// The tumor sample had no mapped reads.
    ZeroTumorReads,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(path, err) => write!(f, "i/o error reading `{}`: {err}", path.display()),
            Error::MissingMappedCount(path) => write!(
                f,
                "no mapped read count found in alignment statistics `{}`",
                path.display()
            ),
            Error::InvalidMappedCount(path, err) => write!(
                f,
                "invalid mapped read count in alignment statistics `{}`: {err}",
                path.display()
            ),
            Error::ZeroTumorReads => write!(
                f,
                "the tumor alignment has no mapped reads, so no data ratio can be computed"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

/// Statistics parsed from an alignment statistics report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AlignmentMetrics {
    /// The number of mapped reads.
    mapped: u64,
}

impl AlignmentMetrics {
    /// Creates new alignment metrics.
    pub fn new(mapped: u64) -> Self {
        Self { mapped }
    }

    /// Parses alignment metrics from the text of a report.
    ///
    /// The first line of the form `N mapped (...)` (optionally `N + M mapped
    /// (...)`) provides the mapped read count.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::metrics::AlignmentMetrics;
    ///
    /// let report = "100 + 0 in total (QC-passed reads + QC-failed reads)\n\
    ///               0 + 0 secondary\n\
    ///               88 + 0 mapped (88.00% : N/A)\n";
    ///
    /// let metrics = AlignmentMetrics::parse(report, "control.flagstat")?;
    /// assert_eq!(metrics.mapped(), 88);
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn parse(report: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let captures = report
            .lines()
            .find_map(|line| MAPPED.captures(line.trim_start()))
            .ok_or_else(|| Error::MissingMappedCount(path.to_path_buf()))?;

        // SAFETY: the regex only matches when the first group matches.
        let count = captures.get(1).unwrap().as_str();

        count
            .parse()
            .map(Self::new)
            .map_err(|err| Error::InvalidMappedCount(path.to_path_buf(), err))
    }

    /// Reads alignment metrics from a report on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let report =
            std::fs::read_to_string(path).map_err(|err| Error::Io(path.to_path_buf(), err))?;
        Self::parse(&report, path)
    }

    /// Gets the number of mapped reads.
    pub fn mapped(&self) -> u64 {
        self.mapped
    }
}

/// The ratio of control to tumor mapped reads.
///
/// The ratio is always rendered with two fractional digits, which is the form
/// handed to the copy-number estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ratio(f64);

impl Ratio {
    /// Gets the inner value.
    pub fn get(&self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Computes the ratio of control to tumor mapped reads.
///
/// # Examples
///
/// ```
/// use copyseg::metrics::AlignmentMetrics;
/// use copyseg::metrics::ratio;
///
/// let ratio = ratio(AlignmentMetrics::new(88), AlignmentMetrics::new(100))?;
/// assert_eq!(ratio.to_string(), "0.88");
///
/// assert!(copyseg::metrics::ratio(AlignmentMetrics::new(88), AlignmentMetrics::new(0)).is_err());
///
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn ratio(control: AlignmentMetrics, tumor: AlignmentMetrics) -> Result<Ratio> {
    if tumor.mapped() == 0 {
        return Err(Error::ZeroTumorReads);
    }

    Ok(Ratio(control.mapped() as f64 / tumor.mapped() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAGSTAT: &str = "\
2000 + 0 in total (QC-passed reads + QC-failed reads)
0 + 0 secondary
0 + 0 supplementary
0 + 0 duplicates
1956 + 0 mapped (97.80% : N/A)
2000 + 0 paired in sequencing
";

    #[test]
    fn test_parse_flagstat() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let metrics = AlignmentMetrics::parse(FLAGSTAT, "tumor.flagstat")?;
        assert_eq!(metrics.mapped(), 1956);
        Ok(())
    }

    #[test]
    fn test_parse_bare_mapped_line() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let metrics = AlignmentMetrics::parse("12 mapped (50.00%)\n", "tumor.flagstat")?;
        assert_eq!(metrics.mapped(), 12);
        Ok(())
    }

    #[test]
    fn test_primary_mapped_is_not_mapped() {
        let err = AlignmentMetrics::parse("10 + 0 primary mapped (100.00% : N/A)\n", "x")
            .unwrap_err();
        assert!(matches!(err, Error::MissingMappedCount(_)));
    }

    #[test]
    fn test_missing_mapped_line() {
        let err = AlignmentMetrics::parse("[bam_flagstat] is not a BAM file\n", "x.flagstat")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no mapped read count found in alignment statistics `x.flagstat`"
        );
    }

    #[test]
    fn test_overflowing_count() {
        let err =
            AlignmentMetrics::parse("99999999999999999999999 + 0 mapped (1%)\n", "x").unwrap_err();
        assert!(matches!(err, Error::InvalidMappedCount(_, _)));
    }

    #[test]
    fn test_ratio() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ratio = ratio(AlignmentMetrics::new(88), AlignmentMetrics::new(100))?;
        assert_eq!(ratio.to_string(), "0.88");
        assert_eq!(ratio.get(), 0.88);
        Ok(())
    }

    #[test]
    fn test_ratio_rounding() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ratio = ratio(AlignmentMetrics::new(2), AlignmentMetrics::new(3))?;
        assert_eq!(ratio.to_string(), "0.67");

        let ratio = super::ratio(AlignmentMetrics::new(300), AlignmentMetrics::new(100))?;
        assert_eq!(ratio.to_string(), "3.00");
        Ok(())
    }

    #[test]
    fn test_zero_tumor_reads() {
        let err = ratio(AlignmentMetrics::new(88), AlignmentMetrics::new(0)).unwrap_err();
        assert!(matches!(err, Error::ZeroTumorReads));
    }
}
