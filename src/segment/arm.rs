//! Splitting segment tables into chromosome arms and merging them back.
//!
//! Segmentation is run on arm-qualified chromosomes (`chr1.p`, `chr1.q`) so
//! that no candidate breakpoint can ever span a centromere. Once segmentation
//! is done, the arm qualifiers are stripped again so that the final report is
//! in the original coordinate space.
//!
//! Segment coordinates are one-based and inclusive, while the centromere
//! annotation is zero-based and half-open (BED).

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use rust_lapper as lapper;
use tracing::debug;
use tracing::warn;

use crate::chromosome::COLUMN_DELIMITER;
use crate::segment;
use crate::segment::Arm;
use crate::segment::Layout;
use crate::segment::SegmentRecord;

/// The sample label the segmentation engine writes for every segment.
pub const PLACEHOLDER_SAMPLE: &str = "Sample.1";

/// A centromere piece within the lookup.
type Iv = lapper::Interval<u64, ()>;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to splitting or merging chromosome arms.
#[derive(Debug)]
pub enum Error {
    /// An I/O error.
    Io(PathBuf, io::Error),

    /// An invalid line in the centromere annotation.
    InvalidCentromere {
        /// The line number.
        line_no: usize,

        /// The reason the line is invalid.
        reason: String,
    },

    /// A segment record could not be parsed.
    InvalidRecord {
        /// The line number.
        line_no: usize,

        /// The parse error.
        err: segment::ParseError,
    },

    /// A chromosome has no centromere in the annotation.
    NoCentromere(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(path, err) => write!(f, "i/o error with `{}`: {err}", path.display()),
            Error::InvalidCentromere { line_no, reason } => {
                write!(f, "invalid centromere at line {line_no}: {reason}")
            }
            Error::InvalidRecord { line_no, err } => {
                write!(f, "invalid segment record at line {line_no}: {err}")
            }
            Error::NoCentromere(chromosome) => {
                write!(f, "no centromere annotated for chromosome `{chromosome}`")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Centromeres
////////////////////////////////////////////////////////////////////////////////////////

/// The centromere of a single chromosome.
#[derive(Debug)]
struct Centromere {
    /// The zero-based start of the first centromere piece.
    start: u64,

    /// The zero-based, exclusive end of the last centromere piece.
    end: u64,

    /// The individual centromere pieces.
    pieces: lapper::Lapper<u64, ()>,
}

impl Centromere {
    /// Gets the arm a one-based, inclusive segment falls on.
    fn arm_of(&self, start: u64, end: u64) -> Arm {
        let start = start.saturating_sub(1);

        if end <= self.start {
            Arm::P
        } else if start >= self.end {
            Arm::Q
        } else if start + end < self.start + self.end {
            // NOTE: the segment overlaps the centromere, so it is placed on
            // the arm that holds its midpoint.
            Arm::P
        } else {
            Arm::Q
        }
    }

    /// Returns whether a one-based, inclusive segment overlaps a centromere
    /// piece.
    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.pieces.find(start.saturating_sub(1), end).next().is_some()
    }
}

/// The centromeres of a genome.
#[derive(Debug, Default)]
pub struct Centromeres {
    /// The centromere for each chromosome.
    inner: HashMap<String, Centromere>,
}

impl Centromeres {
    /// Reads the centromeres from a tab-delimited annotation (chromosome,
    /// zero-based start, exclusive end).
    ///
    /// A chromosome may have more than one row; its centromere then spans from
    /// the first start to the last end. Blank lines, `#` comments, and
    /// `track`/`browser` lines are skipped. Any other row must be a centromere.
    pub fn read<T>(reader: T) -> Result<Self>
    where
        T: BufRead,
    {
        let mut pieces = HashMap::<String, Vec<Iv>>::new();

        for (i, result) in reader.lines().enumerate() {
            let line_no = i + 1;
            let line = result.map_err(|err| Error::Io(PathBuf::from("<centromeres>"), err))?;
            let line = line.trim_end_matches('\r');

            if line.trim().is_empty()
                || line.starts_with('#')
                || line.starts_with("track")
                || line.starts_with("browser")
            {
                continue;
            }

            let fields = line.split(COLUMN_DELIMITER).collect::<Vec<_>>();
            if fields.len() < 3 {
                return Err(Error::InvalidCentromere {
                    line_no,
                    reason: format!("expected at least 3 columns, found {}", fields.len()),
                });
            }

            let parse = |value: &str, name: &str| {
                value.parse::<u64>().map_err(|err| Error::InvalidCentromere {
                    line_no,
                    reason: format!("invalid {name}: {err}"),
                })
            };

            let start = parse(fields[1], "start")?;
            let end = parse(fields[2], "end")?;

            if end <= start {
                return Err(Error::InvalidCentromere {
                    line_no,
                    reason: format!("end ({end}) must be greater than start ({start})"),
                });
            }

            pieces
                .entry(fields[0].to_string())
                .or_default()
                .push(lapper::Interval {
                    start,
                    stop: end,
                    val: (),
                });
        }

        let inner = pieces
            .into_iter()
            .map(|(chromosome, pieces)| {
                // SAFETY: every entry was created with at least one piece.
                let start = pieces.iter().map(|iv| iv.start).min().unwrap();
                let end = pieces.iter().map(|iv| iv.stop).max().unwrap();

                let centromere = Centromere {
                    start,
                    end,
                    pieces: lapper::Lapper::new(pieces),
                };

                (chromosome, centromere)
            })
            .collect();

        Ok(Self { inner })
    }

    /// Reads the centromeres from an annotation on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = File::open(path)
            .map(BufReader::new)
            .map_err(|err| Error::Io(path.to_path_buf(), err))?;

        Self::read(reader)
    }

    /// Returns whether a centromere is annotated for the chromosome.
    pub fn contains(&self, chromosome: &str) -> bool {
        self.inner.contains_key(chromosome)
    }

    /// Gets the number of chromosomes with an annotated centromere.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns whether no centromeres are annotated.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Gets the arm that a one-based, inclusive segment falls on.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::segment::Arm;
    /// use copyseg::segment::arm::Centromeres;
    ///
    /// let centromeres = Centromeres::read(&b"chr1\t100\t200\n"[..])?;
    ///
    /// assert_eq!(centromeres.arm_of("chr1", 1, 50)?, Arm::P);
    /// assert_eq!(centromeres.arm_of("chr1", 250, 300)?, Arm::Q);
    /// assert!(centromeres.arm_of("chr2", 1, 50).is_err());
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn arm_of(&self, chromosome: &str, start: u64, end: u64) -> Result<Arm> {
        self.inner
            .get(chromosome)
            .map(|centromere| centromere.arm_of(start, end))
            .ok_or_else(|| Error::NoCentromere(chromosome.to_string()))
    }

    /// Returns whether a one-based, inclusive segment overlaps the centromere
    /// of its chromosome.
    pub fn straddles(&self, chromosome: &str, start: u64, end: u64) -> bool {
        self.inner
            .get(chromosome)
            .map(|centromere| centromere.overlaps(start, end))
            .unwrap_or(false)
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Split and merge
////////////////////////////////////////////////////////////////////////////////////////

/// A summary of a split.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SplitSummary {
    /// The number of records rewritten.
    pub records: usize,

    /// The number of records overlapping a centromere.
    pub straddling: usize,
}

/// Rewrites the chromosome of every record in a segment table into its
/// arm-qualified form.
///
/// A leading header line is copied verbatim.
pub fn split<R, W>(
    reader: R,
    mut writer: W,
    layout: &Layout,
    centromeres: &Centromeres,
) -> Result<SplitSummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = SplitSummary::default();
    let io_err = |err| Error::Io(PathBuf::from("<split>"), err);

    for (i, result) in reader.lines().enumerate() {
        let line = result.map_err(io_err)?;

        if i == 0 && segment::is_header(&line, layout) {
            writeln!(writer, "{line}").map_err(io_err)?;
            continue;
        }

        let record = SegmentRecord::parse(&line, layout)
            .map_err(|err| Error::InvalidRecord { line_no: i + 1, err })?;
        let name = record.chromosome().name();

        let arm = centromeres.arm_of(name, record.start(), record.end())?;
        if centromeres.straddles(name, record.start(), record.end()) {
            summary.straddling += 1;
        }

        let chromosome = record.chromosome().clone().with_arm(arm);
        let line = segment::replace_column(&line, layout.chromosome, &chromosome.to_string());
        writeln!(writer, "{line}").map_err(io_err)?;

        summary.records += 1;
    }

    writer.flush().map_err(io_err)?;
    Ok(summary)
}

/// Strips the arm qualifier from the chromosome of every record in a segment
/// table and replaces the placeholder sample label with `sample`.
///
/// Quoting is removed from the header and from the rewritten columns. Returns
/// the number of records written.
pub fn merge<R, W>(reader: R, mut writer: W, layout: &Layout, sample: &str) -> Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut records = 0;
    let io_err = |err| Error::Io(PathBuf::from("<merge>"), err);

    for (i, result) in reader.lines().enumerate() {
        let line = result.map_err(io_err)?;

        if i == 0 && segment::is_header(&line, layout) {
            writeln!(writer, "{}", line.replace('"', "")).map_err(io_err)?;
            continue;
        }

        let line = unquote_column(&line, layout.chromosome);
        let line = match layout.sample {
            Some(index) => unquote_column(&line, index),
            None => line,
        };

        let record = SegmentRecord::parse(&line, layout)
            .map_err(|err| Error::InvalidRecord { line_no: i + 1, err })?;

        let chromosome = record.chromosome().clone().without_arm();
        let mut line =
            segment::replace_column(&line, layout.chromosome, &chromosome.to_string());

        if let Some(index) = layout.sample {
            if line.split(COLUMN_DELIMITER).nth(index) == Some(PLACEHOLDER_SAMPLE) {
                line = segment::replace_column(&line, index, sample);
            }
        }

        writeln!(writer, "{line}").map_err(io_err)?;
        records += 1;
    }

    writer.flush().map_err(io_err)?;
    Ok(records)
}

/// Removes surrounding quotes from one column.
fn unquote_column(line: &str, index: usize) -> String {
    match line.split(COLUMN_DELIMITER).nth(index) {
        Some(value) if value.starts_with('"') => {
            segment::replace_column(line, index, value.trim_matches('"'))
        }
        _ => line.to_string(),
    }
}

/// Splits the segment table at `input` into `output`.
pub fn split_file(
    input: &Path,
    output: &Path,
    layout: &Layout,
    centromeres: &Centromeres,
) -> Result<SplitSummary> {
    let (reader, writer) = open(input, output)?;
    let summary = split(reader, writer, layout, centromeres)?;

    debug!(
        "split {} records from `{}` into arms",
        summary.records,
        input.display()
    );

    if summary.straddling > 0 {
        warn!(
            "{} records in `{}` overlap a centromere and were assigned to the arm holding their \
             midpoint",
            summary.straddling,
            input.display()
        );
    }

    Ok(summary)
}

/// Merges the arm-qualified segment table at `input` into `output`.
pub fn merge_file(input: &Path, output: &Path, layout: &Layout, sample: &str) -> Result<usize> {
    let (reader, writer) = open(input, output)?;
    let records = merge(reader, writer, layout, sample)?;
    debug!("merged {records} segments from `{}`", input.display());
    Ok(records)
}

/// Opens an input for reading and an output for writing.
fn open(input: &Path, output: &Path) -> Result<(BufReader<File>, BufWriter<File>)> {
    let reader = File::open(input)
        .map(BufReader::new)
        .map_err(|err| Error::Io(input.to_path_buf(), err))?;
    let writer = File::create(output)
        .map(BufWriter::new)
        .map_err(|err| Error::Io(output.to_path_buf(), err))?;

    Ok((reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTROMERES: &[u8] = b"#chrom\tchromStart\tchromEnd\n\
        chr1\t1000\t1500\n\
        chr1\t1500\t2000\n\
        chr2\t5000\t6000\n";

    const CALLED: &str = "\
chrom\tchr_start\tchr_stop\tnum_positions\tnormal_depth\ttumor_depth\tadjusted_log_ratio\tgc_content\tregion_call\traw_ratio
chr1\t1\t500\t10\t30.0\t31.0\t0.05\t40.0\tneutral\t0.05
chr1\t2001\t3000\t10\t30.0\t60.0\t1.0\t41.0\tamp\t1.0
chr2\t100\t4000\t10\t30.0\t15.0\t-1.0\t42.0\tdel\t-1.0
chr2\t6001\t9000\t10\t30.0\t30.0\t0.0\t43.0\tneutral\t0.0
";

    fn centromeres() -> Centromeres {
        Centromeres::read(CENTROMERES).unwrap()
    }

    fn split_to_string(input: &str, layout: &Layout) -> Result<String> {
        let mut output = Vec::new();
        split(input.as_bytes(), &mut output, layout, &centromeres())?;
        Ok(String::from_utf8(output).unwrap())
    }

    fn merge_to_string(input: &str, layout: &Layout, sample: &str) -> Result<String> {
        let mut output = Vec::new();
        merge(input.as_bytes(), &mut output, layout, sample)?;
        Ok(String::from_utf8(output).unwrap())
    }

    fn chromosome_column(table: &str, layout: &Layout) -> Vec<String> {
        table
            .lines()
            .skip(1)
            .map(|line| line.split('\t').nth(layout.chromosome).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_read_centromeres() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let centromeres = centromeres();
        assert_eq!(centromeres.len(), 2);
        assert!(centromeres.contains("chr1"));
        assert!(!centromeres.contains("chrM"));

        // The pieces of chr1 are merged into a single span.
        assert_eq!(centromeres.arm_of("chr1", 1, 1000)?, Arm::P);
        assert_eq!(centromeres.arm_of("chr1", 2001, 2100)?, Arm::Q);
        Ok(())
    }

    #[test]
    fn test_invalid_centromeres() {
        let err = Centromeres::read(&b"chr1\t100\n"[..]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid centromere at line 1: expected at least 3 columns, found 2"
        );

        let err = Centromeres::read(&b"chr1\t100\t200\nchr2\tx\t300\n"[..]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid centromere at line 2: invalid start: invalid digit found in string"
        );

        let err = Centromeres::read(&b"chr1\t200\t100\n"[..]).unwrap_err();
        assert!(matches!(err, Error::InvalidCentromere { line_no: 1, .. }));

        let err = Centromeres::read(&b"chrom\tchromStart\tchromEnd\nchr1\t100\t200\n"[..])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCentromere { line_no: 1, .. }));

        let centromeres =
            Centromeres::read(&b"track name=cen\n#chrom\tstart\tend\nchr1\t100\t200\n"[..])
                .unwrap();
        assert!(centromeres.contains("chr1"));
    }

    #[test]
    fn test_arm_boundaries() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let centromeres = centromeres();

        // The last base before the centromere (zero-based 999) is one-based 1000.
        assert_eq!(centromeres.arm_of("chr1", 900, 1000)?, Arm::P);
        assert!(!centromeres.straddles("chr1", 900, 1000));

        // The first base after the centromere is one-based 2001.
        assert_eq!(centromeres.arm_of("chr1", 2001, 2500)?, Arm::Q);
        assert!(!centromeres.straddles("chr1", 2001, 2500));

        // Overlapping segments go to the arm holding their midpoint.
        assert_eq!(centromeres.arm_of("chr1", 500, 1200)?, Arm::P);
        assert!(centromeres.straddles("chr1", 500, 1200));
        assert_eq!(centromeres.arm_of("chr1", 1800, 4000)?, Arm::Q);
        assert!(centromeres.straddles("chr1", 1800, 4000));
        Ok(())
    }

    #[test]
    fn test_split() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let table = split_to_string(CALLED, &Layout::CALLED)?;

        assert_eq!(table.lines().next(), CALLED.lines().next());
        assert_eq!(
            chromosome_column(&table, &Layout::CALLED),
            vec!["chr1.p", "chr1.q", "chr2.p", "chr2.q"]
        );

        // Only the chromosome column changes.
        for (before, after) in CALLED.lines().zip(table.lines()).skip(1) {
            let before = before.split('\t').skip(1).collect::<Vec<_>>();
            let after = after.split('\t').skip(1).collect::<Vec<_>>();
            assert_eq!(before, after);
        }

        Ok(())
    }

    #[test]
    fn test_split_without_centromere() {
        let input = "chrM\t1\t100\t10\t30.0\t30.0\t0.0\t43.0\tneutral\t0.0\n";
        let err = split_to_string(input, &Layout::CALLED).unwrap_err();
        assert_eq!(err.to_string(), "no centromere annotated for chromosome `chrM`");
    }

    #[test]
    fn test_merge_segments() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let input = "\"ID\"\t\"chrom\"\t\"loc.start\"\t\"loc.end\"\t\"num.mark\"\t\"seg.mean\"
Sample.1\tchr1.p\t1\t500\t10\t0.05
\"Sample.1\"\t\"chr1.q\"\t2001\t3000\t10\t1.0
other\tchr2.p\t100\t4000\t10\t-1.0
";

        let table = merge_to_string(input, &Layout::SEGMENTED, "tumor-17")?;
        assert_eq!(
            table,
            "ID\tchrom\tloc.start\tloc.end\tnum.mark\tseg.mean
tumor-17\tchr1\t1\t500\t10\t0.05
tumor-17\tchr1\t2001\t3000\t10\t1.0
other\tchr2\t100\t4000\t10\t-1.0
"
        );
        Ok(())
    }

    #[test]
    fn test_merge_invalid_record() {
        let input = "ID\tchrom\tloc.start\tloc.end\tnum.mark\tseg.mean\nSample.1\tchr1.p\t1\n";
        let err = merge_to_string(input, &Layout::SEGMENTED, "s").unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line_no: 2, .. }));
    }

    #[test]
    fn test_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let layout = Layout::CALLED;

        // merge(split(x)) is the identity on the chromosome column.
        let split = split_to_string(CALLED, &layout)?;
        let merged = merge_to_string(&split, &layout, "s")?;
        assert_eq!(
            chromosome_column(&merged, &layout),
            chromosome_column(CALLED, &layout)
        );
        assert_eq!(merged, CALLED);

        // split(merge(x)) is the identity on the chromosome column.
        let merged = merge_to_string(&split, &layout, "s")?;
        let resplit = split_to_string(&merged, &layout)?;
        assert_eq!(resplit, split);

        Ok(())
    }

    #[test]
    fn test_split_and_merge_files() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir::TempDir::new("arm")?;
        let called = dir.path().join("called");
        let arms = dir.path().join("called.arms");
        let merged = dir.path().join("merged");
        std::fs::write(&called, CALLED)?;

        let summary = split_file(&called, &arms, &Layout::CALLED, &centromeres())?;
        assert_eq!(
            summary,
            SplitSummary {
                records: 4,
                straddling: 0
            }
        );

        let records = merge_file(&arms, &merged, &Layout::CALLED, "s")?;
        assert_eq!(records, 4);
        assert_eq!(std::fs::read_to_string(&merged)?, CALLED);
        Ok(())
    }
}
