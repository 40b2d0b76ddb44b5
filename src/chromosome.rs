//! Sets of chromosome names read from the inputs of a run.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use noodles::bam;
use noodles::cram;
use noodles::fasta;
use noodles::sam;

/// The delimiter between columns of an annotation file.
pub const COLUMN_DELIMITER: char = '\t';

/// An error related to reading a [`ChromosomeSet`].
#[derive(Debug)]
pub enum Error {
    /// An I/O error while reading the file.
    Io(PathBuf, io::Error),

    /// The file did not name any chromosomes.
    Empty(PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(path, err) => write!(f, "i/o error reading `{}`: {err}", path.display()),
            Error::Empty(path) => {
                write!(f, "no chromosome names found in `{}`", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

/// The kind of file a [`ChromosomeSet`] was extracted from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    /// The sequence dictionary of an alignment file header.
    Alignment,

    /// The first column of a tab-delimited annotation file.
    Annotation,

    /// The sequence names of a reference genome.
    Reference,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Alignment => write!(f, "alignment"),
            Source::Annotation => write!(f, "annotation"),
            Source::Reference => write!(f, "reference"),
        }
    }
}

/// The set of chromosome names mentioned by a single file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChromosomeSet {
    /// The file the names were read from.
    path: PathBuf,

    /// The kind of file the names were read from.
    source: Source,

    /// The names.
    names: BTreeSet<String>,
}

impl ChromosomeSet {
    /// Creates a new chromosome set from a list of names.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::chromosome::ChromosomeSet;
    /// use copyseg::chromosome::Source;
    ///
    /// let set = ChromosomeSet::new("genome.fa", Source::Reference, ["chr1", "chr2", "chr1"]);
    /// assert_eq!(set.len(), 2);
    /// assert!(set.contains("chr2"));
    /// ```
    pub fn new<I, S>(path: impl Into<PathBuf>, source: Source, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            source,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Reads the reference sequence names from an alignment header.
    ///
    /// BAM and CRAM files are read with their respective readers; anything
    /// else is treated as SAM. Only the header of a CRAM is read, so no
    /// reference is needed.
    pub fn from_alignment(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let io_err = |err| Error::Io(path.to_path_buf(), err);

        let header = if has_extension(path, "bam") {
            bam::io::reader::Builder::default()
                .build_from_path(path)
                .and_then(|mut reader| reader.read_header())
                .map_err(io_err)?
        } else if has_extension(path, "cram") {
            cram::io::reader::Builder::default()
                .build_from_path(path)
                .and_then(|mut reader| reader.read_header())
                .map_err(io_err)?
        } else {
            sam::io::reader::Builder::default()
                .build_from_path(path)
                .and_then(|mut reader| reader.read_header())
                .map_err(io_err)?
        };

        let names = header
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();

        Self::non_empty(path, Source::Alignment, names)
    }

    /// Reads the unique values of the first column of a tab-delimited
    /// annotation file.
    ///
    /// Blank lines, comments, and `track`/`browser` lines are ignored.
    pub fn from_annotation(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = File::open(path)
            .map(BufReader::new)
            .map_err(|err| Error::Io(path.to_path_buf(), err))?;

        let names = first_column(reader).map_err(|err| Error::Io(path.to_path_buf(), err))?;
        Self::non_empty(path, Source::Annotation, names)
    }

    /// Reads the sequence names of a reference genome.
    ///
    /// If a FASTA index (`<reference>.fai`) sits next to the reference, the
    /// names are taken from its first column. Otherwise, the FASTA itself is
    /// read and each record's name (the definition up to the first whitespace)
    /// is used.
    pub fn from_reference(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = fasta_index_path(path);

        if index.is_file() {
            let reader = File::open(&index)
                .map(BufReader::new)
                .map_err(|err| Error::Io(index.clone(), err))?;
            let names = first_column(reader).map_err(|err| Error::Io(index.clone(), err))?;
            return Self::non_empty(path, Source::Reference, names);
        }

        let io_err = |err| Error::Io(path.to_path_buf(), err);
        let mut reader = fasta::reader::Builder
            .build_from_path(path)
            .map_err(io_err)?;

        let mut names = Vec::new();
        for result in reader.records() {
            let record = result.map_err(io_err)?;
            names.push(String::from_utf8_lossy(record.name()).to_string());
        }

        Self::non_empty(path, Source::Reference, names)
    }

    /// Builds a set, failing if there are no names at all.
    fn non_empty(path: &Path, source: Source, names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::Empty(path.to_path_buf()));
        }

        Ok(Self::new(path, source, names))
    }

    /// Gets the path the names were read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets the kind of file the names were read from.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Gets the names.
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Returns whether the set contains the named chromosome.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Gets the number of names in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the names in `self` that are not in `other`, in sorted order.
    pub fn difference<'a>(&'a self, other: &'a ChromosomeSet) -> Vec<&'a str> {
        self.names
            .difference(&other.names)
            .map(String::as_str)
            .collect()
    }

    /// Returns whether every name in `self` is also in `other`.
    pub fn is_subset(&self, other: &ChromosomeSet) -> bool {
        self.names.is_subset(&other.names)
    }
}

/// Returns whether a path names an alignment file.
///
/// Alignment files are binary or very large, so they are never subjected to
/// the line-based artifact checks.
pub fn is_alignment(path: &Path) -> bool {
    ["bam", "sam", "cram"]
        .iter()
        .any(|extension| has_extension(path, extension))
}

/// Returns whether a path has the given extension (ignoring case).
fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Gets the conventional location of the index for a FASTA file.
pub fn fasta_index_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".fai");
    PathBuf::from(name)
}

/// Collects the values of the first tab-delimited column.
fn first_column<T>(reader: T) -> io::Result<Vec<String>>
where
    T: BufRead,
{
    let mut names = Vec::new();

    for result in reader.lines() {
        let line = result?;
        let line = line.trim_end_matches('\r');

        if line.trim().is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }

        // SAFETY: `split` always yields at least one item.
        let name = line.split(COLUMN_DELIMITER).next().unwrap();
        names.push(name.to_string());
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_first_column() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let data = b"# comment\ntrack name=targets\nchr1\t0\t10\nchr2\t5\t10\n\nchr1\t20\t30\r\n";
        let names = first_column(&data[..])?;
        assert_eq!(names, vec!["chr1", "chr2", "chr1"]);
        Ok(())
    }

    #[test]
    fn test_from_annotation() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("chromosome")?;
        let path = dir.path().join("targets.bed");
        std::fs::write(&path, "chr1\t0\t10\nchr3\t0\t10\nchr1\t50\t60\n")?;

        let set = ChromosomeSet::from_annotation(&path)?;
        assert_eq!(set.source(), Source::Annotation);
        assert_eq!(
            set.names().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["chr1", "chr3"]
        );
        Ok(())
    }

    #[test]
    fn test_empty_annotation() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("chromosome")?;
        let path = dir.path().join("empty.bed");
        std::fs::write(&path, "# nothing here\n")?;

        let err = ChromosomeSet::from_annotation(&path).unwrap_err();
        assert!(matches!(err, Error::Empty(_)));
        Ok(())
    }

    #[test]
    fn test_from_reference_fasta() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("chromosome")?;
        let path = dir.path().join("genome.fa");
        let mut file = File::create(&path)?;
        writeln!(file, ">chr1 some description")?;
        writeln!(file, "ACGTACGT")?;
        writeln!(file, ">chr2")?;
        writeln!(file, "NNNNACGT")?;
        drop(file);

        let set = ChromosomeSet::from_reference(&path)?;
        assert_eq!(set.len(), 2);
        assert!(set.contains("chr1"));
        assert!(set.contains("chr2"));
        Ok(())
    }

    #[test]
    fn test_from_reference_index() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("chromosome")?;
        let path = dir.path().join("genome.fa");
        std::fs::write(&path, ">ignored\nACGT\n")?;
        std::fs::write(
            fasta_index_path(&path),
            "chr1\t8\t6\t8\t9\nchr2\t8\t21\t8\t9\nchrX\t8\t36\t8\t9\n",
        )?;

        let set = ChromosomeSet::from_reference(&path)?;
        assert_eq!(set.len(), 3);
        assert!(set.contains("chrX"));
        assert!(!set.contains("ignored"));
        Ok(())
    }

    #[test]
    fn test_from_sam_header() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("chromosome")?;
        let path = dir.path().join("control.sam");
        std::fs::write(
            &path,
            "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:100\n@SQ\tSN:chr2\tLN:200\n",
        )?;

        let set = ChromosomeSet::from_alignment(&path)?;
        assert_eq!(set.source(), Source::Alignment);
        assert_eq!(
            set.names().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["chr1", "chr2"]
        );
        Ok(())
    }

    #[test]
    fn test_truncated_cram() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("chromosome")?;
        let path = dir.path().join("tumor.cram");
        std::fs::write(&path, b"CRAM\x03\x01")?;

        assert!(is_alignment(&path));

        let err = ChromosomeSet::from_alignment(&path).unwrap_err();
        match err {
            Error::Io(p, err) => {
                assert_eq!(p, path);
                assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            }
            err => panic!("unexpected error: {err}"),
        }

        Ok(())
    }

    #[test]
    fn test_subset() {
        let reference = ChromosomeSet::new("ref.fa", Source::Reference, ["chr1", "chr2", "chr3"]);
        let valid = ChromosomeSet::new("a.bed", Source::Annotation, ["chr1", "chr2"]);
        let invalid = ChromosomeSet::new("b.bed", Source::Annotation, ["chr1", "chrX"]);

        assert!(valid.is_subset(&reference));
        assert!(!invalid.is_subset(&reference));
        assert_eq!(invalid.difference(&reference), vec!["chrX"]);
        assert!(!reference.is_subset(&valid));
    }

    #[test]
    fn test_is_alignment() {
        assert!(is_alignment(Path::new("a/control.bam")));
        assert!(is_alignment(Path::new("tumor.BAM")));
        assert!(is_alignment(Path::new("tumor.cram")));
        assert!(!is_alignment(Path::new("sample.pileup")));
        assert!(!is_alignment(Path::new("bam")));
    }
}
