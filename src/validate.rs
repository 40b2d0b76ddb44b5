//! Genome-consistency checks run before (and directly after) the expensive
//! stages of a run.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;
use tracing::debug;
use tracing::info;

use crate::chromosome;
use crate::chromosome::ChromosomeSet;

/// The number of pileup positions sampled by the reference base check.
pub const PILEUP_SAMPLE_SIZE: usize = 100_000;

/// The placeholder reported for reference bases that are unknown.
pub const UNKNOWN_BASE: &str = "N";

/// The (zero-based) column of a pileup holding the reference base.
const PILEUP_REFERENCE_BASE_COLUMN: usize = 2;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to validating the inputs of a run.
#[derive(Debug)]
pub enum Error {
    /// A chromosome set could not be read.
    Chromosomes(chromosome::Error),

    /// A file mentions chromosomes that are not in the reference genome.
    NotSubset {
        /// The offending file.
        path: PathBuf,

        /// The kind of file.
        source: chromosome::Source,

        /// The reference genome.
        reference: PathBuf,

        /// The chromosomes missing from the reference genome.
        missing: Vec<String>,
    },

    /// Every sampled pileup position had an unknown reference base.
    UnknownReferenceBases {
        /// The pileup.
        path: PathBuf,

        /// The number of positions sampled.
        sampled: usize,
    },

    /// The pileup could not be read.
    Pileup(PathBuf, io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Chromosomes(err) => write!(f, "chromosome error: {err}"),
            Error::NotSubset {
                path,
                source,
                reference,
                missing,
            } => write!(
                f,
                "the {source} file `{}` names chromosomes not present in the reference genome \
                 `{}`: {}",
                path.display(),
                reference.display(),
                missing.join(", ")
            ),
            Error::UnknownReferenceBases { path, sampled } => {
                if *sampled == 0 {
                    write!(f, "the pileup `{}` contains no positions", path.display())
                } else {
                    write!(
                        f,
                        "all of the first {sampled} positions in the pileup `{}` have an unknown \
                         reference base; the reference genome likely does not match the \
                         alignments",
                        path.display()
                    )
                }
            }
            Error::Pileup(path, err) => {
                write!(f, "i/o error reading pileup `{}`: {err}", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Chromosome sets
////////////////////////////////////////////////////////////////////////////////////////

/// Ensures that every chromosome in `other` is present in `reference`.
///
/// The reverse is not required: the reference may contain chromosomes that the
/// sample data never touches.
///
/// # Examples
///
/// ```
/// use copyseg::chromosome::ChromosomeSet;
/// use copyseg::chromosome::Source;
/// use copyseg::validate::check_subset;
///
/// let reference = ChromosomeSet::new("ref.fa", Source::Reference, ["chr1", "chr2", "chr3"]);
///
/// let targets = ChromosomeSet::new("targets.bed", Source::Annotation, ["chr1", "chr2"]);
/// assert!(check_subset(&reference, &targets).is_ok());
///
/// let targets = ChromosomeSet::new("targets.bed", Source::Annotation, ["chr1", "chrX"]);
/// assert!(check_subset(&reference, &targets).is_err());
/// ```
pub fn check_subset(reference: &ChromosomeSet, other: &ChromosomeSet) -> Result<()> {
    if other.is_subset(reference) {
        return Ok(());
    }

    Err(Error::NotSubset {
        path: other.path().to_path_buf(),
        source: other.source(),
        reference: reference.path().to_path_buf(),
        missing: other
            .difference(reference)
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

/// The inputs checked for consistency with the reference genome.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// The reference genome.
    pub reference: &'a Path,

    /// The alignment files.
    pub alignments: &'a [&'a Path],

    /// The annotation files.
    pub annotations: &'a [&'a Path],
}

/// Reads the chromosome sets of every input and checks each against the
/// reference genome, failing on the first inconsistency.
pub fn check_inputs(inputs: Inputs<'_>) -> Result<()> {
    let reference =
        ChromosomeSet::from_reference(inputs.reference).map_err(Error::Chromosomes)?;
    info!(
        "reference genome `{}` contains {} sequences",
        inputs.reference.display(),
        reference.len()
    );

    for path in inputs.alignments {
        let set = ChromosomeSet::from_alignment(path).map_err(Error::Chromosomes)?;
        debug!("alignment `{}`: {} sequences", path.display(), set.len());
        check_subset(&reference, &set)?;
    }

    for path in inputs.annotations {
        let set = ChromosomeSet::from_annotation(path).map_err(Error::Chromosomes)?;
        debug!("annotation `{}`: {} chromosomes", path.display(), set.len());
        check_subset(&reference, &set)?;
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////
// Pileups
////////////////////////////////////////////////////////////////////////////////////////

/// Samples the reference base column of the first [`PILEUP_SAMPLE_SIZE`]
/// positions of a pileup, failing if every one of them is unknown.
///
/// This catches a reference genome whose sequence names intersect the
/// alignments but whose sequences do not match them (for example, builds with
/// differing naming conventions). Gzip-compressed pileups (`.gz`) are
/// decompressed on the fly.
pub fn check_pileup_reference_bases(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let io_err = |err| Error::Pileup(path.to_path_buf(), err);

    let file = File::open(path).map_err(io_err)?;
    let reader: Box<dyn BufRead> = match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        _ => Box::new(BufReader::new(file)),
    };

    let (sampled, known) = sample_reference_bases(reader, PILEUP_SAMPLE_SIZE).map_err(io_err)?;
    debug!(
        "pileup `{}`: {known} of {sampled} sampled positions have a known reference base",
        path.display()
    );

    if known == 0 {
        return Err(Error::UnknownReferenceBases {
            path: path.to_path_buf(),
            sampled,
        });
    }

    Ok(())
}

/// Reads up to `limit` pileup lines, returning the number of lines sampled
/// and how many of them had a known reference base.
fn sample_reference_bases<T>(reader: T, limit: usize) -> io::Result<(usize, usize)>
where
    T: BufRead,
{
    let mut sampled = 0;
    let mut known = 0;

    for result in reader.lines().take(limit) {
        let line = result?;
        sampled += 1;

        let base = line
            .split(chromosome::COLUMN_DELIMITER)
            .nth(PILEUP_REFERENCE_BASE_COLUMN)
            .unwrap_or(UNKNOWN_BASE);

        if !base.eq_ignore_ascii_case(UNKNOWN_BASE) {
            known += 1;
        }
    }

    Ok((sampled, known))
}
