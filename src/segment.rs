//! Segment records from the called copy-number and segmentation tables.
//!
//! Both tables are tab-delimited with a single header line. Only the columns
//! named in a [`Layout`] are interpreted; every other column is carried through
//! untouched whenever a record is rewritten.

use std::str::FromStr;

use crate::chromosome::COLUMN_DELIMITER;

pub mod arm;

/// The delimiter between a chromosome name and its arm.
pub const ARM_DELIMITER: char = '.';

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to parsing a segment record.
#[derive(Debug)]
pub enum ParseError {
    /// A column required by the layout was missing.
    MissingColumn(&'static str, usize),

    /// A coordinate was not a valid number.
    InvalidCoordinate(&'static str, std::num::ParseIntError),

    /// The log ratio was not a valid number.
    InvalidLogRatio(std::num::ParseFloatError),

    /// The copy-number call was not recognized.
    InvalidCall(String),

    /// The arm was not recognized.
    InvalidArm(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingColumn(name, index) => {
                write!(f, "missing {name} column (column {})", index + 1)
            }
            ParseError::InvalidCoordinate(name, err) => write!(f, "invalid {name}: {err}"),
            ParseError::InvalidLogRatio(err) => write!(f, "invalid log ratio: {err}"),
            ParseError::InvalidCall(value) => write!(f, "invalid call: {value}"),
            ParseError::InvalidArm(value) => write!(f, "invalid arm: {value}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A [`Result`](std::result::Result) with a [`ParseError`].
type Result<T> = std::result::Result<T, ParseError>;

////////////////////////////////////////////////////////////////////////////////////////
// Arms and chromosomes
////////////////////////////////////////////////////////////////////////////////////////

/// A chromosome arm.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arm {
    /// The short arm.
    P,

    /// The long arm.
    Q,
}

impl std::fmt::Display for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arm::P => write!(f, "p"),
            Arm::Q => write!(f, "q"),
        }
    }
}

impl FromStr for Arm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "p" => Ok(Arm::P),
            "q" => Ok(Arm::Q),
            _ => Err(ParseError::InvalidArm(s.to_string())),
        }
    }
}

/// A chromosome name, optionally qualified with an arm (e.g. `chr1.p`).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Chromosome {
    /// The chromosome name.
    name: String,

    /// The arm.
    arm: Option<Arm>,
}

impl Chromosome {
    /// Creates a new chromosome.
    pub fn new(name: impl Into<String>, arm: Option<Arm>) -> Self {
        Self {
            name: name.into(),
            arm,
        }
    }

    /// Gets the chromosome name without any arm qualifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the arm.
    pub fn arm(&self) -> Option<Arm> {
        self.arm
    }

    /// Returns this chromosome qualified with the given arm.
    pub fn with_arm(self, arm: Arm) -> Self {
        Self {
            arm: Some(arm),
            ..self
        }
    }

    /// Returns this chromosome without an arm qualifier.
    pub fn without_arm(self) -> Self {
        Self { arm: None, ..self }
    }
}

impl std::fmt::Display for Chromosome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.arm {
            Some(arm) => write!(f, "{}{ARM_DELIMITER}{arm}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for Chromosome {
    type Err = std::convert::Infallible;

    /// Parses a chromosome, treating a trailing `.p` or `.q` as the arm.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::segment::Arm;
    /// use copyseg::segment::Chromosome;
    ///
    /// let chromosome = "chr1.q".parse::<Chromosome>()?;
    /// assert_eq!(chromosome.name(), "chr1");
    /// assert_eq!(chromosome.arm(), Some(Arm::Q));
    ///
    /// let chromosome = "chrUn_gl000220.1".parse::<Chromosome>()?;
    /// assert_eq!(chromosome.name(), "chrUn_gl000220.1");
    /// assert_eq!(chromosome.arm(), None);
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some((name, arm)) = s.rsplit_once(ARM_DELIMITER) {
            if let (false, Ok(arm)) = (name.is_empty(), arm.parse::<Arm>()) {
                return Ok(Self::new(name, Some(arm)));
            }
        }

        Ok(Self::new(s, None))
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Calls
////////////////////////////////////////////////////////////////////////////////////////

/// A copy-number call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Call {
    /// An amplification.
    Amplification,

    /// A deletion.
    Deletion,

    /// Neither an amplification nor a deletion.
    Neutral,
}

impl FromStr for Call {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "amp" => Ok(Call::Amplification),
            "del" => Ok(Call::Deletion),
            "neutral" => Ok(Call::Neutral),
            _ => Err(ParseError::InvalidCall(s.to_string())),
        }
    }
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Call::Amplification => write!(f, "amp"),
            Call::Deletion => write!(f, "del"),
            Call::Neutral => write!(f, "neutral"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Layouts
////////////////////////////////////////////////////////////////////////////////////////

/// The (zero-based) columns of a segment table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    /// The sample label column, if the table has one.
    pub sample: Option<usize>,

    /// The chromosome column.
    pub chromosome: usize,

    /// The start coordinate column.
    pub start: usize,

    /// The end coordinate column.
    pub end: usize,

    /// The log ratio column.
    pub log_ratio: usize,

    /// The copy-number call column, if the table has one.
    pub call: Option<usize>,
}

impl Layout {
    /// The layout of the copy-number estimator's output (`chrom chr_start
    /// chr_stop num_positions normal_depth tumor_depth log2_ratio
    /// gc_content`).
    pub const COPYNUMBER: Layout = Layout {
        sample: None,
        chromosome: 0,
        start: 1,
        end: 2,
        log_ratio: 6,
        call: None,
    };

    /// The layout of the segment caller's output (`chrom chr_start chr_stop
    /// num_positions normal_depth tumor_depth adjusted_log_ratio gc_content
    /// region_call raw_ratio`).
    pub const CALLED: Layout = Layout {
        sample: None,
        chromosome: 0,
        start: 1,
        end: 2,
        log_ratio: 6,
        call: Some(8),
    };

    /// The layout of the segmentation engine's output (`ID chrom loc.start
    /// loc.end num.mark seg.mean`).
    pub const SEGMENTED: Layout = Layout {
        sample: Some(0),
        chromosome: 1,
        start: 2,
        end: 3,
        log_ratio: 5,
        call: None,
    };
}

////////////////////////////////////////////////////////////////////////////////////////
// Records
////////////////////////////////////////////////////////////////////////////////////////

/// A single row of a segment table.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRecord {
    /// The chromosome (and, possibly, the arm).
    chromosome: Chromosome,

    /// The start coordinate.
    start: u64,

    /// The end coordinate.
    end: u64,

    /// The log ratio.
    log_ratio: f64,

    /// The copy-number call.
    call: Option<Call>,
}

impl SegmentRecord {
    /// Parses a record from a line with the given layout.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::segment::Call;
    /// use copyseg::segment::Layout;
    /// use copyseg::segment::SegmentRecord;
    ///
    /// let line = "chr1\t100\t200\t10\t30\t35\t0.25\t45.0\tamp\t0.3";
    /// let record = SegmentRecord::parse(line, &Layout::CALLED)?;
    ///
    /// assert_eq!(record.chromosome().name(), "chr1");
    /// assert_eq!(record.start(), 100);
    /// assert_eq!(record.end(), 200);
    /// assert_eq!(record.log_ratio(), 0.25);
    /// assert_eq!(record.call(), Some(Call::Amplification));
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn parse(line: &str, layout: &Layout) -> Result<Self> {
        let fields = line.split(COLUMN_DELIMITER).collect::<Vec<_>>();

        let field = |name: &'static str, index: usize| {
            fields
                .get(index)
                .copied()
                .ok_or(ParseError::MissingColumn(name, index))
        };

        // SAFETY: parsing a chromosome is infallible.
        let chromosome = field("chromosome", layout.chromosome)?
            .parse::<Chromosome>()
            .unwrap();
        let start = field("start", layout.start)?
            .parse()
            .map_err(|err| ParseError::InvalidCoordinate("start", err))?;
        let end = field("end", layout.end)?
            .parse()
            .map_err(|err| ParseError::InvalidCoordinate("end", err))?;
        let log_ratio = field("log ratio", layout.log_ratio)?
            .parse()
            .map_err(ParseError::InvalidLogRatio)?;
        let call = layout
            .call
            .map(|index| field("call", index).and_then(str::parse))
            .transpose()?;

        Ok(Self {
            chromosome,
            start,
            end,
            log_ratio,
            call,
        })
    }

    /// Gets the chromosome.
    pub fn chromosome(&self) -> &Chromosome {
        &self.chromosome
    }

    /// Gets the start coordinate.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Gets the end coordinate.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Gets the log ratio.
    pub fn log_ratio(&self) -> f64 {
        self.log_ratio
    }

    /// Gets the copy-number call.
    pub fn call(&self) -> Option<Call> {
        self.call
    }
}

/// Returns whether a line of a segment table is its header.
///
/// Headers are recognized by a start coordinate column that is not a number.
pub fn is_header(line: &str, layout: &Layout) -> bool {
    line.split(COLUMN_DELIMITER)
        .nth(layout.start)
        .map(|value| value.trim_matches('"').parse::<u64>().is_err())
        .unwrap_or(true)
}

/// Replaces a single column of a line, leaving every other column untouched.
pub fn replace_column(line: &str, index: usize, value: &str) -> String {
    line.split(COLUMN_DELIMITER)
        .enumerate()
        .map(|(i, field)| if i == index { value } else { field })
        .collect::<Vec<_>>()
        .join(&COLUMN_DELIMITER.to_string())
}
