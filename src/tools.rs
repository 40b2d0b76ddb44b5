//! The external tools a run depends on.
//!
//! Nothing in here reimplements what the tools do: this module only knows how
//! to find out which version of each tool is installed and how to build the
//! command line for each stage.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::stage::Program;

/// The segmentation script handed to `Rscript`.
pub const DNACOPY_SCRIPT: &str = include_str!("tools/dnacopy.R");

/// The minimum mapping quality of reads in the pileup.
const MPILEUP_MIN_MAPPING_QUALITY: &str = "1";

static SAMTOOLS_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^samtools (\d+)\.(\d+)").unwrap());

static VARSCAN_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"VarScan v(\d+)\.(\d+)(?:\.(\d+))?").unwrap());

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to the installed tools.
#[derive(Debug)]
pub enum Error {
    /// The tool could not be run.
    Spawn(&'static str, io::Error),

    /// The version of the tool could not be determined.
    UnknownVersion(&'static str),

    /// The installed version of the tool is not supported.
    UnsupportedVersion {
        /// The tool.
        tool: &'static str,

        /// The version found.
        found: Version,

        /// A description of the supported versions.
        expected: &'static str,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Spawn(tool, err) => write!(f, "could not run `{tool}`: {err}"),
            Error::UnknownVersion(tool) => {
                write!(f, "could not determine the installed version of `{tool}`")
            }
            Error::UnsupportedVersion {
                tool,
                found,
                expected,
            } => write!(
                f,
                "unsupported version of `{tool}`: found {found}, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Versions
////////////////////////////////////////////////////////////////////////////////////////

/// A tool version.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Version {
    /// The major version.
    pub major: u32,

    /// The minor version.
    pub minor: u32,

    /// The patch version, if reported.
    pub patch: Option<u32>,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;

        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }

        Ok(())
    }
}

/// Parses the version from the output of `samtools --version`.
pub fn parse_samtools_version(output: &str) -> Option<Version> {
    parse_version(&SAMTOOLS_VERSION, output)
}

/// Parses the version from the banner VarScan prints.
pub fn parse_varscan_version(output: &str) -> Option<Version> {
    parse_version(&VARSCAN_VERSION, output)
}

/// Parses a version with a regex whose groups are the major, minor, and
/// (optional) patch version.
fn parse_version(regex: &Regex, output: &str) -> Option<Version> {
    let captures = regex.captures(output)?;
    let number = |i: usize| captures.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    Some(Version {
        major: number(1)?,
        minor: number(2)?,
        patch: number(3),
    })
}

/// Returns whether a samtools version is supported.
fn samtools_supported(version: &Version) -> bool {
    version.major == 1
}

/// Returns whether a VarScan version is supported.
///
/// Recentering through the segment caller first appeared in 2.3.
fn varscan_supported(version: &Version) -> bool {
    version.major == 2 && (3..=4).contains(&version.minor)
}

////////////////////////////////////////////////////////////////////////////////////////
// Tools
////////////////////////////////////////////////////////////////////////////////////////

/// The locations of the external tools.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tools {
    /// The `samtools` executable.
    pub samtools: PathBuf,

    /// The `java` executable used to run VarScan.
    pub java: PathBuf,

    /// The VarScan jar.
    pub varscan_jar: PathBuf,

    /// The `Rscript` executable used to run the segmentation.
    pub rscript: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            samtools: PathBuf::from("samtools"),
            java: PathBuf::from("java"),
            varscan_jar: PathBuf::from("VarScan.jar"),
            rscript: PathBuf::from("Rscript"),
        }
    }
}

impl Tools {
    /// Ensures that supported versions of samtools and VarScan are installed.
    pub fn check_versions(&self) -> Result<()> {
        let output =
            capture(&self.samtools, ["--version"]).map_err(|e| Error::Spawn("samtools", e))?;
        let version = parse_samtools_version(&output).ok_or(Error::UnknownVersion("samtools"))?;
        if !samtools_supported(&version) {
            return Err(Error::UnsupportedVersion {
                tool: "samtools",
                found: version,
                expected: "1.x",
            });
        }
        info!("samtools: version {version}");

        let output = capture(&self.java, [OsStr::new("-jar"), self.varscan_jar.as_os_str()])
            .map_err(|e| Error::Spawn("VarScan", e))?;
        let version = parse_varscan_version(&output).ok_or(Error::UnknownVersion("VarScan"))?;
        if !varscan_supported(&version) {
            return Err(Error::UnsupportedVersion {
                tool: "VarScan",
                found: version,
                expected: "2.3.x or 2.4.x",
            });
        }
        info!("VarScan: version {version}");

        Ok(())
    }

    /// `samtools flagstat <alignment>`, written to the stage output.
    pub fn flagstat(&self, alignment: &Path) -> Program {
        Program::new(&self.samtools)
            .arg("flagstat")
            .arg(alignment)
            .capture_stdout()
    }

    /// `samtools mpileup` over the targets for both alignments, written to the
    /// stage output.
    pub fn mpileup(
        &self,
        reference: &Path,
        targets: &Path,
        control: &Path,
        tumor: &Path,
    ) -> Program {
        Program::new(&self.samtools)
            .arg("mpileup")
            .args(["-q", MPILEUP_MIN_MAPPING_QUALITY, "-B"])
            .arg("-f")
            .arg(reference)
            .arg("-l")
            .arg(targets)
            .arg(control)
            .arg(tumor)
            .capture_stdout()
    }

    /// Gets an invocation of VarScan.
    fn varscan(&self) -> Program {
        Program::new(&self.java).arg("-jar").arg(&self.varscan_jar)
    }

    /// `VarScan copynumber`, which writes `<prefix>.copynumber`.
    pub fn copynumber(&self, pileup: &Path, prefix: &Path, data_ratio: &str) -> Program {
        self.varscan()
            .arg("copynumber")
            .arg(pileup)
            .arg(prefix)
            .args(["--mpileup", "1", "--data-ratio", data_ratio])
    }

    /// `VarScan copyCaller`, optionally recentering by the given option and
    /// magnitude.
    pub fn copy_caller(
        &self,
        copynumber: &Path,
        output: &Path,
        homdel: &Path,
        recenter: Option<(&str, f64)>,
    ) -> Program {
        let program = self
            .varscan()
            .arg("copyCaller")
            .arg(copynumber)
            .arg("--output-file")
            .arg(output)
            .arg("--output-homdel-file")
            .arg(homdel);

        match recenter {
            Some((option, magnitude)) => program.arg(option).arg(magnitude.to_string()),
            None => program,
        }
    }

    /// `Rscript <script> <calls> <output> <undo_sd>`.
    pub fn segment(&self, script: &Path, calls: &Path, output: &Path, undo_sd: f64) -> Program {
        Program::new(&self.rscript)
            .arg(script)
            .arg(calls)
            .arg(output)
            .arg(undo_sd.to_string())
    }
}

/// Runs a program and returns everything it wrote to standard output and
/// standard error, regardless of its exit status.
fn capture<I, S>(program: &Path, args: I) -> io::Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}
